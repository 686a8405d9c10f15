use thiserror::Error;

pub type CaptionResult<T> = Result<T, CaptionError>;

const USER_MESSAGE_MAX_CHARS: usize = 240;

/// Failure taxonomy shared by the pipeline client, the orchestrator and the
/// history cache.
///
/// `Display` is meant for logs. Anything shown to a person goes through
/// [`CaptionError::user_message`], which never echoes a raw backend payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptionError {
    /// Bad input detected on the client; no network call was made.
    #[error("invalid input: {0}")]
    Validation(String),
    /// Connectivity failure, including timeouts.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },
    /// The backend answered successfully but reported an application error.
    #[error("backend reported an error: {message}")]
    Semantic { message: String },
}

impl CaptionError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            status,
            message: message.into(),
        }
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self::Semantic {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transport(_) => "transport",
            Self::Backend { .. } => "backend",
            Self::Semantic { .. } => "semantic",
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Backend { status: 404, .. })
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) => clamp_message(message),
            Self::Transport(_) => {
                "Could not reach the caption service. Check the connection and try again."
                    .to_string()
            }
            Self::Backend { status, message } => {
                let message = message.trim();
                if message.is_empty() {
                    format!("The caption service failed (status {status}).")
                } else {
                    format!(
                        "The caption service failed (status {status}): {}",
                        clamp_message(message)
                    )
                }
            }
            Self::Semantic { message } => {
                let message = message.trim();
                if message.is_empty() {
                    "Caption generation failed.".to_string()
                } else {
                    format!("Caption generation failed: {}", clamp_message(message))
                }
            }
        }
    }
}

fn clamp_message(message: &str) -> String {
    let single_line = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= USER_MESSAGE_MAX_CHARS {
        return single_line;
    }
    single_line
        .chars()
        .take(USER_MESSAGE_MAX_CHARS)
        .collect::<String>()
        + "…"
}
