use std::thread;
use std::time::Duration;

use captionist_contracts::CaptionResult;

/// Retries transport failures only. Backend, semantic and validation
/// errors come back on the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn run<T>(
        &self,
        stage: &str,
        mut attempt_fn: impl FnMut() -> CaptionResult<T>,
    ) -> CaptionResult<T> {
        let mut attempt = 0u32;
        loop {
            match attempt_fn() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transport() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        stage,
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "transport retry after transient failure"
                    );
                    thread::sleep(self.backoff * attempt);
                }
                Err(err) => return Err(err),
            }
        }
    }
}
