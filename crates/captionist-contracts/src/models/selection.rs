use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Instagram,
    Facebook,
    Linkedin,
}

impl Tone {
    pub const ALL: [Tone; 3] = [Tone::Instagram, Tone::Facebook, Tone::Linkedin];

    pub fn key(self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::Linkedin => "linkedin",
        }
    }

    /// Parses a tone selection. `none` and blank input mean "no tone".
    pub fn parse(raw: &str) -> Result<Option<Tone>, String> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.is_empty() || normalized == "none" {
            return Ok(None);
        }
        Self::ALL
            .into_iter()
            .find(|tone| tone.key() == normalized)
            .map(Some)
            .ok_or_else(|| {
                format!("Unknown tone '{}'. Use instagram, facebook, linkedin or none.", raw.trim())
            })
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelChoice {
    #[serde(rename = "modelA")]
    ModelA,
    #[serde(rename = "modelB")]
    ModelB,
}

impl ModelChoice {
    pub const ALL: [ModelChoice; 2] = [ModelChoice::ModelA, ModelChoice::ModelB];

    pub fn key(self) -> &'static str {
        match self {
            Self::ModelA => "modelA",
            Self::ModelB => "modelB",
        }
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Tone and model picked before analysis starts. Frozen for the lifetime of
/// the submission once the pipeline is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionSettings {
    pub tone: Option<Tone>,
    pub model: Option<ModelChoice>,
}

impl SubmissionSettings {
    pub fn new(tone: Option<Tone>, model: Option<ModelChoice>) -> Self {
        Self { tone, model }
    }

    pub fn tone_key(&self) -> &'static str {
        self.tone.map(Tone::key).unwrap_or("none")
    }

    pub fn model_key(&self) -> &'static str {
        self.model.map(ModelChoice::key).unwrap_or("none")
    }
}
