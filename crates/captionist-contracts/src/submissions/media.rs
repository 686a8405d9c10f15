use std::fmt;
use std::path::Path;
use std::sync::Arc;

use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::error::{CaptionError, CaptionResult};

pub const UNSUPPORTED_MEDIA_MESSAGE: &str = "Please select a JPG or PNG image.";

const FALLBACK_DECLARED_TYPE: &str = "application/octet-stream";
const DEFAULT_IMAGE_NAME: &str = "Uploaded Image";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Jpeg,
    Png,
}

impl MediaType {
    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    /// Parses a declared media type. Parameters such as `; charset=` are
    /// ignored. Only the exact `image/jpeg` and `image/png` essences match.
    pub fn from_mime(raw: &str) -> Option<Self> {
        let essence = raw
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// A file as handed over by whatever picked it: name, declared type, bytes.
/// Nothing about it has been checked yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub name: String,
    pub declared_type: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn new(
        name: impl Into<String>,
        declared_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Reads a file from disk and declares its type the way a browser file
    /// picker does: from the extension, falling back to sniffing the header.
    pub fn from_path(path: &Path) -> CaptionResult<Self> {
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_IMAGE_NAME)
            .to_string();
        let bytes = std::fs::read(path)
            .map_err(|err| CaptionError::validation(format!("Could not read {name}: {err}")))?;
        let declared_type = ImageFormat::from_path(path)
            .ok()
            .or_else(|| image::guess_format(&bytes).ok())
            .map(|format| format.to_mime_type())
            .unwrap_or(FALLBACK_DECLARED_TYPE)
            .to_string();
        Ok(Self {
            name,
            declared_type,
            bytes,
        })
    }

    pub fn validate(self) -> CaptionResult<ValidatedImage> {
        let Some(media_type) = MediaType::from_mime(&self.declared_type) else {
            return Err(CaptionError::validation(UNSUPPORTED_MEDIA_MESSAGE));
        };
        if self.bytes.is_empty() {
            return Err(CaptionError::validation(format!(
                "{} is empty or unreadable.",
                display_name(&self.name)
            )));
        }
        Ok(ValidatedImage {
            name: display_name(&self.name).to_string(),
            media_type,
            bytes: Arc::from(self.bytes),
        })
    }
}

/// An accepted JPEG/PNG. The bytes are shared so stage jobs can carry the
/// image off the owner thread without copying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedImage {
    name: String,
    media_type: MediaType,
    bytes: Arc<[u8]>,
}

impl ValidatedImage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn display_name(name: &str) -> &str {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        DEFAULT_IMAGE_NAME
    } else {
        trimmed
    }
}
