mod analysis;
mod fingerprint;
mod media;

pub use analysis::{
    AnalysisResult, CaptionSet, CaptionStyle, SceneDescription, NO_CAPTION_FALLBACK,
    PRIMARY_CAPTION_ORDER,
};
pub use fingerprint::{fingerprint, Fingerprint};
pub use media::{ImageFile, MediaType, ValidatedImage, UNSUPPORTED_MEDIA_MESSAGE};
