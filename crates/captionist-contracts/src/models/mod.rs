mod catalog;
mod selection;

pub use catalog::{ModelCatalog, ModelSpec, DEFAULT_MODEL_A_ID, DEFAULT_MODEL_B_ID};
pub use selection::{ModelChoice, SubmissionSettings, Tone};
