pub mod chat;
pub mod error;
pub mod events;
pub mod models;
pub mod sessions;
pub mod submissions;
pub mod wire;

pub use error::{CaptionError, CaptionResult};
