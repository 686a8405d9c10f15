pub mod seen_cache;

pub use seen_cache::{SeenImage, SeenImageCache};
