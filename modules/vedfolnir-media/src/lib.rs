pub mod error;
pub mod processor;

pub use error::{MediaError, Result};
pub use processor::{FetchedImage, ImageProcessor, ImageProcessorConfig};
