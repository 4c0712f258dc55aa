/// Result type alias for image-processing operations.
pub type Result<T> = std::result::Result<T, MediaError>;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("remote returned {status} for {url}")]
    BadStatus {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("image exceeds max size: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("unrecognised or corrupt image data: {0}")]
    InvalidImage(#[from] image::ImageError),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
