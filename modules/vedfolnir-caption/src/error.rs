pub type Result<T> = std::result::Result<T, CaptionError>;

#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    #[error("vision model call failed: {0}")]
    Vision(#[from] vision_client::VisionError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
