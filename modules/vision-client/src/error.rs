pub type Result<T> = std::result::Result<T, VisionError>;

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("request to vision endpoint failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("vision endpoint returned {status}: {body}")]
    BadStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("vision endpoint returned an empty response")]
    EmptyResponse,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
