use thiserror::Error;

/// Errors surfaced by a platform adapter. Transient variants (`Http`,
/// `RateLimited`) are retried in-component by `vedfolnir-scheduler`'s use of
/// `RetryPolicy`; `Authentication` and `NotFound` are permanent and
/// propagate straight to Error Recovery.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("validation rejected by platform: {0}")]
    Validation(String),

    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("http error ({status:?}): {message}")]
    Http {
        status: Option<u16>,
        message: String,
    },

    #[error("could not detect platform type for instance {0}")]
    UndetectedPlatform(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlatformError {
    /// Network errors, timeouts, and 5xx/429 responses are retryable;
    /// other 4xx responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PlatformError::RateLimited { .. } => true,
            PlatformError::Http { status, .. } => match status {
                Some(s) => *s == 429 || *s >= 500,
                None => true, // no status means a connection/timeout error
            },
            PlatformError::Authentication(_)
            | PlatformError::NotFound(_)
            | PlatformError::Validation(_)
            | PlatformError::UndetectedPlatform(_) => false,
            PlatformError::Other(_) => false,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        PlatformError::Http {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;
