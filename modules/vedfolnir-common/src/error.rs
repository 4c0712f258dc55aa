use thiserror::Error;

/// Error taxonomy shared across the workspace. Each variant
/// carries its own retry/propagation semantics; components map their
/// internal errors onto this set at their boundary rather than leaking
/// implementation-specific error types upward.
#[derive(Error, Debug)]
pub enum VedfolnirError {
    /// Fatal at startup: invalid or missing configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Permanent, scoped to one platform connection. Never retried.
    #[error("authentication failed for platform connection {connection_id}: {message}")]
    Authentication {
        connection_id: uuid::Uuid,
        message: String,
    },

    /// Transient network/5xx from a federated instance. Retried per §4.3.
    #[error("platform error ({status:?}): {message}")]
    Platform {
        status: Option<u16>,
        message: String,
    },

    /// Transient; honours the server's Retry-After.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    /// Permanent, user-visible.
    #[error("validation error: {0}")]
    Validation(String),

    /// Transient, retryable (disk/memory/quota pressure).
    #[error("resource error: {0}")]
    Resource(String),

    /// Internal: a task handle's backing row disappeared or was reset.
    #[error("stale handle for {entity} {id}")]
    DetachedInstance { entity: &'static str, id: uuid::Uuid },

    /// Internal: an operation required an active Platform Context and none was bound.
    #[error("no platform context bound for this task")]
    PlatformContext,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VedfolnirError>;

/// The stable `{code, message, retry_after?, guidance?}` shape returned to
/// external callers — never includes stack traces,
/// credentials, or internal paths.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    pub retry_after_secs: Option<u64>,
    pub guidance: Option<&'static str>,
}

impl From<&VedfolnirError> for ApiError {
    fn from(err: &VedfolnirError) -> Self {
        match err {
            VedfolnirError::Configuration(_) => ApiError {
                code: "configuration_error",
                message: "Server misconfiguration".to_string(),
                retry_after_secs: None,
                guidance: None,
            },
            VedfolnirError::Authentication { .. } => ApiError {
                code: "authentication_error",
                message: "Your platform connection needs to be re-authorised".to_string(),
                retry_after_secs: None,
                guidance: Some("Re-authorise your account"),
            },
            VedfolnirError::Platform { .. } => ApiError {
                code: "platform_error",
                message: "The remote instance is temporarily unavailable".to_string(),
                retry_after_secs: None,
                guidance: Some("Please try again shortly"),
            },
            VedfolnirError::RateLimit { retry_after_secs } => ApiError {
                code: "rate_limited",
                message: format!("Try again in {retry_after_secs} seconds"),
                retry_after_secs: Some(*retry_after_secs),
                guidance: None,
            },
            VedfolnirError::Validation(msg) => ApiError {
                code: "validation_error",
                message: msg.clone(),
                retry_after_secs: None,
                guidance: None,
            },
            VedfolnirError::Resource(_) => ApiError {
                code: "resource_error",
                message: "Server busy, please retry".to_string(),
                retry_after_secs: None,
                guidance: Some("Please retry shortly"),
            },
            VedfolnirError::DetachedInstance { .. }
            | VedfolnirError::PlatformContext
            | VedfolnirError::Database(_)
            | VedfolnirError::Anyhow(_) => ApiError {
                code: "internal_error",
                message: "Internal error".to_string(),
                retry_after_secs: None,
                guidance: None,
            },
        }
    }
}
