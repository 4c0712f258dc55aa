//! Maps `VedfolnirError` onto the stable `{code, message, retry_after?,
//! guidance?}` HTTP shape. Every handler returns
//! `Result<T, ApiFailure>` so `?` does the translation at the boundary
//! rather than each handler hand-rolling a status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use vedfolnir_common::{ApiError, VedfolnirError};

pub struct ApiFailure(VedfolnirError);

impl From<VedfolnirError> for ApiFailure {
    fn from(err: VedfolnirError) -> Self {
        ApiFailure(err)
    }
}

fn status_for(err: &VedfolnirError) -> StatusCode {
    match err {
        VedfolnirError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        VedfolnirError::Authentication { .. } => StatusCode::UNAUTHORIZED,
        VedfolnirError::Platform { .. } => StatusCode::BAD_GATEWAY,
        VedfolnirError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
        VedfolnirError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        VedfolnirError::Resource(_) => StatusCode::SERVICE_UNAVAILABLE,
        VedfolnirError::DetachedInstance { .. }
        | VedfolnirError::PlatformContext
        | VedfolnirError::Database(_)
        | VedfolnirError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body: ApiError = (&self.0).into();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(body)).into_response()
    }
}

/// A request-visible failure with no `VedfolnirError` counterpart (bad
/// path params, unknown ids, forbidden actions).
pub fn not_found(what: &'static str) -> ApiFailure {
    ApiFailure(VedfolnirError::Validation(format!("{what} not found")))
}

pub fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(ApiError {
            code: "forbidden",
            message: "You are not allowed to perform this action".to_string(),
            retry_after_secs: None,
            guidance: None,
        }),
    )
        .into_response()
}

/// Progress subscribe endpoints are rate limited per subscriber.
pub fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ApiError {
            code: "rate_limited",
            message: "too many subscribe attempts, slow down".to_string(),
            retry_after_secs: Some(60),
            guidance: None,
        }),
    )
        .into_response()
}
