//! The caller-supplied identity extractor. This service does not provide
//! its own user authentication: an upstream auth service issues a bearer
//! JWT naming the user id and role, and this extractor only verifies and
//! decodes it, carried as a header rather than a login-flow cookie.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vedfolnir_common::types::UserRole;

use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: UserRole,
    pub exp: i64,
}

/// The identity this request is acting as. Extracted once per request from
/// the `Authorization: Bearer <jwt>` header; every handler that needs
/// ownership or role checks takes this instead of re-parsing headers.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_admin_or_moderator(&self) -> bool {
        self.role.can_act_on_others_tasks()
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"code": "unauthenticated", "message": "missing or invalid bearer token"})),
    )
        .into_response()
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(unauthorized)?;

        let token = header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| unauthorized())?
        .claims;

        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role,
        })
    }
}

/// Returns the 403 response a handler gives when `requester` may act
/// neither as the resource owner nor as an admin/moderator.
pub fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({"code": "forbidden", "message": "you may not perform this action"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, user_id: Uuid, role: UserRole, exp: i64) -> String {
        let claims = Claims { sub: user_id, role, exp };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn claims_round_trip_through_encode_decode() {
        let secret = "test-secret";
        let user_id = Uuid::new_v4();
        let exp = chrono::Utc::now().timestamp() + 3600;
        let raw = token(secret, user_id, UserRole::Reviewer, exp);

        let decoded = decode::<Claims>(&raw, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
            .unwrap()
            .claims;

        assert_eq!(decoded.sub, user_id);
        assert_eq!(decoded.role, UserRole::Reviewer);
    }

    #[test]
    fn expired_token_is_rejected() {
        let secret = "test-secret";
        let raw = token(secret, Uuid::new_v4(), UserRole::Viewer, chrono::Utc::now().timestamp() - 10);
        let result = decode::<Claims>(&raw, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default());
        assert!(result.is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let raw = token(
            "secret-a",
            Uuid::new_v4(),
            UserRole::Admin,
            chrono::Utc::now().timestamp() + 3600,
        );
        let result = decode::<Claims>(&raw, &DecodingKey::from_secret(b"secret-b"), &Validation::default());
        assert!(result.is_err());
    }
}
