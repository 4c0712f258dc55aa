//! Platform connection management. Enqueue needs a `platform_connection_id`
//! to point at, and the full lifecycle (uniqueness invariants, at-most-one
//! default, encrypted credentials, refuse-unless-force delete) has to live
//! somewhere, so the CRUD surface is implemented here.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vedfolnir_common::types::{PlatformConnection, PlatformType};
use vedfolnir_platforms::detect::detect_from_url;

use crate::auth::{forbidden, AuthUser};
use crate::error::{not_found, ApiFailure};
use crate::state::AppState;

/// Public view of a `PlatformConnection` with the ciphertext fields
/// dropped. Sensitive fields are never returned in serialised form.
#[derive(Serialize)]
pub struct PlatformConnectionView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub platform_type: PlatformType,
    pub instance_url: String,
    pub username: String,
    pub is_active: bool,
    pub is_default: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PlatformConnection> for PlatformConnectionView {
    fn from(c: PlatformConnection) -> Self {
        PlatformConnectionView {
            id: c.id,
            user_id: c.user_id,
            name: c.name,
            platform_type: c.platform_type,
            instance_url: c.instance_url,
            username: c.username,
            is_active: c.is_active,
            is_default: c.is_default,
            last_checked_at: c.last_checked_at,
            last_error: c.last_error,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateConnectionRequest {
    pub name: String,
    /// When omitted, the platform type is auto-detected from `instance_url`.
    pub platform_type: Option<PlatformType>,
    pub instance_url: String,
    pub username: String,
    pub access_token: String,
    pub client_key: Option<String>,
    pub client_secret: Option<String>,
    #[serde(default)]
    pub make_default: bool,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateConnectionRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let platform_type = body.platform_type.unwrap_or_else(|| detect_from_url(&body.instance_url));

    // The AEAD associated data binds ciphertext to this id, so it must be
    // minted before encryption rather than left to the column default.
    let id = Uuid::new_v4();
    let access_token_ciphertext = state.cipher.encrypt(&body.access_token, id)?;
    let client_key_ciphertext = body
        .client_key
        .as_deref()
        .map(|v| state.cipher.encrypt(v, id))
        .transpose()?;
    let client_secret_ciphertext = body
        .client_secret
        .as_deref()
        .map(|v| state.cipher.encrypt(v, id))
        .transpose()?;

    let connection = state
        .store
        .create_platform_connection(
            id,
            auth.user_id,
            &body.name,
            platform_type,
            &body.instance_url,
            &body.username,
            access_token_ciphertext,
            client_key_ciphertext,
            client_secret_ciphertext,
            body.make_default,
        )
        .await?;

    Ok(Json(PlatformConnectionView::from(connection)))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiFailure> {
    let connections = state.store.list_platform_connections(auth.user_id).await?;
    let views: Vec<PlatformConnectionView> = connections.into_iter().map(Into::into).collect();
    Ok(Json(views))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(connection_id): Path<Uuid>,
) -> Result<axum::response::Response, axum::response::Response> {
    let connection = state
        .store
        .get_platform_connection(connection_id)
        .await
        .map_err(ApiFailure::from)
        .map_err(IntoResponse::into_response)?
        .ok_or_else(|| not_found("platform connection"))
        .map_err(IntoResponse::into_response)?;

    if connection.user_id != auth.user_id && !auth.is_admin_or_moderator() {
        return Err(forbidden());
    }

    Ok(Json(PlatformConnectionView::from(connection)).into_response())
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(connection_id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> Result<axum::response::Response, axum::response::Response> {
    let connection = state
        .store
        .get_platform_connection(connection_id)
        .await
        .map_err(ApiFailure::from)
        .map_err(IntoResponse::into_response)?
        .ok_or_else(|| not_found("platform connection"))
        .map_err(IntoResponse::into_response)?;

    if connection.user_id != auth.user_id && !auth.is_admin_or_moderator() {
        return Err(forbidden());
    }

    let deleted = state
        .store
        .delete_platform_connection(connection_id, query.force)
        .await
        .map_err(ApiFailure::from)
        .map_err(IntoResponse::into_response)?;
    Ok(Json(serde_json::json!({"deleted": deleted})).into_response())
}
