//! Task lifecycle endpoints: enqueue, status, cancel, results.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use vedfolnir_common::types::CaptionGenerationSettings;

use crate::auth::{forbidden, AuthUser};
use crate::error::{not_found, ApiFailure};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct EnqueueRequest {
    pub platform_connection_id: Uuid,
    pub settings: CaptionGenerationSettings,
}

pub async fn enqueue(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<EnqueueRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let task = state
        .scheduler
        .enqueue(auth.user_id, body.platform_connection_id, body.settings)
        .await?;
    Ok(Json(task))
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<axum::response::Response, axum::response::Response> {
    let task = state
        .scheduler
        .status(task_id)
        .await
        .map_err(ApiFailure::from)
        .map_err(IntoResponse::into_response)?
        .ok_or_else(|| not_found("task"))
        .map_err(IntoResponse::into_response)?;

    if task.user_id != auth.user_id && !auth.is_admin_or_moderator() {
        return Err(forbidden());
    }
    Ok(Json(task).into_response())
}

pub async fn results(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<axum::response::Response, axum::response::Response> {
    let task = state
        .scheduler
        .status(task_id)
        .await
        .map_err(ApiFailure::from)
        .map_err(IntoResponse::into_response)?
        .ok_or_else(|| not_found("task"))
        .map_err(IntoResponse::into_response)?;

    if task.user_id != auth.user_id && !auth.is_admin_or_moderator() {
        return Err(forbidden());
    }

    let results = state
        .scheduler
        .results(task_id)
        .await
        .map_err(ApiFailure::from)
        .map_err(IntoResponse::into_response)?
        .ok_or_else(|| not_found("task"))
        .map_err(IntoResponse::into_response)?;
    Ok(Json(results).into_response())
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, axum::response::Response> {
    let ok = if auth.is_admin_or_moderator() {
        state.scheduler.cancel_any(task_id, auth.user_id).await
    } else {
        state.scheduler.cancel(task_id, auth.user_id).await
    }
    .map_err(ApiFailure::from)
    .map_err(IntoResponse::into_response)?;

    Ok(Json(serde_json::json!({"cancelled": ok})))
}
