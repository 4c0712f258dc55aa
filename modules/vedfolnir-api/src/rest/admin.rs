//! Admin supervision: list active tasks,
//! per-user history, cleanup, and scheduler/error-recovery metrics.
//! Every handler here requires `AuthUser::is_admin_or_moderator`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{forbidden, AuthUser};
use crate::error::ApiFailure;
use crate::state::AppState;

fn require_admin(auth: &AuthUser) -> Result<(), Response> {
    if auth.is_admin_or_moderator() {
        Ok(())
    } else {
        Err(forbidden())
    }
}

pub async fn list_active(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Response, Response> {
    require_admin(&auth)?;
    let tasks = state.scheduler.list_active().await.map_err(ApiFailure::from).map_err(IntoResponse::into_response)?;
    Ok(Json(tasks).into_response())
}

pub async fn user_history(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Response, Response> {
    require_admin(&auth)?;
    let tasks = state
        .scheduler
        .user_history(user_id)
        .await
        .map_err(ApiFailure::from)
        .map_err(IntoResponse::into_response)?;
    Ok(Json(tasks).into_response())
}

#[derive(Deserialize)]
pub struct CleanupQuery {
    pub older_than_hours: i64,
}

pub async fn cleanup(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<CleanupQuery>,
) -> Result<Response, Response> {
    require_admin(&auth)?;
    let removed = state
        .scheduler
        .cleanup_terminal_older_than(query.older_than_hours)
        .await
        .map_err(ApiFailure::from)
        .map_err(IntoResponse::into_response)?;
    Ok(Json(serde_json::json!({"removed": removed})).into_response())
}

pub async fn metrics(State(state): State<Arc<AppState>>, auth: AuthUser) -> Result<Response, Response> {
    require_admin(&auth)?;
    let scheduler = state.scheduler.metrics();
    let errors = state.scheduler.error_tracker().snapshot();
    Ok(Json(serde_json::json!({"scheduler": scheduler, "errors": errors})).into_response())
}

pub async fn notifications(State(state): State<Arc<AppState>>, auth: AuthUser) -> Result<Response, Response> {
    require_admin(&auth)?;
    let unread = state.scheduler.error_tracker().unread_notifications();
    Ok(Json(unread).into_response())
}
