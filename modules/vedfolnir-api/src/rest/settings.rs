//! Per (user, platform_connection) caption generation tuning
//! (`UserSettings`), so `CaptionGenerationSettings` has somewhere to come
//! from other than a client re-typing the same bounds on every enqueue call.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use vedfolnir_common::types::UserSettings;

use crate::auth::AuthUser;
use crate::error::{not_found, ApiFailure};
use crate::state::AppState;

pub async fn get(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(platform_connection_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiFailure> {
    let settings = state
        .store
        .get_user_settings(auth.user_id, platform_connection_id)
        .await?
        .ok_or_else(|| not_found("user settings"))?;
    Ok(Json(settings))
}

#[derive(Deserialize)]
pub struct PutSettingsRequest {
    pub max_posts_per_run: u32,
    pub max_caption_length: u32,
    pub optimal_min_length: u32,
    pub optimal_max_length: u32,
    pub reprocess_existing: bool,
    pub processing_delay_ms: u64,
}

pub async fn put(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(platform_connection_id): Path<Uuid>,
    Json(body): Json<PutSettingsRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let settings = UserSettings {
        user_id: auth.user_id,
        platform_connection_id,
        max_posts_per_run: body.max_posts_per_run,
        max_caption_length: body.max_caption_length,
        optimal_min_length: body.optimal_min_length,
        optimal_max_length: body.optimal_max_length,
        reprocess_existing: body.reprocess_existing,
        processing_delay_ms: body.processing_delay_ms,
    };
    state.store.upsert_user_settings(&settings).await?;
    Ok(Json(settings))
}
