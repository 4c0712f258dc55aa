//! Review decisions: one image at a time, or in bulk over a
//! task's result set. There is no `images.batch_id` column — a batch's
//! image set is exactly the `ImageSummary` rows already recorded on
//! `CaptionGenerationTask::results` by the worker that produced them,
//! since one processing run belongs to exactly one task and the task id
//! is the only identifier needed to group its images for batch review.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use vedfolnir_common::types::ReviewDecision;
use vedfolnir_common::types::ReviewRequest;

use crate::auth::AuthUser;
use crate::error::{not_found, ApiFailure};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ReviewDecisionRequest {
    pub decision: ReviewDecision,
    pub new_caption: Option<String>,
    pub notes: Option<String>,
}

pub async fn decide(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(image_id): Path<Uuid>,
    Json(body): Json<ReviewDecisionRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let image = state
        .scheduler
        .apply_review(ReviewRequest {
            image_id,
            requester_id: auth.user_id,
            decision: body.decision,
            new_caption: body.new_caption,
            notes: body.notes,
        })
        .await?;
    Ok(Json(image))
}

#[derive(Deserialize)]
pub struct BulkReviewRequest {
    pub decision: ReviewDecision,
    /// Restricts the decision to this subset of the task's images; `None`
    /// applies it to every image the task produced.
    pub image_ids: Option<Vec<Uuid>>,
    pub notes: Option<String>,
}

#[derive(serde::Serialize)]
pub struct BulkReviewOutcome {
    pub image_id: Uuid,
    pub applied: bool,
    pub error: Option<String>,
}

pub async fn decide_bulk(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Json(body): Json<BulkReviewRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let results = state.scheduler.results(task_id).await?.ok_or_else(|| not_found("task"))?;

    let targets: Vec<Uuid> = match &body.image_ids {
        Some(ids) => ids.clone(),
        None => results.images.iter().map(|i| i.image_id).collect(),
    };

    let mut outcomes = Vec::with_capacity(targets.len());
    for image_id in targets {
        let outcome = state
            .scheduler
            .apply_review(ReviewRequest {
                image_id,
                requester_id: auth.user_id,
                decision: body.decision,
                new_caption: None,
                notes: body.notes.clone(),
            })
            .await;
        outcomes.push(match outcome {
            Ok(_) => BulkReviewOutcome { image_id, applied: true, error: None },
            Err(e) => BulkReviewOutcome { image_id, applied: false, error: Some(e.to_string()) },
        });
    }

    Ok(Json(outcomes))
}
