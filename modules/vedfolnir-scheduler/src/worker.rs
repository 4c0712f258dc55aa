//! The worker loop that runs one `CaptionGenerationTask` to completion
//!: bind the Platform Context, page through the
//! user's posts, content-address and caption every image missing alt text
//! through the fallback ladder, persist results, and publish progress at
//! every suspension point so cancellation is observed promptly.

use std::sync::Arc;

use base64::Engine;
use futures::StreamExt;
use serde_json::json;
use uuid::Uuid;

use vedfolnir_caption::{FallbackLadder, ImageCategory};
use vedfolnir_common::types::{
    CaptionGenerationTask, GenerationResults, ImageStatus, ImageSummary, PlatformConnection,
    PlatformCredentials, ProcessingRun, ProgressEvent, TaskStatus,
};
use vedfolnir_common::VedfolnirError;
use vedfolnir_platforms::ratelimit::EndpointFamily;
use vedfolnir_platforms::{NormalizedAttachment, PlatformAdapter};
use vedfolnir_recovery::{classify_message, strategy_for, NotifyBackend, RecoveryStrategy};
use vedfolnir_store::context::PlatformContext;

use crate::scheduler::SchedulerInner;

/// Decrypts a connection's stored credentials, scoped to the lifetime of
/// one worker run. Never logged, never persisted back.
pub(crate) fn decrypt_credentials(
    inner: &SchedulerInner,
    connection: &PlatformConnection,
) -> Result<PlatformCredentials, VedfolnirError> {
    let access_token = inner
        .cipher
        .decrypt(&connection.access_token_ciphertext, connection.id)?;
    let client_key = connection
        .client_key_ciphertext
        .as_ref()
        .map(|ct| inner.cipher.decrypt(ct, connection.id))
        .transpose()?;
    let client_secret = connection
        .client_secret_ciphertext
        .as_ref()
        .map(|ct| inner.cipher.decrypt(ct, connection.id))
        .transpose()?;
    Ok(PlatformCredentials {
        access_token,
        client_key,
        client_secret,
    })
}

fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        _ => "bin",
    }
}

fn publish(inner: &SchedulerInner, task_id: Uuid, step: &str, percent: u8, details: Option<serde_json::Value>) {
    inner.broadcaster.publish(ProgressEvent {
        task_id,
        current_step: step.to_string(),
        progress_percent: percent,
        details,
    });
}

async fn cancel_requested(inner: &SchedulerInner, task_id: Uuid) -> bool {
    inner.store.is_cancel_requested(task_id).await.unwrap_or(false)
}

/// Records an error for the admin-facing tracker and routes a notification
/// when its category's recovery strategy calls for one.
async fn record_error(inner: &SchedulerInner, message: &str) {
    let category = classify_message(message);
    inner.error_tracker.record(category, message);
    let should_notify = matches!(
        strategy_for(category),
        RecoveryStrategy::FailFast { notify_admin: true } | RecoveryStrategy::NotifyAdminAndFail
    );
    if should_notify {
        let notification = inner.error_tracker.notify_admin(category, message.to_string());
        inner.notify_router.send(&notification).await;
    }
}

fn percent_for(posts_processed: u32, max_posts: u32) -> u8 {
    let ratio = posts_processed as f64 / max_posts.max(1) as f64;
    (ratio * 100.0).min(99.0) as u8
}

enum PipelineOutcome {
    Cancelled(GenerationResults),
    Failed(GenerationResults, String),
}

/// Runs `task_id` to completion: claims it via the exactly-once CAS dequeue,
/// runs the pipeline under a wall-clock timeout, and persists the terminal
/// outcome. Called by one of the scheduler's worker loops after receiving
/// the id off the bounded task channel.
pub(crate) async fn run_task(inner: Arc<SchedulerInner>, task_id: Uuid) {
    let task = match inner.store.try_start_task(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            tracing::debug!(%task_id, "task no longer queued at dequeue time, skipping");
            return;
        }
        Err(err) => {
            tracing::error!(%task_id, error = %err, "failed to claim task");
            return;
        }
    };

    inner.metrics.task_started();
    let start = std::time::Instant::now();
    publish(&inner, task_id, "starting", 0, None);

    let timeout = inner.config.scheduler.task_timeout;
    let outcome = tokio::time::timeout(timeout, run_pipeline(inner.clone(), task.clone())).await;

    let (status, results, error_message) = match outcome {
        Ok(Ok(results)) => (TaskStatus::Completed, results, None),
        Ok(Err(PipelineOutcome::Cancelled(results))) => {
            (TaskStatus::Cancelled, results, Some("cancelled by request".to_string()))
        }
        Ok(Err(PipelineOutcome::Failed(results, message))) => (TaskStatus::Failed, results, Some(message)),
        Err(_) => (
            TaskStatus::Cancelled,
            GenerationResults::default(),
            Some("task exceeded its wall-clock timeout".to_string()),
        ),
    };

    if let Err(err) = inner
        .store
        .complete_task(task_id, status, &results, error_message.as_deref())
        .await
    {
        tracing::error!(%task_id, error = %err, "failed to persist terminal task state");
    }

    let step = match status {
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
        TaskStatus::Queued | TaskStatus::Running => "unknown",
    };
    publish(&inner, task_id, step, 100, Some(json!({ "images_processed": results.images_processed })));
    inner.broadcaster.close_task(task_id);
    inner.metrics.task_finished(status, start.elapsed().as_millis() as u64);
}

async fn run_pipeline(
    inner: Arc<SchedulerInner>,
    task: CaptionGenerationTask,
) -> Result<GenerationResults, PipelineOutcome> {
    let ctx = inner
        .store
        .switch_platform(task.user_id, task.platform_connection_id)
        .await
        .map_err(|e| PipelineOutcome::Failed(GenerationResults::default(), e.to_string()))?;

    PlatformContext::scope(ctx, run_pipeline_in_scope(inner, task)).await
}

async fn run_pipeline_in_scope(
    inner: Arc<SchedulerInner>,
    task: CaptionGenerationTask,
) -> Result<GenerationResults, PipelineOutcome> {
    let mut results = GenerationResults::default();
    let ctx = PlatformContext::current().expect("bound by run_pipeline");
    let stats_start = inner.retry_stats.snapshot();

    let connection = match inner.store.get_platform_connection(task.platform_connection_id).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return Err(PipelineOutcome::Failed(
                results,
                "platform connection no longer exists".to_string(),
            ))
        }
        Err(e) => return Err(PipelineOutcome::Failed(results, e.to_string())),
    };

    let credentials = decrypt_credentials(&inner, &connection)
        .map_err(|e| PipelineOutcome::Failed(results.clone(), e.to_string()))?;

    let adapter = inner
        .registry
        .adapter_for(&connection, &credentials)
        .map_err(|e| PipelineOutcome::Failed(results.clone(), e.to_string()))?;

    if let Err(e) = adapter.authenticate().await {
        let message = e.to_string();
        record_error(&inner, &message).await;
        return Err(PipelineOutcome::Failed(results, message));
    }

    let run = inner
        .store
        .open_processing_run(&ctx, task.id)
        .await
        .map_err(|e| PipelineOutcome::Failed(results.clone(), e.to_string()))?;

    let mut posts_processed: u32 = 0;
    let mut stream = adapter.list_user_posts(task.settings.max_posts_per_run as usize);

    loop {
        if cancel_requested(&inner, task.id).await {
            close_run(&inner, &run, &results, &stats_start).await;
            return Err(PipelineOutcome::Cancelled(results));
        }

        inner
            .rate_limiter
            .acquire(connection.platform_type, EndpointFamily::Timeline)
            .await;

        let normalized = match stream.next().await {
            None => break,
            Some(Ok(post)) => post,
            Some(Err(e)) => {
                record_error(&inner, &e.to_string()).await;
                if !e.is_retryable() {
                    close_run(&inner, &run, &results, &stats_start).await;
                    return Err(PipelineOutcome::Failed(results, e.to_string()));
                }
                break;
            }
        };

        let post_row = match inner
            .store
            .upsert_post(
                &ctx,
                task.user_id,
                connection.platform_type,
                &connection.instance_url,
                &normalized.id,
                &normalized.url,
                &normalized.text,
            )
            .await
        {
            Ok(p) => p,
            Err(e) => {
                record_error(&inner, &e.to_string()).await;
                results.errors += 1;
                continue;
            }
        };
        posts_processed += 1;

        for (index, attachment) in normalized.attachments.iter().enumerate() {
            if !attachment.needs_caption() {
                continue;
            }

            if cancel_requested(&inner, task.id).await {
                close_run(&inner, &run, &results, &stats_start).await;
                return Err(PipelineOutcome::Cancelled(results));
            }

            if !task.settings.reprocess_existing {
                if let Ok(Some(existing)) = inner.store.get_image_by_source_url(&attachment.url).await {
                    if existing.status != ImageStatus::Error {
                        continue;
                    }
                }
            }

            let summary =
                process_attachment(&inner, &ctx, &task, post_row.id, index as i32, attachment).await;

            results.images_processed += 1;
            if summary.status == ImageStatus::Pending {
                results.captions_generated += 1;
            }
            if summary.error.is_some() {
                results.errors += 1;
            }
            results.images.push(summary);

            if task.settings.processing_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(task.settings.processing_delay_ms)).await;
            }
        }

        results.posts_processed = posts_processed;
        let percent = percent_for(posts_processed, task.settings.max_posts_per_run);
        let _ = inner.store.update_task_progress(task.id, percent, "processing").await;
        publish(&inner, task.id, "processing", percent, Some(json!({ "posts_processed": posts_processed })));
    }

    close_run(&inner, &run, &results, &stats_start).await;
    Ok(results)
}

#[allow(clippy::too_many_arguments)]
async fn process_attachment(
    inner: &SchedulerInner,
    ctx: &PlatformContext,
    task: &CaptionGenerationTask,
    post_id: Uuid,
    attachment_index: i32,
    attachment: &NormalizedAttachment,
) -> ImageSummary {
    let fetch_result = inner
        .retry_policy
        .run(
            &inner.retry_stats,
            |_: &vedfolnir_media::MediaError| true,
            |_| None,
            |_attempt| inner.image_processor.fetch(&attachment.url),
        )
        .await;

    let fetched = match fetch_result {
        Ok(f) => f,
        Err(e) => {
            record_error(inner, &e.to_string()).await;
            return error_summary(inner, ctx, post_id, attachment_index, attachment, &e.to_string()).await;
        }
    };

    let content_path = match write_to_disk(inner, &fetched.content_hash, &fetched.media_type, &fetched.bytes).await
    {
        Ok(path) => path,
        Err(io_err) => {
            let message = io_err.to_string();
            record_error(inner, &message).await;
            return error_summary(inner, ctx, post_id, attachment_index, attachment, &message).await;
        }
    };

    let image = match inner
        .store
        .insert_image(
            ctx,
            post_id,
            &attachment.url,
            &content_path,
            &fetched.media_type,
            attachment_index,
            &attachment.id,
            attachment.alt_text.as_deref(),
        )
        .await
    {
        Ok(img) => img,
        Err(e) => {
            return ImageSummary {
                image_id: Uuid::nil(),
                status: ImageStatus::Error,
                caption: None,
                quality_score: None,
                needs_special_review: true,
                error: Some(e.to_string()),
            }
        }
    };

    let image_b64 = base64::engine::general_purpose::STANDARD.encode(&fetched.bytes);
    let category = ImageCategory::from_hint(None);
    let ladder = FallbackLadder::new(
        &inner.vision_client,
        &inner.quality_assessor,
        inner.fallback_config.clone(),
        inner.config.vision_model.primary_model.clone(),
    );

    match ladder
        .run(
            &inner.fallback_stats,
            category,
            &image_b64,
            task.settings.optimal_min_length,
            task.settings.optimal_max_length,
        )
        .await
    {
        Ok(outcome) => {
            let _ = inner
                .store
                .set_image_caption_result(
                    image.id,
                    Some(&outcome.caption),
                    Some(outcome.quality.overall as i16),
                    None,
                    outcome.needs_special_review,
                    ImageStatus::Pending,
                    None,
                )
                .await;
            ImageSummary {
                image_id: image.id,
                status: ImageStatus::Pending,
                caption: Some(outcome.caption),
                quality_score: Some(outcome.quality.overall as i16),
                needs_special_review: outcome.needs_special_review,
                error: None,
            }
        }
        Err(e) => {
            record_error(inner, &e.to_string()).await;
            let _ = inner
                .store
                .set_image_caption_result(image.id, None, None, None, true, ImageStatus::Error, Some(&e.to_string()))
                .await;
            ImageSummary {
                image_id: image.id,
                status: ImageStatus::Error,
                caption: None,
                quality_score: None,
                needs_special_review: true,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Records a fetch-time failure as an `Image` row in `Error` status rather
/// than dropping it silently, so it still shows up for the reviewer.
async fn error_summary(
    inner: &SchedulerInner,
    ctx: &PlatformContext,
    post_id: Uuid,
    attachment_index: i32,
    attachment: &NormalizedAttachment,
    message: &str,
) -> ImageSummary {
    let inserted = inner
        .store
        .insert_image(
            ctx,
            post_id,
            &attachment.url,
            "",
            &attachment.media_type,
            attachment_index,
            &attachment.id,
            attachment.alt_text.as_deref(),
        )
        .await;

    let image_id = match inserted {
        Ok(image) => {
            let _ = inner
                .store
                .set_image_caption_result(image.id, None, None, None, true, ImageStatus::Error, Some(message))
                .await;
            image.id
        }
        Err(_) => Uuid::nil(),
    };

    ImageSummary {
        image_id,
        status: ImageStatus::Error,
        caption: None,
        quality_score: None,
        needs_special_review: true,
        error: Some(message.to_string()),
    }
}

async fn write_to_disk(
    inner: &SchedulerInner,
    content_hash: &str,
    media_type: &str,
    bytes: &[u8],
) -> std::io::Result<String> {
    tokio::fs::create_dir_all(&inner.config.storage.base_dir).await?;
    let path = std::path::Path::new(&inner.config.storage.base_dir)
        .join(format!("{content_hash}.{}", extension_for(media_type)));
    tokio::fs::write(&path, bytes).await?;
    Ok(path.to_string_lossy().into_owned())
}

async fn close_run(
    inner: &SchedulerInner,
    run: &ProcessingRun,
    results: &GenerationResults,
    stats_start: &vedfolnir_platforms::ratelimit::RetryStatsSnapshot,
) {
    let stats_end = inner.retry_stats.snapshot();
    let retry_count = stats_end.retries.saturating_sub(stats_start.retries) as i32;
    let total_wait_ms = stats_end.total_wait_ms.saturating_sub(stats_start.total_wait_ms) as i64;
    let _ = inner
        .store
        .close_processing_run(
            run.id,
            results.posts_processed as i32,
            results.images_processed as i32,
            results.captions_generated as i32,
            results.errors as i32,
            retry_count,
            total_wait_ms,
        )
        .await;
}
