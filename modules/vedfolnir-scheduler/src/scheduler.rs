//! The bounded worker-pool scheduler itself: a single
//! `enqueue` hands a task id to a fixed-size pool of workers over a bounded
//! channel, so queue depth is capped and concurrent runs can never exceed
//! `max_concurrent_tasks`. Every transition is persisted through `Store`
//! first; the channel only ever carries an id that's already `queued` in
//! the database, so a crash between enqueue and dequeue is recovered by
//! `reconcile_running_tasks_on_boot` rather than lost.

use std::sync::Arc;

use base64::Engine;
use futures::Stream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use vedfolnir_caption::{FallbackConfig as CaptionFallbackConfig, FallbackStats, QualityAssessor, QualityWeights};
use vedfolnir_common::config::Config;
use vedfolnir_common::types::{
    CaptionGenerationSettings, CaptionGenerationTask, GenerationResults, Image, ImageStatus, PlatformCredentials,
    ProgressEvent, ReviewDecision, ReviewRequest,
};
use vedfolnir_common::VedfolnirError;
use vedfolnir_media::{ImageProcessor, ImageProcessorConfig};
use vedfolnir_platforms::ratelimit::{EndpointFamily, RateLimitDefaults, RateLimiter, RetryPolicy, RetryStats};
use vedfolnir_platforms::registry::{PlatformRegistry, RegistryConfig};
use vedfolnir_recovery::ErrorTracker;
use vedfolnir_recovery::NotifyRouter;
use vedfolnir_store::{CredentialCipher, Store};
use vision_client::{VisionClient, VisionClientConfig};

use crate::broadcast::ProgressBroadcaster;
use crate::ids::new_task_id;
use crate::metrics::{SchedulerMetrics, SchedulerMetricsSnapshot};
use crate::worker::{self, decrypt_credentials};

/// Everything a worker run needs, shared behind one `Arc` across the pool.
pub(crate) struct SchedulerInner {
    pub(crate) store: Store,
    pub(crate) cipher: CredentialCipher,
    pub(crate) registry: PlatformRegistry,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) retry_stats: RetryStats,
    pub(crate) image_processor: ImageProcessor,
    pub(crate) vision_client: VisionClient,
    pub(crate) quality_assessor: QualityAssessor,
    pub(crate) fallback_config: CaptionFallbackConfig,
    pub(crate) fallback_stats: FallbackStats,
    pub(crate) error_tracker: ErrorTracker,
    pub(crate) notify_router: NotifyRouter,
    pub(crate) broadcaster: ProgressBroadcaster,
    pub(crate) metrics: SchedulerMetrics,
    pub(crate) config: Config,
}

/// Decodes the configured key, accepting either base64 or hex so an
/// operator can generate it with whichever tool is at hand (`openssl rand
/// -base64 32` or `openssl rand -hex 32`). Exposed beyond this crate so
/// vedfolnir-api can build its own `CredentialCipher` for connection
/// creation without duplicating the decode logic.
pub fn decode_encryption_key(raw: &str) -> Result<Vec<u8>, VedfolnirError> {
    if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(raw.trim()) {
        if bytes.len() == 32 {
            return Ok(bytes);
        }
    }
    if let Ok(bytes) = hex::decode(raw.trim()) {
        if bytes.len() == 32 {
            return Ok(bytes);
        }
    }
    Err(VedfolnirError::Configuration(
        "CREDENTIAL_ENCRYPTION_KEY must be 32 bytes, base64 or hex encoded".to_string(),
    ))
}

/// Public handle to the running scheduler. Cloning is cheap (an `Arc` and
/// a channel sender); every clone shares the same worker pool and store.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    tx: mpsc::Sender<Uuid>,
}

impl Scheduler {
    /// Builds the scheduler, reconciles any tasks left `running` by a
    /// crashed prior process back to `queued`, re-enqueues them, and spawns
    /// `config.scheduler.max_concurrent_tasks` worker loops.
    pub async fn new(config: Config, store: Store) -> Result<Self, VedfolnirError> {
        let key = decode_encryption_key(&config.credential_encryption_key)?;
        let cipher = CredentialCipher::new(&key)?;

        let http = reqwest::Client::new();
        let registry = PlatformRegistry::new(http, RegistryConfig::default());

        let rate_limiter = RateLimiter::new(RateLimitDefaults {
            timeline_per_window: config.rate_limit.timeline_tokens_per_window,
            media_per_window: config.rate_limit.media_tokens_per_window,
            window: config.rate_limit.window,
        });

        let retry_policy = RetryPolicy {
            max_attempts: config.retry.max_attempts,
            base_delay: config.retry.base_delay,
            max_delay: config.retry.max_delay,
            backoff_factor: config.retry.backoff_factor,
            jitter: config.retry.jitter,
        };

        let image_processor = ImageProcessor::new(ImageProcessorConfig {
            max_download_bytes: config.storage.max_download_bytes,
            max_dimension: config.storage.max_image_dimension,
            request_timeout: std::time::Duration::from_secs(30),
        });

        let vision_client = VisionClient::new(VisionClientConfig {
            endpoint: config.vision_model.endpoint.clone(),
            request_timeout: config.vision_model.timeout,
        });

        let fallback_config = CaptionFallbackConfig {
            enabled: config.fallback.enabled,
            max_attempts: config.fallback.max_attempts,
            quality_threshold: config.fallback.quality_threshold,
            simplified_prompts_enabled: config.fallback.simplified_prompts_enabled,
            backup_model: config.fallback.backup_model.clone(),
            backup_model_enabled: config.fallback.backup_model_enabled,
        };

        let inner = Arc::new(SchedulerInner {
            store,
            cipher,
            registry,
            rate_limiter,
            retry_policy,
            retry_stats: RetryStats::default(),
            image_processor,
            vision_client,
            quality_assessor: QualityAssessor::new(QualityWeights::default()),
            fallback_config,
            fallback_stats: FallbackStats::default(),
            error_tracker: ErrorTracker::new(std::time::Duration::from_secs(
                u64::from(config.scheduler.task_retention_hours) * 3600,
            )),
            notify_router: NotifyRouter::from_env(),
            broadcaster: ProgressBroadcaster::new(),
            metrics: SchedulerMetrics::new(),
            config,
        });

        let worker_count = inner.config.scheduler.max_concurrent_tasks.max(1);
        let (tx, rx) = mpsc::channel::<Uuid>(worker_count * 4);
        let rx = Arc::new(AsyncMutex::new(rx));

        for _ in 0..worker_count {
            let inner = inner.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    match next {
                        Some(task_id) => worker::run_task(inner.clone(), task_id).await,
                        None => break,
                    }
                }
            });
        }

        let scheduler = Self { inner, tx };
        scheduler.recover_on_boot().await?;
        Ok(scheduler)
    }

    async fn recover_on_boot(&self) -> Result<(), VedfolnirError> {
        let recovered = self.inner.store.reconcile_running_tasks_on_boot().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "requeued tasks left running by a crashed process");
        }
        for task in self.inner.store.list_active_tasks().await? {
            if task.status == vedfolnir_common::types::TaskStatus::Queued {
                let _ = self.tx.send(task.id).await;
            }
        }
        Ok(())
    }

    /// Validates settings against the configured ceiling, persists a new
    /// `queued` row, and hands its id to the worker pool. Enqueueing twice
    /// for the same user while one task is still active is rejected by the
    /// store's partial unique index enforcing one active task per user.
    pub async fn enqueue(
        &self,
        user_id: Uuid,
        platform_connection_id: Uuid,
        settings: CaptionGenerationSettings,
    ) -> Result<CaptionGenerationTask, VedfolnirError> {
        settings
            .validate(self.inner.config.caption.max_posts_per_run_ceiling)
            .map_err(VedfolnirError::Validation)?;

        // Fails fast if the connection doesn't belong to this user or isn't active.
        self.inner.store.switch_platform(user_id, platform_connection_id).await?;

        let task_id = new_task_id();
        let task = self
            .inner
            .store
            .enqueue_task(task_id, user_id, platform_connection_id, &settings)
            .await?;

        self.tx
            .send(task.id)
            .await
            .map_err(|_| VedfolnirError::Resource("scheduler worker pool is not accepting tasks".into()))?;

        Ok(task)
    }

    pub async fn status(&self, task_id: Uuid) -> Result<Option<CaptionGenerationTask>, VedfolnirError> {
        self.inner.store.get_task(task_id).await
    }

    pub async fn results(&self, task_id: Uuid) -> Result<Option<GenerationResults>, VedfolnirError> {
        Ok(self.inner.store.get_task(task_id).await?.and_then(|task| task.results))
    }

    /// Requests cooperative cancellation. Returns `false` if the task is
    /// already in a terminal state or doesn't exist for this requester.
    pub async fn cancel(&self, task_id: Uuid, requester_id: Uuid) -> Result<bool, VedfolnirError> {
        self.inner.store.request_cancellation(task_id, requester_id).await
    }

    /// Subscribes to a task's progress stream; the returned
    /// stream ends when the task reaches a terminal state or this
    /// `subscriber_id` resubscribes elsewhere.
    pub fn subscribe(&self, task_id: Uuid, subscriber_id: Uuid) -> impl Stream<Item = ProgressEvent> {
        self.inner.broadcaster.subscribe(task_id, subscriber_id)
    }

    pub fn metrics(&self) -> SchedulerMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn error_tracker(&self) -> &ErrorTracker {
        &self.inner.error_tracker
    }

    // ---- Admin supervision ----

    pub async fn list_active(&self) -> Result<Vec<CaptionGenerationTask>, VedfolnirError> {
        self.inner.store.list_active_tasks().await
    }

    pub async fn user_history(&self, user_id: Uuid) -> Result<Vec<CaptionGenerationTask>, VedfolnirError> {
        self.inner.store.list_tasks_for_user(user_id).await
    }

    /// Admin-initiated cancellation of any task, bypassing ownership checks.
    pub async fn cancel_any(&self, task_id: Uuid, _admin_id: Uuid) -> Result<bool, VedfolnirError> {
        self.inner.store.request_cancellation_as_admin(task_id).await
    }

    pub async fn cleanup_terminal_older_than(&self, hours: i64) -> Result<u64, VedfolnirError> {
        self.inner.store.cleanup_terminal_tasks_older_than(hours).await
    }

    // ---- Review decisions ----

    /// Applies a reviewer's decision to one image and, on approval, writes
    /// the final caption back to the originating platform post. Unlike
    /// caption generation this runs outside the worker pool: it's a single
    /// bounded HTTP call rather than a paginated crawl, so it doesn't need
    /// a queue slot.
    pub async fn apply_review(&self, request: ReviewRequest) -> Result<Image, VedfolnirError> {
        let image = self
            .inner
            .store
            .get_image(request.image_id)
            .await?
            .ok_or_else(|| VedfolnirError::Validation("unknown image".into()))?;

        let (new_status, reviewed_caption, final_caption): (ImageStatus, Option<String>, Option<String>) =
            match request.decision {
                ReviewDecision::Approve => (
                    ImageStatus::Approved,
                    None,
                    Some(image.generated_caption.clone().unwrap_or_default()),
                ),
                ReviewDecision::Edit => (ImageStatus::Approved, request.new_caption.clone(), request.new_caption.clone()),
                ReviewDecision::Reject => (ImageStatus::Rejected, None, None),
            };

        self.inner
            .store
            .apply_review_decision(
                request.image_id,
                new_status,
                reviewed_caption.as_deref(),
                final_caption.as_deref(),
                request.notes.as_deref(),
            )
            .await?;

        if new_status == ImageStatus::Approved {
            let caption = final_caption.unwrap_or_default();
            self.write_back_to_platform(&image, &caption).await?;
            self.inner
                .store
                .apply_review_decision(request.image_id, ImageStatus::Posted, None, None, None)
                .await?;
        }

        self.inner
            .store
            .get_image(request.image_id)
            .await?
            .ok_or(VedfolnirError::DetachedInstance { entity: "image", id: request.image_id })
    }

    async fn write_back_to_platform(&self, image: &Image, caption: &str) -> Result<(), VedfolnirError> {
        let connection = self
            .inner
            .store
            .get_platform_connection(image.platform_connection_id)
            .await?
            .ok_or_else(|| VedfolnirError::Validation("platform connection no longer exists".into()))?;

        let credentials: PlatformCredentials = decrypt_credentials(&self.inner, &connection)?;
        let adapter = self
            .inner
            .registry
            .adapter_for(&connection, &credentials)
            .map_err(|e| VedfolnirError::Platform { status: None, message: e.to_string() })?;

        self.inner.rate_limiter.acquire(connection.platform_type, EndpointFamily::Media).await;

        self.inner
            .retry_policy
            .run(
                &self.inner.retry_stats,
                |e: &vedfolnir_platforms::error::PlatformError| e.is_retryable(),
                |_| None,
                |_attempt| adapter.update_media_caption(&image.platform_media_id, caption),
            )
            .await
            .map_err(|e| VedfolnirError::Platform { status: None, message: e.to_string() })?;

        Ok(())
    }
}
