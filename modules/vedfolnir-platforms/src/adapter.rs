use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use vedfolnir_common::types::PlatformType;

use crate::error::Result;
use crate::types::{NormalizedPost, PostUpdate, RateLimitInfo};

/// A lazy, newest-first, paginated sequence of posts. Built with `async-stream` in each adapter so
/// pagination cursors are advanced only as the caller actually consumes
/// items, stopping at `limit` or exhaustion without materialising whole
/// pages into a `Vec`.
pub type PostStream = Pin<Box<dyn Stream<Item = Result<NormalizedPost>> + Send>>;

/// Capability set a federated platform must implement.
/// Implementors own their own `reqwest::Client` (shared/pooled by the
/// caller) and a `RateLimiter` handle; every HTTP call acquires a token
/// before sending and is wrapped in `RetryPolicy::run` by the caller
/// (`vedfolnir-scheduler`), not internally — this keeps the adapter itself
/// a thin, directly-testable HTTP mapping layer.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform_type(&self) -> PlatformType;

    /// Validates credentials via a lightweight identity probe. Fails with
    /// `PlatformError::Authentication` on an invalid token — never retried.
    async fn authenticate(&self) -> Result<()>;

    /// Newest-first paginated posts for the authenticated user, stopping
    /// at `limit` or pagination exhaustion.
    fn list_user_posts(&self, limit: usize) -> PostStream;

    async fn get_post(&self, post_id: &str) -> Result<NormalizedPost>;

    /// Writes alt-text. Platform-specific semantics: Pixelfed PUTs directly
    /// on the media id; Mastodon/Pleroma resolve the owning status and
    /// re-send the full media list (see each adapter's module docs).
    async fn update_media_caption(&self, media_id: &str, caption: &str) -> Result<()>;

    /// Whole-post update, used by platforms with no per-media endpoint.
    async fn update_post(&self, post_id: &str, updated: PostUpdate) -> Result<()>;

    fn rate_limit_info(&self, headers: &reqwest::header::HeaderMap) -> Option<RateLimitInfo>;
}
