use async_trait::async_trait;

use crate::types::AdminNotification;

use super::backend::NotifyBackend;

/// Discards notifications. The default when no webhook is configured.
pub struct NoopBackend;

#[async_trait]
impl NotifyBackend for NoopBackend {
    async fn send(&self, notification: &AdminNotification) {
        tracing::debug!(category = %notification.category, "admin notification dropped, no backend configured");
    }
}
