use async_trait::async_trait;

use crate::types::AdminNotification;

/// A destination for admin notifications raised by Error Recovery.
#[async_trait]
pub trait NotifyBackend: Send + Sync {
    async fn send(&self, notification: &AdminNotification);
}
