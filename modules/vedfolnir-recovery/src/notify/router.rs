use std::sync::Arc;

use async_trait::async_trait;

use crate::types::AdminNotification;

use super::backend::NotifyBackend;
use super::noop::NoopBackend;
use super::slack::SlackWebhook;

/// Routes admin notifications to a single configured backend.
///
/// Built from `SLACK_WEBHOOK_URL` when present, falling back to [`NoopBackend`]
/// so a deployment without Slack configured still runs without error.
pub struct NotifyRouter {
    backend: Arc<dyn NotifyBackend>,
}

impl NotifyRouter {
    pub fn from_env() -> Self {
        let backend: Arc<dyn NotifyBackend> = match std::env::var("SLACK_WEBHOOK_URL") {
            Ok(url) if !url.trim().is_empty() => Arc::new(SlackWebhook::new(url)),
            _ => Arc::new(NoopBackend),
        };
        Self { backend }
    }

    pub fn new(backend: Arc<dyn NotifyBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl NotifyBackend for NotifyRouter {
    async fn send(&self, notification: &AdminNotification) {
        self.backend.send(notification).await;
    }
}
