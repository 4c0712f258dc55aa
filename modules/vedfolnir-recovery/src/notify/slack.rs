use async_trait::async_trait;

use crate::types::{AdminNotification, ErrorCategory};

use super::backend::NotifyBackend;

/// Posts admin notifications to a Slack incoming webhook.
pub struct SlackWebhook {
    webhook_url: String,
    http: reqwest::Client,
}

impl SlackWebhook {
    pub fn new(webhook_url: String) -> Self {
        Self { webhook_url, http: reqwest::Client::new() }
    }

    fn category_emoji(category: ErrorCategory) -> &'static str {
        match category {
            ErrorCategory::Authentication => ":key:",
            ErrorCategory::Platform => ":satellite:",
            ErrorCategory::Resource => ":floppy_disk:",
            ErrorCategory::Validation => ":warning:",
            ErrorCategory::Network => ":globe_with_meridians:",
            ErrorCategory::System => ":rotating_light:",
            ErrorCategory::Unknown => ":grey_question:",
        }
    }

    async fn post(&self, text: String) {
        let body = serde_json::json!({ "text": text });
        if let Err(err) = self.http.post(&self.webhook_url).json(&body).send().await {
            tracing::warn!(%err, "failed to post admin notification to slack");
        }
    }
}

#[async_trait]
impl NotifyBackend for SlackWebhook {
    async fn send(&self, notification: &AdminNotification) {
        let text = format!(
            "{} *{}* — {}",
            Self::category_emoji(notification.category),
            notification.category,
            notification.message
        );
        self.post(text).await;
    }
}
