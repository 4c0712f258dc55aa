use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, VisionError};

#[derive(Debug, Clone)]
pub struct VisionClientConfig {
    pub endpoint: String,
    pub request_timeout: Duration,
}

impl Default for VisionClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/generate".to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: &'a [String],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for an Ollama-compatible `/api/generate` vision endpoint.
pub struct VisionClient {
    http: reqwest::Client,
    config: VisionClientConfig,
}

impl VisionClient {
    pub fn new(config: VisionClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client build");
        Self { http, config }
    }

    /// Generate a caption for a single base64-encoded image using `model`,
    /// prompted with `prompt`. Returns the raw `response` text; callers
    /// (`vedfolnir-caption`) are responsible for quality scoring.
    pub async fn generate(&self, model: &str, prompt: &str, image_b64: &str) -> Result<String> {
        let images = [image_b64.to_string()];
        let request = GenerateRequest {
            model,
            prompt,
            images: &images,
            stream: false,
        };

        debug!(model, endpoint = %self.config.endpoint, "generating caption");

        let response = self
            .http
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::BadStatus { status, body });
        }

        let parsed: GenerateResponse = response.json().await?;
        let text = parsed.response.trim().to_string();
        if text.is_empty() {
            return Err(VisionError::EmptyResponse);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_local_ollama() {
        let config = VisionClientConfig::default();
        assert!(config.endpoint.contains("11434"));
    }
}
