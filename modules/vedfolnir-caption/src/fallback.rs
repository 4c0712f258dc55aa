//! Three-rung fallback ladder: primary attempt, a simpler
//! prompt on the same model, then the simplest prompt on a backup model,
//! with per-reason counters exposed for the admin-facing statistics
//! surface.

use std::sync::atomic::{AtomicU64, Ordering};

use vision_client::VisionClient;

use crate::error::Result;
use crate::prompts::ImageCategory;
use crate::quality::{QualityAssessor, QualityLevel, QualityScore};

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub quality_threshold: u8,
    pub simplified_prompts_enabled: bool,
    pub backup_model: Option<String>,
    pub backup_model_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct CaptionOutcome {
    pub caption: String,
    pub quality: QualityScore,
    pub model_used: String,
    pub prompt_rung: PromptRung,
    pub needs_special_review: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRung {
    Primary,
    SimplifiedSameModel,
    SimplestBackupModel,
}

/// Per-reason attempt counters (`primary_failed_quality`,
/// `fallback_1_failed_quality`, `fallback_2_success`, etc.) for diagnosing
/// which rung of the fallback ladder is actually getting used.
#[derive(Default)]
pub struct FallbackStats {
    primary_success: AtomicU64,
    primary_failed_call: AtomicU64,
    primary_failed_quality: AtomicU64,
    fallback_1_success: AtomicU64,
    fallback_1_failed_call: AtomicU64,
    fallback_1_failed_quality: AtomicU64,
    fallback_2_success: AtomicU64,
    fallback_2_failed_call: AtomicU64,
    fallback_2_failed_quality: AtomicU64,
    exhausted: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct FallbackStatsSnapshot {
    pub primary_success: u64,
    pub primary_failed_call: u64,
    pub primary_failed_quality: u64,
    pub fallback_1_success: u64,
    pub fallback_1_failed_call: u64,
    pub fallback_1_failed_quality: u64,
    pub fallback_2_success: u64,
    pub fallback_2_failed_call: u64,
    pub fallback_2_failed_quality: u64,
    pub exhausted: u64,
}

impl FallbackStats {
    pub fn snapshot(&self) -> FallbackStatsSnapshot {
        FallbackStatsSnapshot {
            primary_success: self.primary_success.load(Ordering::Relaxed),
            primary_failed_call: self.primary_failed_call.load(Ordering::Relaxed),
            primary_failed_quality: self.primary_failed_quality.load(Ordering::Relaxed),
            fallback_1_success: self.fallback_1_success.load(Ordering::Relaxed),
            fallback_1_failed_call: self.fallback_1_failed_call.load(Ordering::Relaxed),
            fallback_1_failed_quality: self.fallback_1_failed_quality.load(Ordering::Relaxed),
            fallback_2_success: self.fallback_2_success.load(Ordering::Relaxed),
            fallback_2_failed_call: self.fallback_2_failed_call.load(Ordering::Relaxed),
            fallback_2_failed_quality: self.fallback_2_failed_quality.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

pub struct FallbackLadder<'a> {
    client: &'a VisionClient,
    assessor: &'a QualityAssessor,
    config: FallbackConfig,
    primary_model: String,
}

struct Attempt {
    caption: String,
    quality: QualityScore,
    model_used: String,
}

impl<'a> FallbackLadder<'a> {
    pub fn new(
        client: &'a VisionClient,
        assessor: &'a QualityAssessor,
        config: FallbackConfig,
        primary_model: String,
    ) -> Self {
        Self {
            client,
            assessor,
            config,
            primary_model,
        }
    }

    /// Runs the ladder for one image, stopping at the first rung whose
    /// caption clears `quality_threshold`, or exhausting all configured
    /// rungs and returning the last result with `needs_special_review`
    /// set.
    pub async fn run(
        &self,
        stats: &FallbackStats,
        category: ImageCategory,
        image_b64: &str,
        optimal_min: u32,
        optimal_max: u32,
    ) -> Result<CaptionOutcome> {
        let mut last: Option<(Attempt, PromptRung)> = None;

        if let Some(attempt) = self
            .try_rung(&self.primary_model, category.primary_prompt(), image_b64, optimal_min, optimal_max)
            .await?
        {
            if attempt.quality.overall >= self.config.quality_threshold {
                stats.primary_success.fetch_add(1, Ordering::Relaxed);
                return Ok(self.finish(attempt, PromptRung::Primary, false));
            }
            stats.primary_failed_quality.fetch_add(1, Ordering::Relaxed);
            last = Some((attempt, PromptRung::Primary));
        } else {
            stats.primary_failed_call.fetch_add(1, Ordering::Relaxed);
        }

        if !self.config.enabled {
            return self.exhaust(stats, last);
        }

        if self.config.max_attempts >= 1 && self.config.simplified_prompts_enabled {
            if let Some(attempt) = self
                .try_rung(
                    &self.primary_model,
                    category.simplified_prompt(),
                    image_b64,
                    optimal_min,
                    optimal_max,
                )
                .await?
            {
                if attempt.quality.overall >= self.config.quality_threshold {
                    stats.fallback_1_success.fetch_add(1, Ordering::Relaxed);
                    return Ok(self.finish(attempt, PromptRung::SimplifiedSameModel, false));
                }
                stats.fallback_1_failed_quality.fetch_add(1, Ordering::Relaxed);
                last = Some((attempt, PromptRung::SimplifiedSameModel));
            } else {
                stats.fallback_1_failed_call.fetch_add(1, Ordering::Relaxed);
            }
        }

        if self.config.max_attempts >= 2 && self.config.backup_model_enabled {
            if let Some(backup_model) = &self.config.backup_model {
                if backup_model != &self.primary_model {
                    if let Some(attempt) = self
                        .try_rung(backup_model, category.simplest_prompt(), image_b64, optimal_min, optimal_max)
                        .await?
                    {
                        if attempt.quality.overall >= self.config.quality_threshold {
                            stats.fallback_2_success.fetch_add(1, Ordering::Relaxed);
                            return Ok(self.finish(attempt, PromptRung::SimplestBackupModel, false));
                        }
                        stats.fallback_2_failed_quality.fetch_add(1, Ordering::Relaxed);
                        last = Some((attempt, PromptRung::SimplestBackupModel));
                    } else {
                        stats.fallback_2_failed_call.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        self.exhaust(stats, last)
    }

    async fn try_rung(
        &self,
        model: &str,
        prompt: &str,
        image_b64: &str,
        optimal_min: u32,
        optimal_max: u32,
    ) -> Result<Option<Attempt>> {
        match self.client.generate(model, prompt, image_b64).await {
            Ok(caption) => {
                let quality = self.assessor.score(&caption, optimal_min, optimal_max);
                Ok(Some(Attempt {
                    caption,
                    quality,
                    model_used: model.to_string(),
                }))
            }
            Err(err) => {
                tracing::warn!(model, error = %err, "vision model call failed");
                Ok(None)
            }
        }
    }

    fn finish(&self, attempt: Attempt, rung: PromptRung, needs_special_review: bool) -> CaptionOutcome {
        CaptionOutcome {
            caption: attempt.caption,
            quality: attempt.quality,
            model_used: attempt.model_used,
            prompt_rung: rung,
            needs_special_review,
        }
    }

    /// Ladder exhausted: returns the last available result flagged for
    /// manual review, or an error-level empty result if every call failed
    /// outright.
    fn exhaust(&self, stats: &FallbackStats, last: Option<(Attempt, PromptRung)>) -> Result<CaptionOutcome> {
        stats.exhausted.fetch_add(1, Ordering::Relaxed);
        match last {
            Some((attempt, rung)) => Ok(self.finish(attempt, rung, true)),
            None => Ok(CaptionOutcome {
                caption: String::new(),
                quality: QualityScore {
                    overall: 0,
                    level: QualityLevel::Poor,
                },
                model_used: self.primary_model.clone(),
                prompt_rung: PromptRung::Primary,
                needs_special_review: true,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_client::{VisionClient, VisionClientConfig};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> VisionClient {
        VisionClient::new(VisionClientConfig {
            endpoint: format!("{}/api/generate", server.uri()),
            request_timeout: std::time::Duration::from_secs(5),
        })
    }

    async fn respond_with(server: &MockServer, prompt_fragment: &str, response: &str) {
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_string_contains(prompt_fragment))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": response,
            })))
            .mount(server)
            .await;
    }

    fn enabled_config(backup_model: Option<&str>) -> FallbackConfig {
        FallbackConfig {
            enabled: true,
            max_attempts: 2,
            quality_threshold: 60,
            simplified_prompts_enabled: true,
            backup_model: backup_model.map(str::to_string),
            backup_model_enabled: backup_model.is_some(),
        }
    }

    /// Mirrors the end-to-end fallback scenario: a refused primary caption
    /// falls through a too-short simplified attempt to a backup-model
    /// success, with `needs_special_review=false` and every rung's counter
    /// incremented exactly once.
    #[tokio::test]
    async fn ladder_escalates_through_all_three_rungs_to_success() {
        let server = MockServer::start().await;
        respond_with(&server, "one or two clear", "I cannot describe this image.").await;
        respond_with(&server, "Briefly describe", "A cat.").await;
        respond_with(&server, "few words", "A black cat sitting on a wooden table.").await;

        let client = client_for(&server);
        let assessor = QualityAssessor::default();
        let config = enabled_config(Some("backup-model"));
        let ladder = FallbackLadder::new(&client, &assessor, config, "primary-model".to_string());
        let stats = FallbackStats::default();

        let outcome = ladder
            .run(&stats, ImageCategory::Generic, "base64bytes", 20, 200)
            .await
            .unwrap();

        assert_eq!(outcome.caption, "A black cat sitting on a wooden table.");
        assert_eq!(outcome.model_used, "backup-model");
        assert_eq!(outcome.prompt_rung, PromptRung::SimplestBackupModel);
        assert!(!outcome.needs_special_review);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.primary_failed_quality, 1);
        assert_eq!(snapshot.fallback_1_failed_quality, 1);
        assert_eq!(snapshot.fallback_2_success, 1);
        assert_eq!(snapshot.exhausted, 0);
    }

    /// A good-enough primary caption short-circuits the ladder: no
    /// fallback rung is ever called, and only the primary counter moves.
    #[tokio::test]
    async fn good_primary_caption_short_circuits_fallback() {
        let server = MockServer::start().await;
        respond_with(&server, "one or two clear", "A black cat sitting on a wooden table near a window.").await;

        let client = client_for(&server);
        let assessor = QualityAssessor::default();
        let config = enabled_config(Some("backup-model"));
        let ladder = FallbackLadder::new(&client, &assessor, config, "primary-model".to_string());
        let stats = FallbackStats::default();

        let outcome = ladder
            .run(&stats, ImageCategory::Generic, "base64bytes", 20, 200)
            .await
            .unwrap();

        assert_eq!(outcome.prompt_rung, PromptRung::Primary);
        assert!(!outcome.needs_special_review);
        assert_eq!(stats.snapshot().primary_success, 1);
        assert_eq!(stats.snapshot().fallback_1_success, 0);
    }

    /// Every rung fails quality and no backup model is configured: the
    /// ladder exhausts and flags the last (simplified) attempt for manual
    /// review rather than erroring out.
    #[tokio::test]
    async fn exhaustion_without_backup_model_flags_last_attempt() {
        let server = MockServer::start().await;
        respond_with(&server, "one or two clear", "I cannot describe this image.").await;
        respond_with(&server, "Briefly describe", "A cat.").await;

        let client = client_for(&server);
        let assessor = QualityAssessor::default();
        let config = enabled_config(None);
        let ladder = FallbackLadder::new(&client, &assessor, config, "primary-model".to_string());
        let stats = FallbackStats::default();

        let outcome = ladder
            .run(&stats, ImageCategory::Generic, "base64bytes", 20, 200)
            .await
            .unwrap();

        assert_eq!(outcome.caption, "A cat.");
        assert_eq!(outcome.prompt_rung, PromptRung::SimplifiedSameModel);
        assert!(outcome.needs_special_review);
        assert_eq!(stats.snapshot().exhausted, 1);
    }

    /// `enabled=false` stops the ladder after the primary attempt even
    /// when its quality is poor, flagging it for review instead of
    /// escalating.
    #[tokio::test]
    async fn disabled_fallback_stops_after_primary() {
        let server = MockServer::start().await;
        respond_with(&server, "one or two clear", "A cat.").await;

        let client = client_for(&server);
        let assessor = QualityAssessor::default();
        let mut config = enabled_config(Some("backup-model"));
        config.enabled = false;
        let ladder = FallbackLadder::new(&client, &assessor, config, "primary-model".to_string());
        let stats = FallbackStats::default();

        let outcome = ladder
            .run(&stats, ImageCategory::Generic, "base64bytes", 20, 200)
            .await
            .unwrap();

        assert_eq!(outcome.prompt_rung, PromptRung::Primary);
        assert!(outcome.needs_special_review);
        assert_eq!(stats.snapshot().fallback_1_success, 0);
        assert_eq!(stats.snapshot().fallback_1_failed_quality, 0);
    }
}
