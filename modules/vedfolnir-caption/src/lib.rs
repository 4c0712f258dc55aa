//! Quality-scored caption generation with a three-rung fallback ladder
//!, built on top of `vision-client`'s thin HTTP layer.

pub mod error;
pub mod fallback;
pub mod prompts;
pub mod quality;

pub use error::{CaptionError, Result};
pub use fallback::{CaptionOutcome, FallbackConfig, FallbackLadder, FallbackStats, FallbackStatsSnapshot, PromptRung};
pub use prompts::ImageCategory;
pub use quality::{QualityAssessor, QualityLevel, QualityScore, QualityWeights};
