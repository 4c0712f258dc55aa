//! Deterministic, unit-testable caption quality scoring.
//! Weights are configuration, not hardcoded, so operators can retune the
//! heuristic without a redeploy.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityLevel {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityLevel {
    fn from_score(score: u8) -> Self {
        match score {
            0..=29 => QualityLevel::Poor,
            30..=59 => QualityLevel::Fair,
            60..=84 => QualityLevel::Good,
            _ => QualityLevel::Excellent,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QualityScore {
    pub overall: u8,
    pub level: QualityLevel,
}

/// Scoring weights, expressed so the three components sum to 100 at full
/// marks. `Default` matches the source's heuristic defaults; every field is
/// reachable from `Config`.
#[derive(Debug, Clone, Copy)]
pub struct QualityWeights {
    pub length_weight: u8,
    pub content_weight: u8,
    pub clarity_weight: u8,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            length_weight: 30,
            content_weight: 50,
            clarity_weight: 20,
        }
    }
}

/// Phrases that mark a caption as meta-commentary or a refusal rather than
/// a description — an automatic, severe penalty rather than a deduction.
const META_COMMENTARY_PHRASES: &[&str] = &[
    "i cannot",
    "i can't",
    "i'm unable",
    "i am unable",
    "as an ai",
    "as a language model",
    "i don't have the ability",
    "i do not have the ability",
    "sorry, i",
    "i'm sorry",
];

/// Filler phrases that pad a caption without adding content — a smaller,
/// per-occurrence penalty.
const FILLER_PHRASES: &[&str] = &[
    "this image shows",
    "this is an image of",
    "the image depicts",
    "in this picture",
    "i can see",
];

pub struct QualityAssessor {
    weights: QualityWeights,
}

impl Default for QualityAssessor {
    fn default() -> Self {
        Self::new(QualityWeights::default())
    }
}

impl QualityAssessor {
    pub fn new(weights: QualityWeights) -> Self {
        Self { weights }
    }

    /// Scores `caption` against the configured optimal length band,
    /// filler/meta-commentary content, and a clarity heuristic, producing
    /// an overall 0-100 score.
    pub fn score(&self, caption: &str, optimal_min: u32, optimal_max: u32) -> QualityScore {
        let trimmed = caption.trim();
        if trimmed.is_empty() || contains_meta_commentary(trimmed) {
            return QualityScore {
                overall: 0,
                level: QualityLevel::Poor,
            };
        }

        let length_score = self.length_score(trimmed, optimal_min, optimal_max);
        let content_score = self.content_score(trimmed);
        let clarity_score = self.clarity_score(trimmed);

        let overall = (length_score + content_score + clarity_score).clamp(0, 100) as u8;
        QualityScore {
            overall,
            level: QualityLevel::from_score(overall),
        }
    }

    fn length_score(&self, caption: &str, optimal_min: u32, optimal_max: u32) -> u32 {
        let len = caption.chars().count() as u32;
        let max_points = self.weights.length_weight as u32;
        if len >= optimal_min && len <= optimal_max {
            return max_points;
        }
        let distance = if len < optimal_min {
            optimal_min - len
        } else {
            len - optimal_max
        };
        let band = optimal_max.saturating_sub(optimal_min).max(1);
        let ratio = 1.0 - (distance as f64 / band as f64).min(1.0);
        (max_points as f64 * ratio).round() as u32
    }

    fn content_score(&self, caption: &str) -> u32 {
        let max_points = self.weights.content_weight as u32;
        let lower = caption.to_lowercase();
        let filler_hits = FILLER_PHRASES.iter().filter(|p| lower.contains(**p)).count() as u32;
        let penalty_per_hit = max_points / 4;
        max_points.saturating_sub(filler_hits * penalty_per_hit)
    }

    fn clarity_score(&self, caption: &str) -> u32 {
        let max_points = self.weights.clarity_weight as u32;
        let sentence_count = caption
            .split(['.', '!', '?'])
            .filter(|s| !s.trim().is_empty())
            .count();
        let word_count = caption.split_whitespace().count();
        if word_count == 0 {
            return 0;
        }
        // Favor one or two complete sentences; penalize a single
        // run-on fragment or excessive fragmentation.
        match sentence_count {
            0 => max_points / 2,
            1 | 2 => max_points,
            3 => (max_points as f64 * 0.75).round() as u32,
            _ => max_points / 2,
        }
    }
}

fn contains_meta_commentary(caption: &str) -> bool {
    let lower = caption.to_lowercase();
    META_COMMENTARY_PHRASES.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_commentary_scores_zero() {
        let assessor = QualityAssessor::default();
        let score = assessor.score("I cannot describe this image.", 20, 200);
        assert_eq!(score.overall, 0);
        assert_eq!(score.level, QualityLevel::Poor);
    }

    #[test]
    fn empty_caption_scores_zero() {
        let assessor = QualityAssessor::default();
        let score = assessor.score("   ", 20, 200);
        assert_eq!(score.overall, 0);
    }

    #[test]
    fn well_formed_caption_in_band_scores_well() {
        let assessor = QualityAssessor::default();
        let score = assessor.score(
            "A black cat sitting on a wooden table near a window.",
            20,
            200,
        );
        assert!(score.overall >= 80, "expected high score, got {}", score.overall);
        assert_eq!(score.level, QualityLevel::Excellent);
    }

    #[test]
    fn too_short_caption_scores_lower_than_in_band() {
        let assessor = QualityAssessor::default();
        let short = assessor.score("A cat.", 20, 200);
        let in_band = assessor.score("A black cat sitting quietly on a table.", 20, 200);
        assert!(short.overall < in_band.overall);
    }

    #[test]
    fn filler_phrases_reduce_content_score() {
        let assessor = QualityAssessor::default();
        let with_filler = assessor.score(
            "This image shows a black cat sitting on a wooden table.",
            20,
            200,
        );
        let without = assessor.score("A black cat sitting on a wooden table.", 20, 200);
        assert!(with_filler.overall < without.overall);
    }

    #[test]
    fn quality_level_thresholds() {
        assert_eq!(QualityLevel::from_score(10), QualityLevel::Poor);
        assert_eq!(QualityLevel::from_score(40), QualityLevel::Fair);
        assert_eq!(QualityLevel::from_score(70), QualityLevel::Good);
        assert_eq!(QualityLevel::from_score(95), QualityLevel::Excellent);
    }
}
