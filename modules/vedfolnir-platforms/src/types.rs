use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalised attachment shape, decoupling downstream code
/// from per-platform media representations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedAttachment {
    pub id: String,
    pub url: String,
    pub media_type: String,
    pub alt_text: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl NormalizedAttachment {
    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    /// True when alt text is absent, or whitespace/emoji-only.
    pub fn needs_caption(&self) -> bool {
        self.is_image()
            && match &self.alt_text {
                None => true,
                Some(text) => crate::alt_text::is_meaningless(text),
            }
    }
}

/// Normalised post shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedPost {
    pub id: String,
    pub url: String,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub attachments: Vec<NormalizedAttachment>,
}

impl NormalizedPost {
    pub fn images_needing_captions(&self) -> Vec<&NormalizedAttachment> {
        self.attachments.iter().filter(|a| a.needs_caption()).collect()
    }
}

/// Whole-post update payload, used by
/// platforms with no per-media caption endpoint.
#[derive(Debug, Clone)]
pub struct PostUpdate {
    pub status_text: String,
    pub media_descriptions: Vec<(String, String)>,
}

/// Parsed rate-limit headers from a platform response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}
