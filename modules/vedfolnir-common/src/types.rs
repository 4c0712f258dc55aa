use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's role, coarsest-grained first. `Admin` and `Moderator` can act on
/// other users' tasks; `Reviewer` can approve/reject captions; `Viewer` is
/// read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Moderator,
    Reviewer,
    Viewer,
}

impl UserRole {
    pub fn can_act_on_others_tasks(self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Moderator)
    }
}

/// Identity row. Authentication itself (password hashing, sessions) is
/// owned by the external auth caller; the core only ever receives an
/// already-authenticated `UserId` + `Role`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlatformType {
    Pixelfed,
    Mastodon,
    Pleroma,
}

impl std::fmt::Display for PlatformType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlatformType::Pixelfed => "pixelfed",
            PlatformType::Mastodon => "mastodon",
            PlatformType::Pleroma => "pleroma",
        };
        write!(f, "{s}")
    }
}

/// A user's authorised access to one federated instance. Credentials are
/// always encrypted at rest; this struct holds ciphertext, never plaintext
/// — decryption happens inside the Platform Context's config builder,
/// scoped to the duration of one worker's session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConnection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub platform_type: PlatformType,
    pub instance_url: String,
    pub username: String,
    /// AEAD ciphertext; associated data binds it to `id` to prevent row-swap.
    pub access_token_ciphertext: Vec<u8>,
    pub client_key_ciphertext: Option<Vec<u8>>,
    pub client_secret_ciphertext: Option<Vec<u8>>,
    pub is_active: bool,
    pub is_default: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decrypted, in-memory-only credential bundle. Never serialised; produced
/// by the Platform Context's config builder and dropped at session end.
#[derive(Clone)]
pub struct PlatformCredentials {
    pub access_token: String,
    pub client_key: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub platform_connection_id: Uuid,
    /// Denormalised from the owning connection; validated equal on write.
    pub platform_type: PlatformType,
    pub instance_url: String,
    pub user_id: Uuid,
    pub platform_post_id: String,
    pub url: String,
    pub content_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// Caption generated, awaiting reviewer action. Referred to informally
    /// as "pending_review" in worker logs and progress events.
    Pending,
    Reviewed,
    Approved,
    Rejected,
    Posted,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: Uuid,
    pub post_id: Uuid,
    /// Must match `post.platform_connection_id`.
    pub platform_connection_id: Uuid,
    pub source_url: String,
    pub content_path: String,
    pub media_type: String,
    pub attachment_index: i32,
    pub platform_media_id: String,
    pub original_caption: Option<String>,
    pub generated_caption: Option<String>,
    pub reviewed_caption: Option<String>,
    pub final_caption: Option<String>,
    pub quality_score: Option<i16>,
    pub prompt_used: Option<String>,
    pub status: ImageStatus,
    pub reviewer_notes: Option<String>,
    pub processing_error: Option<String>,
    pub needs_special_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reviewer's decision on one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
    Edit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub image_id: Uuid,
    pub requester_id: Uuid,
    pub decision: ReviewDecision,
    pub new_caption: Option<String>,
    pub notes: Option<String>,
}

/// Aggregate of one scheduler execution, grouping images for batch review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRun {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub platform_connection_id: Uuid,
    pub task_id: Uuid,
    pub posts_processed: i32,
    pub images_processed: i32,
    pub captions_generated: i32,
    pub errors: i32,
    pub retry_count: i32,
    pub total_wait_ms: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_cancellable(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

/// Per-run tuning, validated against configured bounds on submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionGenerationSettings {
    pub max_posts_per_run: u32,
    pub max_caption_length: u32,
    pub optimal_min_length: u32,
    pub optimal_max_length: u32,
    pub reprocess_existing: bool,
    pub processing_delay_ms: u64,
}

impl CaptionGenerationSettings {
    pub fn validate(&self, ceiling: u32) -> Result<(), String> {
        if self.max_posts_per_run < 1 || self.max_posts_per_run > ceiling {
            return Err(format!(
                "max_posts_per_run must be in [1, {ceiling}], got {}",
                self.max_posts_per_run
            ));
        }
        if self.optimal_min_length == 0 || self.optimal_min_length > self.optimal_max_length {
            return Err("optimal_min_length must be positive and <= optimal_max_length".into());
        }
        if self.optimal_max_length > self.max_caption_length {
            return Err("optimal_max_length must not exceed max_caption_length".into());
        }
        Ok(())
    }
}

/// Per-image outcome summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSummary {
    pub image_id: Uuid,
    pub status: ImageStatus,
    pub caption: Option<String>,
    pub quality_score: Option<i16>,
    pub needs_special_review: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResults {
    pub posts_processed: u32,
    pub images_processed: u32,
    pub captions_generated: u32,
    pub errors: u32,
    pub images: Vec<ImageSummary>,
}

/// The scheduler's unit of work. The id is a
/// cryptographically-generated opaque token, not a sequential identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionGenerationTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub platform_connection_id: Uuid,
    pub status: TaskStatus,
    pub settings: CaptionGenerationSettings,
    pub results: Option<GenerationResults>,
    pub progress_percent: u8,
    pub current_step: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancel_requested_at: Option<DateTime<Utc>>,
}

/// Per (user, platform_connection) generation tuning defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: Uuid,
    pub platform_connection_id: Uuid,
    pub max_posts_per_run: u32,
    pub max_caption_length: u32,
    pub optimal_min_length: u32,
    pub optimal_max_length: u32,
    pub reprocess_existing: bool,
    pub processing_delay_ms: u64,
}

impl From<UserSettings> for CaptionGenerationSettings {
    fn from(s: UserSettings) -> Self {
        CaptionGenerationSettings {
            max_posts_per_run: s.max_posts_per_run,
            max_caption_length: s.max_caption_length,
            optimal_min_length: s.optimal_min_length,
            optimal_max_length: s.optimal_max_length,
            reprocess_existing: s.reprocess_existing,
            processing_delay_ms: s.processing_delay_ms,
        }
    }
}

/// A progress event published at every worker boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: Uuid,
    pub current_step: String,
    pub progress_percent: u8,
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_transitions_are_terminal_correctly() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn only_queued_and_running_are_cancellable() {
        assert!(TaskStatus::Queued.is_cancellable());
        assert!(TaskStatus::Running.is_cancellable());
        assert!(!TaskStatus::Completed.is_cancellable());
        assert!(!TaskStatus::Cancelled.is_cancellable());
    }

    #[test]
    fn settings_validate_rejects_out_of_bound_post_count() {
        let settings = CaptionGenerationSettings {
            max_posts_per_run: 500,
            max_caption_length: 500,
            optimal_min_length: 20,
            optimal_max_length: 200,
            reprocess_existing: false,
            processing_delay_ms: 0,
        };
        assert!(settings.validate(100).is_err());
    }

    #[test]
    fn settings_validate_rejects_inverted_length_band() {
        let settings = CaptionGenerationSettings {
            max_posts_per_run: 10,
            max_caption_length: 500,
            optimal_min_length: 200,
            optimal_max_length: 20,
            reprocess_existing: false,
            processing_delay_ms: 0,
        };
        assert!(settings.validate(100).is_err());
    }
}
