use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Failure taxonomy, determined by exception type + message
/// patterns + context (see `classify.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    Platform,
    Resource,
    Validation,
    Network,
    System,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 7] = [
        ErrorCategory::Authentication,
        ErrorCategory::Platform,
        ErrorCategory::Resource,
        ErrorCategory::Validation,
        ErrorCategory::Network,
        ErrorCategory::System,
        ErrorCategory::Unknown,
    ];
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Platform => "platform",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Network => "network",
            ErrorCategory::System => "system",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// The recovery action Error Recovery picks for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    FailFast { notify_admin: bool },
    RetryWithBackoff { notify_admin_on_exhaustion: bool, longer_backoff: bool },
    NotifyAdminAndFail,
    ConservativeRetryOnce,
}

/// Fixed strategy-per-category table.
pub fn strategy_for(category: ErrorCategory) -> RecoveryStrategy {
    match category {
        ErrorCategory::Authentication => RecoveryStrategy::FailFast { notify_admin: true },
        ErrorCategory::Platform => RecoveryStrategy::RetryWithBackoff {
            notify_admin_on_exhaustion: true,
            longer_backoff: false,
        },
        ErrorCategory::Resource => RecoveryStrategy::RetryWithBackoff {
            notify_admin_on_exhaustion: true,
            longer_backoff: true,
        },
        ErrorCategory::Validation => RecoveryStrategy::FailFast { notify_admin: false },
        ErrorCategory::Network => RecoveryStrategy::RetryWithBackoff {
            notify_admin_on_exhaustion: false,
            longer_backoff: false,
        },
        ErrorCategory::System => RecoveryStrategy::NotifyAdminAndFail,
        ErrorCategory::Unknown => RecoveryStrategy::ConservativeRetryOnce,
    }
}

/// One ring-buffer entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedError {
    pub category: ErrorCategory,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// An admin-facing notification with read/unread state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminNotification {
    pub id: Uuid,
    pub category: ErrorCategory,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_table_matches_spec() {
        assert_eq!(
            strategy_for(ErrorCategory::Authentication),
            RecoveryStrategy::FailFast { notify_admin: true }
        );
        assert_eq!(
            strategy_for(ErrorCategory::Validation),
            RecoveryStrategy::FailFast { notify_admin: false }
        );
        assert_eq!(strategy_for(ErrorCategory::System), RecoveryStrategy::NotifyAdminAndFail);
        assert_eq!(
            strategy_for(ErrorCategory::Unknown),
            RecoveryStrategy::ConservativeRetryOnce
        );
    }
}
