pub mod classify;
pub mod notify;
pub mod tracker;
pub mod types;

pub use classify::{classify, classify_message};
pub use notify::{NotifyBackend, NotifyRouter};
pub use tracker::{CategorySnapshot, ErrorTracker, TrackerSnapshot};
pub use types::{AdminNotification, ErrorCategory, RecordedError, RecoveryStrategy, strategy_for};
