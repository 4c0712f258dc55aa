//! In-process bookkeeping for Error Recovery: a per-category
//! counter set, a bounded ring buffer of recent errors for diagnostics, and
//! a retained list of admin notifications with read/unread state.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::types::{AdminNotification, ErrorCategory, RecordedError};

const RING_BUFFER_CAPACITY: usize = 200;

#[derive(Debug, Default)]
struct CategoryCounters {
    occurrences: AtomicU64,
    retries: AtomicU64,
    admin_notifications: AtomicU64,
}

/// Tracks error occurrences, recent history, and admin notifications for
/// the lifetime of one scheduler process.
pub struct ErrorTracker {
    counters: HashMap<ErrorCategory, CategoryCounters>,
    recent: Mutex<VecDeque<RecordedError>>,
    notifications: Mutex<Vec<AdminNotification>>,
    notification_retention: Duration,
}

impl ErrorTracker {
    pub fn new(notification_retention: std::time::Duration) -> Self {
        let counters = ErrorCategory::ALL
            .into_iter()
            .map(|category| (category, CategoryCounters::default()))
            .collect();
        Self {
            counters,
            recent: Mutex::new(VecDeque::with_capacity(RING_BUFFER_CAPACITY)),
            notifications: Mutex::new(Vec::new()),
            notification_retention: Duration::from_std(notification_retention)
                .unwrap_or_else(|_| Duration::hours(24)),
        }
    }

    /// Records one occurrence of `category`, pushing it into the ring buffer.
    pub fn record(&self, category: ErrorCategory, message: impl Into<String>) {
        self.counters[&category].occurrences.fetch_add(1, Ordering::Relaxed);
        let mut recent = self.recent.lock().expect("recent error buffer poisoned");
        if recent.len() == RING_BUFFER_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(RecordedError { category, message: message.into(), occurred_at: Utc::now() });
    }

    pub fn record_retry(&self, category: ErrorCategory) {
        self.counters[&category].retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Queues an admin notification and returns it so the caller can hand
    /// it to a `NotifyBackend`.
    pub fn notify_admin(&self, category: ErrorCategory, message: impl Into<String>) -> AdminNotification {
        self.counters[&category].admin_notifications.fetch_add(1, Ordering::Relaxed);
        let notification = AdminNotification {
            id: Uuid::new_v4(),
            category,
            message: message.into(),
            created_at: Utc::now(),
            read: false,
        };
        self.notifications
            .lock()
            .expect("notification list poisoned")
            .push(notification.clone());
        notification
    }

    pub fn mark_read(&self, id: Uuid) {
        if let Some(n) = self.notifications.lock().expect("notification list poisoned").iter_mut().find(|n| n.id == id) {
            n.read = true;
        }
    }

    /// Evicts notifications older than the configured retention window.
    pub fn evict_expired(&self) {
        let cutoff = Utc::now() - self.notification_retention;
        self.notifications.lock().expect("notification list poisoned").retain(|n| n.created_at >= cutoff);
    }

    pub fn unread_notifications(&self) -> Vec<AdminNotification> {
        self.notifications
            .lock()
            .expect("notification list poisoned")
            .iter()
            .filter(|n| !n.read)
            .cloned()
            .collect()
    }

    pub fn recent_errors(&self) -> Vec<RecordedError> {
        self.recent.lock().expect("recent error buffer poisoned").iter().cloned().collect()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let by_category = ErrorCategory::ALL
            .into_iter()
            .map(|category| {
                let counters = &self.counters[&category];
                (
                    category,
                    CategorySnapshot {
                        occurrences: counters.occurrences.load(Ordering::Relaxed),
                        retries: counters.retries.load(Ordering::Relaxed),
                        admin_notifications: counters.admin_notifications.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        TrackerSnapshot { by_category }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CategorySnapshot {
    pub occurrences: u64,
    pub retries: u64,
    pub admin_notifications: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TrackerSnapshot {
    pub by_category: HashMap<ErrorCategory, CategorySnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_increment_the_right_category_only() {
        let tracker = ErrorTracker::new(std::time::Duration::from_secs(3600));
        tracker.record(ErrorCategory::Network, "timeout");
        tracker.record(ErrorCategory::Network, "timeout again");
        tracker.record(ErrorCategory::Validation, "bad input");

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.by_category[&ErrorCategory::Network].occurrences, 2);
        assert_eq!(snapshot.by_category[&ErrorCategory::Validation].occurrences, 1);
        assert_eq!(snapshot.by_category[&ErrorCategory::System].occurrences, 0);
    }

    #[test]
    fn ring_buffer_drops_oldest_beyond_capacity() {
        let tracker = ErrorTracker::new(std::time::Duration::from_secs(3600));
        for i in 0..(RING_BUFFER_CAPACITY + 10) {
            tracker.record(ErrorCategory::Unknown, format!("error {i}"));
        }
        let recent = tracker.recent_errors();
        assert_eq!(recent.len(), RING_BUFFER_CAPACITY);
        assert_eq!(recent.front().unwrap().message, "error 10");
    }

    #[test]
    fn notifications_start_unread_and_can_be_marked_read() {
        let tracker = ErrorTracker::new(std::time::Duration::from_secs(3600));
        let n = tracker.notify_admin(ErrorCategory::System, "disk full");
        assert_eq!(tracker.unread_notifications().len(), 1);
        tracker.mark_read(n.id);
        assert_eq!(tracker.unread_notifications().len(), 0);
    }

    #[test]
    fn evict_expired_removes_old_notifications() {
        let tracker = ErrorTracker::new(std::time::Duration::from_secs(0));
        tracker.notify_admin(ErrorCategory::System, "stale");
        tracker.evict_expired();
        assert_eq!(tracker.unread_notifications().len(), 0);
    }
}
