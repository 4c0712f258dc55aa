//! Admin-facing scheduler metrics:
//! queue depth, active worker count, and rolling completion statistics.
//! Counters only; durable history lives in the `caption_generation_tasks`
//! table and is queried directly when needed.

use std::sync::atomic::{AtomicU64, Ordering};

use vedfolnir_common::types::TaskStatus;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerMetricsSnapshot {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub currently_running: u64,
    pub total_runtime_ms: u64,
    pub average_runtime_ms: u64,
}

#[derive(Default)]
pub struct SchedulerMetrics {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    currently_running: AtomicU64,
    total_runtime_ms: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.currently_running.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a task reaching a terminal state, `runtime_ms` after the
    /// `started` bump it corresponds to.
    pub fn task_finished(&self, status: TaskStatus, runtime_ms: u64) {
        self.currently_running.fetch_sub(1, Ordering::Relaxed);
        self.total_runtime_ms.fetch_add(runtime_ms, Ordering::Relaxed);
        match status {
            TaskStatus::Completed => self.completed.fetch_add(1, Ordering::Relaxed),
            TaskStatus::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
            TaskStatus::Cancelled => self.cancelled.fetch_add(1, Ordering::Relaxed),
            TaskStatus::Queued | TaskStatus::Running => {
                unreachable!("task_finished called with a non-terminal status")
            }
        };
    }

    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let cancelled = self.cancelled.load(Ordering::Relaxed);
        let total_runtime_ms = self.total_runtime_ms.load(Ordering::Relaxed);
        let finished = completed + failed + cancelled;
        SchedulerMetricsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            completed,
            failed,
            cancelled,
            currently_running: self.currently_running.load(Ordering::Relaxed),
            total_runtime_ms,
            average_runtime_ms: if finished == 0 { 0 } else { total_runtime_ms / finished },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_running_count_and_average_runtime() {
        let metrics = SchedulerMetrics::new();
        metrics.task_started();
        metrics.task_started();
        assert_eq!(metrics.snapshot().currently_running, 2);

        metrics.task_finished(TaskStatus::Completed, 1000);
        metrics.task_finished(TaskStatus::Failed, 3000);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.currently_running, 0);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.average_runtime_ms, 2000);
    }
}
