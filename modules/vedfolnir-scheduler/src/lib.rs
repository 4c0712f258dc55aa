//! Bounded worker-pool task scheduler and progress broadcaster.
//! `Scheduler` is the crate's public surface; everything else is an
//! implementation detail it composes.

mod broadcast;
mod ids;
mod metrics;
mod scheduler;
mod worker;

pub use ids::new_task_id;
pub use metrics::{SchedulerMetrics, SchedulerMetricsSnapshot};
pub use scheduler::{decode_encryption_key, Scheduler};
