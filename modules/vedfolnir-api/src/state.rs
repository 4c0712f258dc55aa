use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use uuid::Uuid;

use vedfolnir_common::Config;
use vedfolnir_scheduler::Scheduler;
use vedfolnir_store::{CredentialCipher, Store};

/// Shared handles every handler needs. `Scheduler` already wraps `Store`
/// internally for the task lifecycle; the API also keeps a bare `Store`
/// handle for reads/writes the scheduler doesn't front (users, platform
/// connections, settings) and its own `CredentialCipher` to encrypt
/// credentials on connection creation (the scheduler's cipher is private —
/// see `vedfolnir-scheduler/src/scheduler.rs`).
pub struct AppState {
    pub store: Store,
    pub scheduler: Scheduler,
    pub cipher: CredentialCipher,
    pub config: Config,
    pub jwt_secret: String,
    /// Subscribe attempts per subscriber in the trailing minute, for the
    /// Progress Broadcaster's per-subscriber connection rate limit.
    pub connection_attempts: Mutex<HashMap<Uuid, Vec<Instant>>>,
}

pub type SharedState = Arc<AppState>;
