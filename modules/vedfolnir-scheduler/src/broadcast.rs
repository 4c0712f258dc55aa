//! Progress Broadcaster: a transport-agnostic fan-out of
//! `ProgressEvent`s, consumed by `vedfolnir-api`'s SSE and WebSocket
//! adapters. Kept separate from the worker loop so publishing a progress
//! event never depends on whether anyone is currently subscribed.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::StreamExt as _;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;
use vedfolnir_common::types::ProgressEvent;

const CHANNEL_CAPACITY: usize = 64;

type TaskSubscribers = HashMap<Uuid, broadcast::Sender<ProgressEvent>>;

/// Per-task, per-subscriber fan-out registry. A task's entry is created
/// lazily on first subscribe and removed when the task reaches a terminal
/// state, which drops every subscriber's `Sender` and closes their stream.
pub struct ProgressBroadcaster {
    subscriptions: Mutex<HashMap<Uuid, TaskSubscribers>>,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes `subscriber_id` to `task_id`'s progress events. Replacing
    /// (and thereby dropping) any `Sender` already registered for this exact
    /// `(task_id, subscriber_id)` pair is what enforces "at most one active
    /// stream per subscriber per task": the old stream's
    /// `Receiver` observes `RecvError::Closed` on its next poll.
    pub fn subscribe(&self, task_id: Uuid, subscriber_id: Uuid) -> impl futures::Stream<Item = ProgressEvent> {
        let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
        let mut subscriptions = self.subscriptions.lock().expect("broadcaster lock poisoned");
        subscriptions.entry(task_id).or_default().insert(subscriber_id, tx);
        BroadcastStream::new(rx).filter_map(|item| futures::future::ready(item.ok()))
    }

    /// Publishes `event` to every subscriber currently registered for its
    /// task. Best-effort: a subscriber with no room left in its channel
    /// (`TrySendError`/lagged) simply misses events rather than blocking the
    /// worker.
    pub fn publish(&self, event: ProgressEvent) {
        let subscriptions = self.subscriptions.lock().expect("broadcaster lock poisoned");
        if let Some(subscribers) = subscriptions.get(&event.task_id) {
            for tx in subscribers.values() {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Drops every subscriber's `Sender` for `task_id`, closing their
    /// streams, once the task reaches a terminal state.
    pub fn close_task(&self, task_id: Uuid) {
        self.subscriptions.lock().expect("broadcaster lock poisoned").remove(&task_id);
    }

    #[cfg(test)]
    fn subscriber_count(&self, task_id: Uuid) -> usize {
        self.subscriptions
            .lock()
            .expect("broadcaster lock poisoned")
            .get(&task_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(task_id: Uuid) -> ProgressEvent {
        ProgressEvent {
            task_id,
            current_step: "processing".to_string(),
            progress_percent: 50,
            details: None,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let broadcaster = ProgressBroadcaster::new();
        let task_id = Uuid::new_v4();
        let mut stream = Box::pin(broadcaster.subscribe(task_id, Uuid::new_v4()));
        broadcaster.publish(event(task_id));
        let received = stream.next().await.unwrap();
        assert_eq!(received.task_id, task_id);
    }

    #[tokio::test]
    async fn resubscribing_same_subscriber_closes_previous_stream() {
        let broadcaster = ProgressBroadcaster::new();
        let task_id = Uuid::new_v4();
        let subscriber_id = Uuid::new_v4();
        let mut first = Box::pin(broadcaster.subscribe(task_id, subscriber_id));
        let _second = broadcaster.subscribe(task_id, subscriber_id);
        assert_eq!(broadcaster.subscriber_count(task_id), 1);
        broadcaster.publish(event(task_id));
        assert!(first.next().await.is_none());
    }

    #[tokio::test]
    async fn close_task_ends_all_subscriber_streams() {
        let broadcaster = ProgressBroadcaster::new();
        let task_id = Uuid::new_v4();
        let mut stream = Box::pin(broadcaster.subscribe(task_id, Uuid::new_v4()));
        broadcaster.close_task(task_id);
        assert!(stream.next().await.is_none());
    }
}
