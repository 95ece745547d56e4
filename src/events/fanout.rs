//! Per-task fan-out of status and artifact events.
//!
//! Multiple subscribers (e.g. SSE streams) receive updates for a task while
//! the store stays the source of truth. Attach replays the current snapshot
//! under the task gate, so the replay/live boundary neither drops nor
//! duplicates an event.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::{EngineError, EngineResult};
use crate::protocol::{TaskArtifactUpdateEvent, TaskStatusUpdateEvent};
use crate::task::TaskStore;

/// Event delivered to streaming subscribers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum TaskEvent {
    StatusUpdate(TaskStatusUpdateEvent),
    ArtifactUpdate(TaskArtifactUpdateEvent),
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::StatusUpdate(update) => &update.task_id,
            Self::ArtifactUpdate(update) => &update.task_id,
        }
    }

    /// True for the terminal status event that closes the stream.
    pub fn is_final(&self) -> bool {
        match self {
            Self::StatusUpdate(update) => update.is_final,
            Self::ArtifactUpdate(_) => false,
        }
    }
}

/// Receiver half of a streaming subscription.
pub type TaskEventReceiver = mpsc::UnboundedReceiver<TaskEvent>;

/// Adapt a subscription receiver into a `Stream`, for transports that
/// forward events as SSE or websocket frames.
pub fn event_stream(
    receiver: TaskEventReceiver,
) -> tokio_stream::wrappers::UnboundedReceiverStream<TaskEvent> {
    tokio_stream::wrappers::UnboundedReceiverStream::new(receiver)
}

struct Subscriber {
    /// Opaque request correlation id; used for targeted detach.
    id: String,
    sender: mpsc::UnboundedSender<TaskEvent>,
}

/// Registry of live streaming subscriptions per task.
pub struct FanOut {
    store: Arc<TaskStore>,
    subscribers: DashMap<String, Vec<Subscriber>>,
}

impl FanOut {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self {
            store,
            subscribers: DashMap::new(),
        }
    }

    /// Register a subscription and replay the task's current state to it:
    /// every artifact added so far, then the current status. A subscriber
    /// attaching to an already-terminal task receives the replay with
    /// `final=true` and is closed immediately without being registered.
    pub async fn attach(
        &self,
        task_id: &str,
        correlation_id: impl Into<String>,
    ) -> EngineResult<TaskEventReceiver> {
        let gate = self.store.gate(task_id);
        let _guard = gate.lock().await;

        let task = self
            .store
            .get(task_id)
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        let (sender, receiver) = mpsc::unbounded_channel();
        for artifact in &task.artifacts {
            let _ = sender.send(TaskEvent::ArtifactUpdate(TaskArtifactUpdateEvent {
                task_id: task_id.to_string(),
                artifact: artifact.clone(),
            }));
        }
        let terminal = task.status.state.is_terminal();
        let _ = sender.send(TaskEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: task_id.to_string(),
            status: task.status.clone(),
            is_final: terminal,
        }));

        if !terminal {
            self.subscribers
                .entry(task_id.to_string())
                .or_default()
                .push(Subscriber {
                    id: correlation_id.into(),
                    sender,
                });
        }
        // On terminal tasks the sender drops here, closing the stream after
        // the buffered replay is consumed.

        Ok(receiver)
    }

    /// Remove one subscription. Removing the last one drops the registry
    /// entry; unknown ids are not an error.
    pub fn detach(&self, task_id: &str, correlation_id: &str) {
        if let Some(mut entry) = self.subscribers.get_mut(task_id) {
            entry.retain(|subscriber| subscriber.id != correlation_id);
            let emptied = entry.is_empty();
            drop(entry);
            if emptied {
                self.subscribers.remove(task_id);
            }
        }
    }

    /// Deliver an event to every live subscription for its task, pruning
    /// closed channels. A `final` event closes and removes every
    /// subscription after delivery.
    pub fn publish(&self, event: &TaskEvent) {
        let task_id = event.task_id().to_string();

        if let Some(mut entry) = self.subscribers.get_mut(&task_id) {
            entry.retain(|subscriber| subscriber.sender.send(event.clone()).is_ok());
            let emptied = entry.is_empty();
            drop(entry);
            if emptied {
                self.subscribers.remove(&task_id);
            }
        }

        if event.is_final() {
            debug!(task_id = %task_id, "closing streaming subscriptions on terminal event");
            self.subscribers.remove(&task_id);
        }
    }

    /// Drop all subscriptions for a task (maintenance sweep).
    pub fn remove_task(&self, task_id: &str) {
        self.subscribers.remove(task_id);
    }

    pub fn subscriber_count(&self, task_id: &str) -> usize {
        self.subscribers
            .get(task_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Artifact, Message, Part, Task, TaskStatus};

    fn seed_task(store: &TaskStore, id: &str) {
        store
            .insert_new(Task {
                id: id.to_string(),
                session_id: None,
                status: TaskStatus::submitted(Message::user_text("hi")),
                history: Vec::new(),
                artifacts: Vec::new(),
                metadata: None,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn attach_replays_artifacts_then_current_status() {
        let store = Arc::new(TaskStore::new());
        let fan_out = FanOut::new(store.clone());
        seed_task(&store, "t1");
        store
            .with_task_mut("t1", |task| {
                task.artifacts.push(Artifact::new("a", vec![Part::text("1")]));
                task.artifacts.push(Artifact::new("b", vec![Part::text("2")]));
            })
            .unwrap();

        let mut rx = fan_out.attach("t1", "sub-1").await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let third = rx.recv().await.unwrap();
        assert!(matches!(first, TaskEvent::ArtifactUpdate(ref e) if e.artifact.name.as_deref() == Some("a")));
        assert!(matches!(second, TaskEvent::ArtifactUpdate(ref e) if e.artifact.name.as_deref() == Some("b")));
        match third {
            TaskEvent::StatusUpdate(update) => assert!(!update.is_final),
            other => panic!("expected status replay, got {other:?}"),
        }
        assert_eq!(fan_out.subscriber_count("t1"), 1);
    }

    #[tokio::test]
    async fn attach_to_unknown_task_fails() {
        let store = Arc::new(TaskStore::new());
        let fan_out = FanOut::new(store);
        let err = fan_out.attach("ghost", "sub-1").await.unwrap_err();
        assert!(matches!(err, EngineError::TaskNotFound { .. }));
    }

    #[tokio::test]
    async fn final_event_closes_all_subscribers() {
        let store = Arc::new(TaskStore::new());
        let fan_out = FanOut::new(store.clone());
        seed_task(&store, "t1");

        let mut rx = fan_out.attach("t1", "sub-1").await.unwrap();
        let _replay = rx.recv().await.unwrap();

        fan_out.publish(&TaskEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: "t1".to_string(),
            status: TaskStatus::completed(None),
            is_final: true,
        }));

        let last = rx.recv().await.unwrap();
        assert!(last.is_final());
        // Channel is closed after the final event.
        assert!(rx.recv().await.is_none());
        assert_eq!(fan_out.subscriber_count("t1"), 0);
    }

    #[tokio::test]
    async fn attach_to_terminal_task_replays_and_closes() {
        let store = Arc::new(TaskStore::new());
        let fan_out = FanOut::new(store.clone());
        seed_task(&store, "t1");
        store
            .with_task_mut("t1", |task| task.status = TaskStatus::completed(None))
            .unwrap();

        let mut rx = fan_out.attach("t1", "late").await.unwrap();
        let replay = rx.recv().await.unwrap();
        assert!(replay.is_final());
        assert!(rx.recv().await.is_none());
        assert_eq!(fan_out.subscriber_count("t1"), 0);
    }

    #[tokio::test]
    async fn detach_removes_only_the_named_subscription() {
        let store = Arc::new(TaskStore::new());
        let fan_out = FanOut::new(store.clone());
        seed_task(&store, "t1");

        let _rx1 = fan_out.attach("t1", "sub-1").await.unwrap();
        let _rx2 = fan_out.attach("t1", "sub-2").await.unwrap();
        assert_eq!(fan_out.subscriber_count("t1"), 2);

        fan_out.detach("t1", "sub-1");
        assert_eq!(fan_out.subscriber_count("t1"), 1);

        // Unknown ids are a no-op.
        fan_out.detach("t1", "nope");
        assert_eq!(fan_out.subscriber_count("t1"), 1);
    }
}
