use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::errors::{EngineError, EngineResult};
use crate::protocol::{PushNotificationConfig, Task};

/// Shared mutable state for the engine and fan-out.
///
/// Owns three independent concurrent maps (tasks, sessions, push configs)
/// plus one async mutex gate per task. The gate serializes mutations and
/// the attach-replay of streaming subscribers for a single task; different
/// tasks proceed fully in parallel.
///
/// All reads hand out clones; callers never hold references into the maps.
pub struct TaskStore {
    tasks: DashMap<String, Task>,
    /// Append-only task-id lists grouped by session id.
    sessions: DashMap<String, Vec<String>>,
    push_configs: DashMap<String, PushNotificationConfig>,
    gates: DashMap<String, Arc<Mutex<()>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            sessions: DashMap::new(),
            push_configs: DashMap::new(),
            gates: DashMap::new(),
        }
    }

    /// The serialization gate for one task. Gates outlive task deletion in
    /// callers that cloned the `Arc` earlier; that is harmless.
    ///
    /// Unknown ids get a throwaway lock that is never registered, so probing
    /// for absent tasks cannot grow the gate map.
    pub fn gate(&self, task_id: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self.gates.get(task_id) {
            return existing.clone();
        }
        if !self.tasks.contains_key(task_id) {
            return Arc::new(Mutex::new(()));
        }
        self.gates
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ===== Tasks =====

    /// Register a brand-new task; fails if the id is already taken.
    pub fn insert_new(&self, task: Task) -> EngineResult<()> {
        match self.tasks.entry(task.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::TaskAlreadyExists {
                task_id: task.id.clone(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(task);
                Ok(())
            }
        }
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|entry| entry.clone())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// Atomically mutate a task under the map's entry lock.
    ///
    /// The closure must be synchronous; never call back into the store from
    /// inside it.
    pub fn with_task_mut<R>(
        &self,
        task_id: &str,
        mutate: impl FnOnce(&mut Task) -> R,
    ) -> EngineResult<R> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        Ok(mutate(entry.value_mut()))
    }

    /// Delete a task and its gate. Idempotent.
    pub fn remove(&self, task_id: &str) {
        self.tasks.remove(task_id);
        self.gates.remove(task_id);
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Ids of terminal tasks whose status timestamp predates `cutoff`.
    /// Tasks without a parseable timestamp are never swept.
    pub fn expired_terminal_ids(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|entry| {
                let task = entry.value();
                task.status.state.is_terminal()
                    && task
                        .status
                        .timestamp
                        .as_deref()
                        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                        .map(|ts| ts.with_timezone(&Utc) < cutoff)
                        .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    // ===== Sessions =====

    pub fn append_session_task(&self, session_id: &str, task_id: &str) {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .push(task_id.to_string());
    }

    pub fn session_tasks(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    // ===== Push configs =====

    pub fn set_push_config(&self, task_id: &str, config: PushNotificationConfig) {
        self.push_configs.insert(task_id.to_string(), config);
    }

    pub fn push_config(&self, task_id: &str) -> Option<PushNotificationConfig> {
        self.push_configs.get(task_id).map(|entry| entry.clone())
    }

    pub fn clear_push_config(&self, task_id: &str) {
        self.push_configs.remove(task_id);
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, TaskStatus};

    fn new_task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            session_id: None,
            status: TaskStatus::submitted(Message::user_text("hi")),
            history: Vec::new(),
            artifacts: Vec::new(),
            metadata: None,
        }
    }

    #[test]
    fn insert_new_rejects_duplicate_ids() {
        let store = TaskStore::new();
        store.insert_new(new_task("t1")).unwrap();
        let err = store.insert_new(new_task("t1")).unwrap_err();
        assert!(matches!(err, EngineError::TaskAlreadyExists { task_id } if task_id == "t1"));
    }

    #[test]
    fn with_task_mut_requires_existing_task() {
        let store = TaskStore::new();
        let err = store.with_task_mut("ghost", |_| ()).unwrap_err();
        assert!(matches!(err, EngineError::TaskNotFound { .. }));

        store.insert_new(new_task("t1")).unwrap();
        store
            .with_task_mut("t1", |task| task.history.push(Message::user_text("x")))
            .unwrap();
        assert_eq!(store.get("t1").unwrap().history.len(), 1);
    }

    #[test]
    fn gate_for_unknown_id_is_not_retained() {
        let store = TaskStore::new();
        let ghost = store.gate("ghost");
        // Only the handed-out clone holds the lock; the map kept nothing.
        assert_eq!(Arc::strong_count(&ghost), 1);

        store.insert_new(new_task("t1")).unwrap();
        let first = store.gate("t1");
        let second = store.gate("t1");
        assert!(Arc::ptr_eq(&first, &second));
        // Registered gates stay shared through the map.
        assert_eq!(Arc::strong_count(&first), 3);

        store.remove("t1");
        assert_eq!(Arc::strong_count(&first), 2);
    }

    #[test]
    fn sessions_are_append_only() {
        let store = TaskStore::new();
        store.append_session_task("s1", "t1");
        store.append_session_task("s1", "t2");
        assert_eq!(store.session_tasks("s1"), vec!["t1", "t2"]);
        assert!(store.session_tasks("absent").is_empty());
    }

    #[test]
    fn push_config_set_get_clear() {
        let store = TaskStore::new();
        assert!(store.push_config("t1").is_none());
        store.set_push_config(
            "t1",
            PushNotificationConfig {
                url: "https://example.com/hook".to_string(),
                token: None,
                authentication: None,
            },
        );
        assert!(store.push_config("t1").is_some());
        store.clear_push_config("t1");
        assert!(store.push_config("t1").is_none());
    }

    #[test]
    fn expired_terminal_ids_ignores_live_tasks() {
        let store = TaskStore::new();
        let mut done = new_task("done");
        done.status = TaskStatus::completed(None);
        done.status.timestamp = Some("2020-01-01T00:00:00+00:00".to_string());
        store.insert_new(done).unwrap();

        let mut live = new_task("live");
        live.status.timestamp = Some("2020-01-01T00:00:00+00:00".to_string());
        store.insert_new(live).unwrap();

        let expired = store.expired_terminal_ids(Utc::now());
        assert_eq!(expired, vec!["done".to_string()]);
    }
}
