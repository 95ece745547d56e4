//! Task lifecycle engine.
//!
//! Drives tasks through `submitted -> working -> {completed | failed |
//! input-required}`, with `input-required -> working` on continuation and
//! cancel from any non-terminal state. Terminal states are final.
//!
//! Every mutation of one task is serialized by that task's store gate, and
//! each status/artifact change is published to the fan-out (and pushed to a
//! registered webhook) while the gate is still held, so subscribers observe
//! transitions in the exact order they were applied. Skill handlers run with
//! the gate released; their results are re-validated against the current
//! state before being applied.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, RoutingPolicy};
use crate::errors::{EngineError, EngineResult};
use crate::events::{FanOut, PushNotifier, TaskEvent};
use crate::protocol::{
    Artifact, Message, Part, Task, TaskArtifactUpdateEvent, TaskState, TaskStatus,
    TaskStatusUpdateEvent,
};
use crate::skills::{
    SkillRegistry, SKILL_DATA_TRANSFORMATION, SKILL_IMAGE_PROCESSING, SKILL_TASK_ORCHESTRATION,
    SKILL_TEXT_ANALYSIS,
};
use crate::task::TaskStore;

/// Task metadata key pinning the skill choice (and letting clients force
/// a skill explicitly).
pub const SKILL_METADATA_KEY: &str = "skill";

/// Keyword groups checked in priority order against the message text.
const KEYWORD_ROUTES: &[(&[&str], &str)] = &[
    (&["sentiment", "analy"], SKILL_TEXT_ANALYSIS),
    (&["image", "photo", "picture"], SKILL_IMAGE_PROCESSING),
    (&["convert", "transform", "csv", "json"], SKILL_DATA_TRANSFORMATION),
    (&["batch", "pipeline", "orchestrate"], SKILL_TASK_ORCHESTRATION),
];

pub struct TaskLifecycleEngine {
    store: Arc<TaskStore>,
    fan_out: Arc<FanOut>,
    push: PushNotifier,
    skills: Arc<SkillRegistry>,
    config: EngineConfig,
}

impl TaskLifecycleEngine {
    pub fn new(
        store: Arc<TaskStore>,
        fan_out: Arc<FanOut>,
        skills: Arc<SkillRegistry>,
        config: EngineConfig,
    ) -> Self {
        let push = PushNotifier::new(config.push_timeout);
        Self {
            store,
            fan_out,
            push,
            skills,
            config,
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    // ===== Lifecycle operations =====

    /// Create a task in `submitted` with the initial message as the current
    /// status message. No event is published; subscribers and pollers see
    /// the submitted state via replay or `get`.
    pub fn create_task(
        &self,
        task_id: &str,
        session_id: Option<&str>,
        initial_message: Message,
    ) -> EngineResult<Task> {
        if task_id.trim().is_empty() {
            return Err(EngineError::Validation {
                field: "id".to_string(),
                reason: "task id must not be empty".to_string(),
            });
        }
        if initial_message.parts.is_empty() {
            return Err(EngineError::Validation {
                field: "message.parts".to_string(),
                reason: "message must contain at least one part".to_string(),
            });
        }

        let task = Task {
            id: task_id.to_string(),
            session_id: session_id.map(str::to_string),
            status: TaskStatus::submitted(initial_message),
            history: Vec::new(),
            artifacts: Vec::new(),
            metadata: None,
        };
        self.store.insert_new(task.clone())?;
        if let Some(session) = session_id {
            self.store.append_session_task(session, task_id);
        }
        info!(task_id = %task_id, session_id = ?session_id, "task created");
        Ok(task)
    }

    /// Snapshot of a task, with history truncated to the most recent
    /// `history_limit` entries when the limit is non-zero.
    pub fn get_task(&self, task_id: &str, history_limit: usize) -> EngineResult<Task> {
        let mut task = self
            .store
            .get(task_id)
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        if history_limit > 0 && task.history.len() > history_limit {
            task.history = task
                .history
                .split_off(task.history.len() - history_limit);
        }
        Ok(task)
    }

    /// Force a status transition, archiving the previous status message.
    /// Terminal states are final; transitioning out of one is rejected.
    pub async fn update_status(&self, task_id: &str, status: TaskStatus) -> EngineResult<Task> {
        let gate = self.store.gate(task_id);
        let _guard = gate.lock().await;

        let task = self
            .store
            .get(task_id)
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        if task.status.state.is_terminal() {
            return Err(EngineError::InvalidTaskState {
                task_id: task_id.to_string(),
                state: task.status.state.as_str().to_string(),
                operation: "updateStatus".to_string(),
            });
        }
        self.apply_status(task_id, status)
    }

    /// Append artifacts to a task and publish one update event per input
    /// artifact.
    pub async fn add_artifacts(
        &self,
        task_id: &str,
        artifacts: Vec<Artifact>,
    ) -> EngineResult<Task> {
        let gate = self.store.gate(task_id);
        let _guard = gate.lock().await;
        self.append_artifacts(task_id, artifacts)?;
        self.store
            .get(task_id)
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Run the task's skill over its triggering message.
    ///
    /// Resolves the skill before leaving `submitted` so an unknown skill
    /// fails fast without a spurious `working` transition. The handler runs
    /// with the task gate released; if the task reaches a terminal state in
    /// the meantime (cancel racing a slow handler), the late result is
    /// discarded.
    pub async fn process_task(&self, task_id: &str) -> EngineResult<Task> {
        let gate = self.store.gate(task_id);

        let (handler, skill_id, snapshot) = {
            let _guard = gate.lock().await;

            let task = self
                .store
                .get(task_id)
                .ok_or_else(|| EngineError::TaskNotFound {
                    task_id: task_id.to_string(),
                })?;
            // Canceled (or otherwise finished) before processing started.
            if task.status.state.is_terminal() {
                debug!(task_id = %task_id, state = task.status.state.as_str(), "skipping processing of terminal task");
                return Ok(task);
            }

            let skill_id = self.determine_skill(&task, None);
            let handler =
                self.skills
                    .get(&skill_id)
                    .ok_or_else(|| EngineError::SkillNotFound {
                        skill_id: skill_id.clone(),
                    })?;

            if self.config.routing == RoutingPolicy::PinAtCreation
                && task.metadata_value(SKILL_METADATA_KEY).is_none()
            {
                self.store.with_task_mut(task_id, |task| {
                    task.metadata
                        .get_or_insert_with(Default::default)
                        .insert(SKILL_METADATA_KEY.to_string(), skill_id.clone().into());
                })?;
            }

            // Snapshot before the working transition so the handler still
            // sees the triggering message as the current status message.
            let snapshot = self
                .store
                .get(task_id)
                .ok_or_else(|| EngineError::TaskNotFound {
                    task_id: task_id.to_string(),
                })?;
            self.apply_status(task_id, TaskStatus::working())?;
            (handler, skill_id, snapshot)
        };

        info!(task_id = %task_id, skill = %skill_id, "processing task");
        let outcome = handler.on_request(&snapshot).await;

        let _guard = gate.lock().await;
        let current = self
            .store
            .get(task_id)
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        if current.status.state.is_terminal() {
            debug!(task_id = %task_id, state = current.status.state.as_str(), "discarding late skill result for terminal task");
            return Ok(current);
        }

        match outcome {
            Ok(output) => {
                if !output.metadata.is_empty() {
                    self.store.with_task_mut(task_id, |task| {
                        task.metadata
                            .get_or_insert_with(Default::default)
                            .extend(output.metadata);
                    })?;
                }
                self.append_artifacts(task_id, output.artifacts)?;

                let status = if output.requires_input {
                    TaskStatus::input_required(Some(output.message))
                } else {
                    TaskStatus::completed(Some(output.message))
                };
                self.apply_status(task_id, status)
            }
            Err(err) => {
                warn!(task_id = %task_id, skill = %skill_id, error = %err, "skill processing failed");
                self.apply_status(
                    task_id,
                    TaskStatus::failed(Message::agent_text(format!(
                        "Task processing failed: {err}"
                    ))),
                )?;
                Err(err)
            }
        }
    }

    /// Resume a task parked in `input-required` with new user input.
    ///
    /// When the skill implements a continuation turn its output is applied
    /// directly; otherwise the user message becomes the new triggering
    /// message and full processing restarts.
    pub async fn continue_task(&self, task_id: &str, user_message: Message) -> EngineResult<Task> {
        if user_message.parts.is_empty() {
            return Err(EngineError::Validation {
                field: "message.parts".to_string(),
                reason: "message must contain at least one part".to_string(),
            });
        }

        let gate = self.store.gate(task_id);
        let (handler, skill_id, snapshot) = {
            let _guard = gate.lock().await;

            let task = self
                .store
                .get(task_id)
                .ok_or_else(|| EngineError::TaskNotFound {
                    task_id: task_id.to_string(),
                })?;
            if task.status.state != TaskState::InputRequired {
                return Err(EngineError::InvalidTaskState {
                    task_id: task_id.to_string(),
                    state: task.status.state.as_str().to_string(),
                    operation: "continue".to_string(),
                });
            }

            let skill_id = self.determine_skill(&task, Some(&user_message));
            let handler =
                self.skills
                    .get(&skill_id)
                    .ok_or_else(|| EngineError::SkillNotFound {
                        skill_id: skill_id.clone(),
                    })?;
            (handler, skill_id, task)
        };

        info!(task_id = %task_id, skill = %skill_id, "continuing task");
        let outcome = handler.on_input_received(&snapshot, &user_message).await;

        match outcome {
            Ok(Some(output)) => {
                let _guard = gate.lock().await;
                let current =
                    self.store
                        .get(task_id)
                        .ok_or_else(|| EngineError::TaskNotFound {
                            task_id: task_id.to_string(),
                        })?;
                if current.status.state.is_terminal() {
                    debug!(task_id = %task_id, "discarding continuation result for terminal task");
                    return Ok(current);
                }

                // One turn of history: the prompt that asked for input,
                // then the user's reply.
                self.store.with_task_mut(task_id, |task| {
                    if let Some(prompt) = task.status.message.take() {
                        task.history.push(prompt);
                    }
                    task.history.push(user_message);
                    if !output.metadata.is_empty() {
                        task.metadata
                            .get_or_insert_with(Default::default)
                            .extend(output.metadata.clone());
                    }
                })?;
                self.append_artifacts(task_id, output.artifacts)?;

                let status = if output.terminal {
                    TaskStatus::completed(output.message)
                } else {
                    TaskStatus::input_required(output.message)
                };
                self.apply_status(task_id, status)
            }
            Ok(None) => {
                // No continuation turn: restart processing with the user
                // message as the new triggering message. The prompt is
                // archived here; the working transition archives the user
                // message, so each lands in history exactly once.
                {
                    let _guard = gate.lock().await;
                    let current =
                        self.store
                            .get(task_id)
                            .ok_or_else(|| EngineError::TaskNotFound {
                                task_id: task_id.to_string(),
                            })?;
                    if current.status.state.is_terminal() {
                        return Ok(current);
                    }
                    self.store.with_task_mut(task_id, |task| {
                        if let Some(prompt) = task.status.message.take() {
                            task.history.push(prompt);
                        }
                        task.status.message = Some(user_message);
                    })?;
                }
                self.process_task(task_id).await
            }
            Err(err) => {
                warn!(task_id = %task_id, skill = %skill_id, error = %err, "skill continuation failed");
                let _guard = gate.lock().await;
                let current = self.store.get(task_id);
                if let Some(task) = current {
                    if !task.status.state.is_terminal() {
                        self.apply_status(
                            task_id,
                            TaskStatus::failed(Message::agent_text(format!(
                                "Task processing failed: {err}"
                            ))),
                        )?;
                    }
                }
                Err(err)
            }
        }
    }

    /// Cancel a non-terminal task. Canceling an already-finished task is
    /// rejected rather than treated as a no-op.
    pub async fn cancel_task(&self, task_id: &str) -> EngineResult<Task> {
        let gate = self.store.gate(task_id);
        let _guard = gate.lock().await;

        let task = self
            .store
            .get(task_id)
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        if task.status.state.is_terminal() {
            return Err(EngineError::TaskNotCancelable {
                task_id: task_id.to_string(),
                state: task.status.state.as_str().to_string(),
            });
        }

        info!(task_id = %task_id, from = task.status.state.as_str(), "task canceled");
        self.apply_status(
            task_id,
            TaskStatus::canceled(Message::agent_text("Task was canceled.")),
        )
    }

    /// Sweep terminal tasks whose last transition predates `max_age`.
    /// Returns the number of tasks removed.
    pub async fn cleanup_expired(&self, max_age: chrono::Duration) -> usize {
        let cutoff = chrono::Utc::now() - max_age;
        let candidates = self.store.expired_terminal_ids(cutoff);
        let mut removed = 0;

        for task_id in candidates {
            let gate = self.store.gate(&task_id);
            let _guard = gate.lock().await;
            // Re-check under the gate; a resubscribe replay may be racing.
            let still_expired = self
                .store
                .expired_terminal_ids(cutoff)
                .iter()
                .any(|id| *id == task_id);
            if still_expired {
                self.store.remove(&task_id);
                self.store.clear_push_config(&task_id);
                self.fan_out.remove_task(&task_id);
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "expired terminal tasks swept");
        }
        removed
    }

    // ===== Internals =====

    /// Apply a status transition: archive the outgoing status message, store
    /// the new status, then publish and push while the caller still holds
    /// the task gate.
    fn apply_status(&self, task_id: &str, status: TaskStatus) -> EngineResult<Task> {
        let updated = self.store.with_task_mut(task_id, |task| {
            if let Some(previous) = task.status.message.take() {
                task.history.push(previous);
            }
            task.status = status;
            task.clone()
        })?;

        let is_final = updated.status.state.is_terminal();
        self.fan_out
            .publish(&TaskEvent::StatusUpdate(TaskStatusUpdateEvent {
                task_id: task_id.to_string(),
                status: updated.status.clone(),
                is_final,
            }));
        if let Some(config) = self.store.push_config(task_id) {
            self.push.notify(task_id, &updated.status, &config);
        }
        Ok(updated)
    }

    /// Append artifacts under the caller's gate, merging `append` fragments
    /// into the stored artifact that shares their index, and publish one
    /// event per input artifact.
    fn append_artifacts(&self, task_id: &str, artifacts: Vec<Artifact>) -> EngineResult<()> {
        for artifact in artifacts {
            self.store.with_task_mut(task_id, |task| {
                if artifact.append == Some(true) {
                    if let Some(existing) = task
                        .artifacts
                        .iter_mut()
                        .find(|stored| stored.index == artifact.index)
                    {
                        existing.parts.extend(artifact.parts.clone());
                        existing.last_chunk = artifact.last_chunk;
                        return;
                    }
                }
                task.artifacts.push(artifact.clone());
            })?;
            self.fan_out
                .publish(&TaskEvent::ArtifactUpdate(TaskArtifactUpdateEvent {
                    task_id: task_id.to_string(),
                    artifact,
                }));
        }
        Ok(())
    }

    /// Resolve the skill for a task: an explicit `skill` metadata entry
    /// wins; otherwise keyword routing over the given message (or the
    /// task's current status message) decides, defaulting to text analysis.
    fn determine_skill(&self, task: &Task, message: Option<&Message>) -> String {
        if let Some(pinned) = task
            .metadata_value(SKILL_METADATA_KEY)
            .and_then(serde_json::Value::as_str)
        {
            return pinned.to_string();
        }

        let message = message.or(task.status.message.as_ref());
        let text: String = message
            .map(|m| {
                m.parts
                    .iter()
                    .filter_map(|part| match part {
                        Part::Text { text, .. } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
            .to_lowercase();

        for (keywords, skill) in KEYWORD_ROUTES {
            if keywords.iter().any(|keyword| text.contains(keyword)) {
                return (*skill).to_string();
            }
        }
        SKILL_TEXT_ANALYSIS.to_string()
    }
}
