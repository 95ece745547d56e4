use async_trait::async_trait;
use std::collections::HashMap;

use crate::errors::EngineResult;
use crate::protocol::{Artifact, Message, Task};

/// Result of a capability's initial processing pass.
#[derive(Debug, Clone)]
pub struct SkillOutput {
    /// The agent's reply, installed as the next status message.
    pub message: Message,
    pub artifacts: Vec<Artifact>,
    /// Park the task in `input-required` instead of completing it.
    pub requires_input: bool,
    /// Continuation state for the engine to stash in task metadata.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SkillOutput {
    pub fn completed(message: Message) -> Self {
        Self {
            message,
            artifacts: Vec::new(),
            requires_input: false,
            metadata: HashMap::new(),
        }
    }

    pub fn input_required(message: Message) -> Self {
        Self {
            message,
            artifacts: Vec::new(),
            requires_input: true,
            metadata: HashMap::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Result of a capability's continuation turn.
#[derive(Debug, Clone)]
pub struct ContinueOutput {
    pub message: Option<Message>,
    pub artifacts: Vec<Artifact>,
    /// True when the continuation completes the task; false keeps it in
    /// `input-required` awaiting another turn.
    pub terminal: bool,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ContinueOutput {
    pub fn terminal(message: Option<Message>) -> Self {
        Self {
            message,
            artifacts: Vec::new(),
            terminal: true,
            metadata: HashMap::new(),
        }
    }

    pub fn needs_more_input(message: Option<Message>) -> Self {
        Self {
            message,
            artifacts: Vec::new(),
            terminal: false,
            metadata: HashMap::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Pluggable capability turning a task's triggering message into a result
/// message and artifacts.
///
/// Handlers receive an immutable snapshot of the task; all state mutation
/// goes through the engine when it applies the returned output.
#[async_trait]
pub trait SkillHandler: Send + Sync {
    /// Stable identifier this handler registers under.
    fn id(&self) -> &str;

    /// Process the task's triggering message. The snapshot's current status
    /// message is the message that triggered processing.
    async fn on_request(&self, task: &Task) -> EngineResult<SkillOutput>;

    /// Continuation turn for a task parked in `input-required`.
    ///
    /// Returning `Ok(None)` declares that this capability has no continue
    /// operation; the engine then restarts full processing with the user
    /// message as the new triggering message.
    async fn on_input_received(
        &self,
        _task: &Task,
        _user_message: &Message,
    ) -> EngineResult<Option<ContinueOutput>> {
        Ok(None)
    }
}
