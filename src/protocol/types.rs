use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Agent-task protocol types.
///
/// Wire shapes for tasks, messages, artifacts and the streaming update
/// events, plus the parameter objects for the protocol methods.

// ============================================================================
// Core Task Types
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Canceled,
    Failed,
    Unknown,
}

impl TaskState {
    /// Terminal states permit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::InputRequired => "input-required",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>, // RFC 3339 datetime
}

impl TaskStatus {
    /// New status stamped with the current time.
    pub fn new(state: TaskState, message: Option<Message>) -> Self {
        Self {
            state,
            message,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn submitted(message: Message) -> Self {
        Self::new(TaskState::Submitted, Some(message))
    }

    pub fn working() -> Self {
        Self::new(TaskState::Working, None)
    }

    pub fn completed(message: Option<Message>) -> Self {
        Self::new(TaskState::Completed, message)
    }

    pub fn input_required(message: Option<Message>) -> Self {
        Self::new(TaskState::InputRequired, message)
    }

    pub fn failed(message: Message) -> Self {
        Self::new(TaskState::Failed, Some(message))
    }

    pub fn canceled(message: Message) -> Self {
        Self::new(TaskState::Canceled, Some(message))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "sessionId")]
    pub session_id: Option<String>,
    pub status: TaskStatus,
    /// Prior status messages in chronological order; the current status
    /// message is never duplicated here.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub history: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub artifacts: Vec<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Task {
    /// Text of the first text part of the current status message, if any.
    pub fn status_text(&self) -> Option<&str> {
        self.status
            .message
            .as_ref()
            .and_then(|message| message.first_text())
    }

    /// Metadata value lookup tolerating an absent map.
    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}

// ============================================================================
// Messages and Parts
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Message {
    pub fn new(role: MessageRole, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            metadata: None,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![Part::text(text)])
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Agent, vec![Part::text(text)])
    }

    /// First text part, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            Part::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<HashMap<String, serde_json::Value>>,
    },
    File {
        file: FileContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<HashMap<String, serde_json::Value>>,
    },
    Data {
        data: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<HashMap<String, serde_json::Value>>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text {
            text: text.into(),
            metadata: None,
        }
    }

    pub fn data(data: serde_json::Value) -> Self {
        Part::Data {
            data,
            metadata: None,
        }
    }

    pub fn file_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<String>,
    ) -> Self {
        Part::File {
            file: FileContent::WithBytes(FileWithBytes {
                base: FileBase {
                    name: Some(name.into()),
                    mime_type: Some(mime_type.into()),
                },
                bytes: bytes.into(),
            }),
            metadata: None,
        }
    }

    pub fn file_uri(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Part::File {
            file: FileContent::WithUri(FileWithUri {
                base: FileBase {
                    name: Some(name.into()),
                    mime_type: Some(mime_type.into()),
                },
                uri: uri.into(),
            }),
            metadata: None,
        }
    }

    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            Part::Data { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// A file part carries exactly one of inline bytes or a retrieval URI.
/// The two-variant enum makes the invariant unrepresentable to violate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FileContent {
    WithBytes(FileWithBytes),
    WithUri(FileWithUri),
}

impl FileContent {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::WithBytes(f) => f.base.name.as_deref(),
            Self::WithUri(f) => f.base.name.as_deref(),
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::WithBytes(f) => f.base.mime_type.as_deref(),
            Self::WithUri(f) => f.base.mime_type.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileBase {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileWithBytes {
    #[serde(flatten)]
    pub base: FileBase,
    pub bytes: String, // base64-encoded
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileWithUri {
    #[serde(flatten)]
    pub base: FileBase,
    pub uri: String,
}

// ============================================================================
// Artifacts
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parts: Vec<Part>,
    /// Stream-merge key: artifacts sharing an index are fragments of one
    /// logical artifact.
    #[serde(default)]
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "lastChunk")]
    pub last_chunk: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            name: Some(name.into()),
            description: None,
            parts,
            index: 0,
            append: None,
            last_chunk: None,
            metadata: None,
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    pub fn appended(mut self) -> Self {
        self.append = Some(true);
        self
    }

    pub fn last_chunk(mut self) -> Self {
        self.last_chunk = Some(true);
        self
    }
}

// ============================================================================
// Push Notification Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushNotificationConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<PushAuthenticationInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushAuthenticationInfo {
    pub schemes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

// ============================================================================
// Streaming Update Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatusUpdateEvent {
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(rename = "final")]
    pub is_final: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskArtifactUpdateEvent {
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub artifact: Artifact,
}

// ============================================================================
// Method Parameter Types
// ============================================================================

/// Params for `tasks/send` and `tasks/sendSubscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSendParams {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "sessionId")]
    pub session_id: Option<String>,
    pub message: Message,
    #[serde(
        skip_serializing_if = "Option::is_none",
        rename = "pushNotification"
    )]
    pub push_notification: Option<PushNotificationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Params for `tasks/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueryParams {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "historyLength")]
    pub history_length: Option<u32>,
}

/// Params for `tasks/cancel` and `tasks/resubscribe` and push-config get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIdParams {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Params and result shape for `tasks/pushNotification/set`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPushNotificationParams {
    pub id: String,
    #[serde(rename = "pushNotificationConfig")]
    pub push_notification_config: PushNotificationConfig,
}
