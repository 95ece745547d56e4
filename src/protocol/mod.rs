//! Protocol value objects shared by the engine, fan-out and dispatcher.

pub mod types;

pub use types::{
    Artifact, FileBase, FileContent, FileWithBytes, FileWithUri, Message, MessageRole, Part,
    PushAuthenticationInfo, PushNotificationConfig, Task, TaskArtifactUpdateEvent, TaskIdParams,
    TaskPushNotificationParams, TaskQueryParams, TaskSendParams, TaskState, TaskStatus,
    TaskStatusUpdateEvent,
};
