/// Main error type for the task execution engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // === Task Lifecycle Errors ===
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Task already exists: {task_id}")]
    TaskAlreadyExists { task_id: String },

    #[error("Task {task_id} cannot be canceled in state {state}")]
    TaskNotCancelable { task_id: String, state: String },

    #[error("Operation {operation} is not valid for task {task_id} in state {state}")]
    InvalidTaskState {
        task_id: String,
        state: String,
        operation: String,
    },

    // === Skill Errors ===
    #[error("No capability registered for skill: {skill_id}")]
    SkillNotFound { skill_id: String },

    #[error("Skill {skill_id} failed: {reason}")]
    SkillExecution { skill_id: String, reason: String },

    // === Protocol Errors ===
    #[error("Validation error: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Authentication required")]
    AuthenticationRequired,

    // === IO / System Errors ===
    #[error("Push delivery failed: {reason}")]
    PushDelivery { reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Internal error: {component}: {reason}")]
    Internal { component: String, reason: String },
}

impl EngineError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PushDelivery { .. } => true,

            Self::TaskNotFound { .. }
            | Self::TaskAlreadyExists { .. }
            | Self::TaskNotCancelable { .. }
            | Self::InvalidTaskState { .. }
            | Self::SkillNotFound { .. }
            | Self::SkillExecution { .. }
            | Self::Validation { .. }
            | Self::MethodNotFound { .. }
            | Self::AuthenticationRequired
            | Self::Serialization { .. }
            | Self::Internal { .. } => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::TaskNotFound { .. }
            | Self::TaskAlreadyExists { .. }
            | Self::TaskNotCancelable { .. }
            | Self::InvalidTaskState { .. } => "task",

            Self::SkillNotFound { .. } | Self::SkillExecution { .. } => "skill",

            Self::Validation { .. } | Self::MethodNotFound { .. } => "protocol",

            Self::AuthenticationRequired => "security",

            Self::PushDelivery { .. } | Self::Serialization { .. } => "io",

            Self::Internal { .. } => "system",
        }
    }

    /// Check if this error should be logged at error level rather than warn
    pub fn is_error_level(&self) -> bool {
        matches!(
            self,
            Self::Internal { .. } | Self::SkillExecution { .. } | Self::AuthenticationRequired
        )
    }
}

/// Convenience type alias
pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::Serialization {
            reason: error.to_string(),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        EngineError::PushDelivery {
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let task_err = EngineError::TaskNotFound {
            task_id: "t1".to_string(),
        };
        assert_eq!(task_err.category(), "task");
        assert!(!task_err.is_retryable());
        assert!(!task_err.is_error_level());

        let push_err = EngineError::PushDelivery {
            reason: "connection refused".to_string(),
        };
        assert_eq!(push_err.category(), "io");
        assert!(push_err.is_retryable());

        let skill_err = EngineError::SkillExecution {
            skill_id: "text-analysis".to_string(),
            reason: "boom".to_string(),
        };
        assert_eq!(skill_err.category(), "skill");
        assert!(skill_err.is_error_level());
    }

    #[test]
    fn test_error_conversions() {
        let json_err: EngineError = serde_json::from_str::<serde_json::Value>("not json")
            .unwrap_err()
            .into();
        assert_eq!(json_err.category(), "io");
        assert!(matches!(json_err, EngineError::Serialization { .. }));
    }

    #[tokio::test]
    async fn test_reqwest_error_converts_to_push_delivery() {
        // An invalid URL fails at request build time, no network involved.
        let err = reqwest::Client::new()
            .get("not a valid url")
            .send()
            .await
            .unwrap_err();
        let err: EngineError = err.into();
        assert!(matches!(err, EngineError::PushDelivery { .. }));
        assert!(err.is_retryable());
    }
}
