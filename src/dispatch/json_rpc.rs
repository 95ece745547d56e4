//! JSON-RPC 2.0 envelope and the protocol's error code table.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::EngineError;

// Standard JSON-RPC codes.
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// Protocol-specific codes.
pub const TASK_NOT_FOUND: i32 = -32001;
pub const TASK_NOT_CANCELABLE: i32 = -32002;
pub const UNSUPPORTED_OPERATION: i32 = -32004;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonRpcId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(i64),
    String(String),
}

impl JsonRpcId {
    pub fn as_correlation(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::String(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<JsonRpcId>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<JsonRpcId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found")
            .with_data(json!({ "method": method }))
    }
}

/// Envelope-level validation before dispatch.
pub fn validate_request(request: &JsonRpcRequest) -> Result<(), JsonRpcError> {
    if request.jsonrpc != "2.0" {
        return Err(JsonRpcError::new(
            INVALID_REQUEST,
            "jsonrpc version must be \"2.0\"",
        ));
    }
    if request.method.is_empty() {
        return Err(JsonRpcError::new(INVALID_REQUEST, "method must not be empty"));
    }
    Ok(())
}

/// Translate an engine error to its wire representation.
pub fn map_engine_error(error: &EngineError) -> JsonRpcError {
    match error {
        EngineError::TaskNotFound { task_id } => {
            JsonRpcError::new(TASK_NOT_FOUND, "Task not found")
                .with_data(json!({ "taskId": task_id }))
        }
        EngineError::TaskAlreadyExists { task_id } => {
            JsonRpcError::new(INVALID_PARAMS, "Task already exists")
                .with_data(json!({ "taskId": task_id }))
        }
        EngineError::TaskNotCancelable { task_id, state } => {
            JsonRpcError::new(TASK_NOT_CANCELABLE, "Task cannot be canceled")
                .with_data(json!({ "taskId": task_id, "state": state }))
        }
        EngineError::InvalidTaskState {
            task_id,
            state,
            operation,
        } => JsonRpcError::new(UNSUPPORTED_OPERATION, "Operation not valid in current state")
            .with_data(json!({ "taskId": task_id, "state": state, "operation": operation })),
        EngineError::SkillNotFound { skill_id } => {
            JsonRpcError::new(INVALID_PARAMS, "Unknown skill")
                .with_data(json!({ "skillId": skill_id }))
        }
        EngineError::Validation { field, reason } => {
            JsonRpcError::new(INVALID_PARAMS, "Invalid parameters")
                .with_data(json!({ "field": field, "reason": reason }))
        }
        EngineError::MethodNotFound { method } => JsonRpcError::method_not_found(method),
        EngineError::AuthenticationRequired => {
            JsonRpcError::new(INVALID_REQUEST, "Authentication required")
        }
        EngineError::SkillExecution { .. }
        | EngineError::PushDelivery { .. }
        | EngineError::Serialization { .. }
        | EngineError::Internal { .. } => {
            JsonRpcError::new(INTERNAL_ERROR, error.to_string())
        }
    }
}
