//! Protocol method dispatch.
//!
//! Routes JSON-RPC requests to engine operations. Unary methods go through
//! [`Dispatcher::handle`]; the streaming methods (`tasks/sendSubscribe`,
//! `tasks/resubscribe`) go through [`Dispatcher::handle_streaming`], which
//! hands back an event receiver for the transport to drain (e.g. as SSE).

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use super::json_rpc::{
    map_engine_error, validate_request, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    INVALID_REQUEST,
};
use crate::errors::EngineError;
use crate::events::{FanOut, TaskEventReceiver};
use crate::protocol::{
    TaskIdParams, TaskPushNotificationParams, TaskQueryParams, TaskSendParams, TaskState,
};
use crate::task::{TaskLifecycleEngine, TaskStore};

pub const METHOD_SEND: &str = "tasks/send";
pub const METHOD_SEND_SUBSCRIBE: &str = "tasks/sendSubscribe";
pub const METHOD_GET: &str = "tasks/get";
pub const METHOD_CANCEL: &str = "tasks/cancel";
pub const METHOD_PUSH_SET: &str = "tasks/pushNotification/set";
pub const METHOD_PUSH_GET: &str = "tasks/pushNotification/get";
pub const METHOD_RESUBSCRIBE: &str = "tasks/resubscribe";

pub struct Dispatcher {
    engine: Arc<TaskLifecycleEngine>,
    fan_out: Arc<FanOut>,
    store: Arc<TaskStore>,
}

impl Dispatcher {
    pub fn new(engine: Arc<TaskLifecycleEngine>, fan_out: Arc<FanOut>) -> Self {
        let store = engine.store().clone();
        Self {
            engine,
            fan_out,
            store,
        }
    }

    /// Dispatch a unary request.
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        if let Err(err) = validate_request(&request) {
            return JsonRpcResponse::error(id, err);
        }

        match request.method.as_str() {
            METHOD_SEND => self.on_send(request).await,
            METHOD_GET => self.on_get(request).await,
            METHOD_CANCEL => self.on_cancel(request).await,
            METHOD_PUSH_SET => self.on_push_set(request).await,
            METHOD_PUSH_GET => self.on_push_get(request).await,
            METHOD_SEND_SUBSCRIBE | METHOD_RESUBSCRIBE => JsonRpcResponse::error(
                id,
                JsonRpcError::new(
                    INVALID_REQUEST,
                    "streaming method requires a streaming transport",
                ),
            ),
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        }
    }

    /// Dispatch a streaming request, returning the subscription's event
    /// receiver on success.
    pub async fn handle_streaming(
        &self,
        request: JsonRpcRequest,
    ) -> Result<TaskEventReceiver, JsonRpcResponse> {
        let id = request.id.clone();
        if let Err(err) = validate_request(&request) {
            return Err(JsonRpcResponse::error(id, err));
        }

        match request.method.as_str() {
            METHOD_SEND_SUBSCRIBE => self.on_send_subscribe(request).await,
            METHOD_RESUBSCRIBE => self.on_resubscribe(request).await,
            other => Err(JsonRpcResponse::error(
                id,
                JsonRpcError::method_not_found(other),
            )),
        }
    }

    // ===== Unary methods =====

    /// Create-or-continue: a new id creates a task and starts background
    /// processing; an existing id delivers the message as continuation
    /// input (valid only in `input-required`).
    async fn on_send(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let params: TaskSendParams = match parse_params(request) {
            Ok(params) => params,
            Err(err) => return JsonRpcResponse::error(id, err),
        };

        if self.store.contains(&params.id) {
            // Store the config only once the continuation is accepted, so a
            // rejected send leaves no trace.
            match self.engine.continue_task(&params.id, params.message).await {
                Ok(task) => {
                    if let Some(config) = params.push_notification {
                        self.store.set_push_config(&params.id, config);
                    }
                    json_result(id, &task)
                }
                Err(err) => JsonRpcResponse::error(id, map_engine_error(&err)),
            }
        } else {
            let task = match self.engine.create_task(
                &params.id,
                params.session_id.as_deref(),
                params.message,
            ) {
                Ok(task) => task,
                Err(err) => return JsonRpcResponse::error(id, map_engine_error(&err)),
            };
            if let Some(config) = params.push_notification {
                self.store.set_push_config(&params.id, config);
            }
            self.spawn_process(&params.id);
            json_result(id, &task)
        }
    }

    async fn on_get(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let params: TaskQueryParams = match parse_params(request) {
            Ok(params) => params,
            Err(err) => return JsonRpcResponse::error(id, err),
        };
        let limit = params.history_length.unwrap_or(0) as usize;
        match self.engine.get_task(&params.id, limit) {
            Ok(task) => json_result(id, &task),
            Err(err) => JsonRpcResponse::error(id, map_engine_error(&err)),
        }
    }

    async fn on_cancel(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let params: TaskIdParams = match parse_params(request) {
            Ok(params) => params,
            Err(err) => return JsonRpcResponse::error(id, err),
        };
        match self.engine.cancel_task(&params.id).await {
            Ok(task) => json_result(id, &task),
            Err(err) => JsonRpcResponse::error(id, map_engine_error(&err)),
        }
    }

    async fn on_push_set(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let params: TaskPushNotificationParams = match parse_params(request) {
            Ok(params) => params,
            Err(err) => return JsonRpcResponse::error(id, err),
        };
        if !self.store.contains(&params.id) {
            let err = EngineError::TaskNotFound {
                task_id: params.id.clone(),
            };
            return JsonRpcResponse::error(id, map_engine_error(&err));
        }
        self.store
            .set_push_config(&params.id, params.push_notification_config.clone());
        json_result(id, &params)
    }

    async fn on_push_get(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let params: TaskIdParams = match parse_params(request) {
            Ok(params) => params,
            Err(err) => return JsonRpcResponse::error(id, err),
        };
        if !self.store.contains(&params.id) {
            let err = EngineError::TaskNotFound {
                task_id: params.id.clone(),
            };
            return JsonRpcResponse::error(id, map_engine_error(&err));
        }
        let config = self.store.push_config(&params.id);
        json_result(
            id,
            &json!({ "id": params.id, "pushNotificationConfig": config }),
        )
    }

    // ===== Streaming methods =====

    /// Like `tasks/send`, but the caller is attached to the task's event
    /// stream before processing starts, so it observes every transition.
    async fn on_send_subscribe(
        &self,
        request: JsonRpcRequest,
    ) -> Result<TaskEventReceiver, JsonRpcResponse> {
        let id = request.id.clone();
        let correlation = correlation_id(&request);
        let params: TaskSendParams =
            parse_params(request).map_err(|err| JsonRpcResponse::error(id.clone(), err))?;

        if self.store.contains(&params.id) {
            // Continuation: validate the state before attaching, so an
            // invalid continue never produces a half-open stream.
            let task = self
                .engine
                .get_task(&params.id, 0)
                .map_err(|err| JsonRpcResponse::error(id.clone(), map_engine_error(&err)))?;
            if task.status.state != TaskState::InputRequired {
                let err = EngineError::InvalidTaskState {
                    task_id: params.id.clone(),
                    state: task.status.state.as_str().to_string(),
                    operation: "continue".to_string(),
                };
                return Err(JsonRpcResponse::error(id, map_engine_error(&err)));
            }
            if let Some(config) = params.push_notification {
                self.store.set_push_config(&params.id, config);
            }
            let receiver = self
                .fan_out
                .attach(&params.id, correlation)
                .await
                .map_err(|err| JsonRpcResponse::error(id.clone(), map_engine_error(&err)))?;
            self.spawn_continue(&params.id, params.message);
            Ok(receiver)
        } else {
            self.engine
                .create_task(&params.id, params.session_id.as_deref(), params.message)
                .map_err(|err| JsonRpcResponse::error(id.clone(), map_engine_error(&err)))?;
            if let Some(config) = params.push_notification {
                self.store.set_push_config(&params.id, config);
            }
            let receiver = self
                .fan_out
                .attach(&params.id, correlation)
                .await
                .map_err(|err| JsonRpcResponse::error(id.clone(), map_engine_error(&err)))?;
            self.spawn_process(&params.id);
            Ok(receiver)
        }
    }

    /// Re-attach to an existing task: replays accumulated artifacts and the
    /// current status, then delivers live events (or closes immediately if
    /// the task already finished).
    async fn on_resubscribe(
        &self,
        request: JsonRpcRequest,
    ) -> Result<TaskEventReceiver, JsonRpcResponse> {
        let id = request.id.clone();
        let correlation = correlation_id(&request);
        let params: TaskIdParams =
            parse_params(request).map_err(|err| JsonRpcResponse::error(id.clone(), err))?;

        self.fan_out
            .attach(&params.id, correlation)
            .await
            .map_err(|err| JsonRpcResponse::error(id, map_engine_error(&err)))
    }

    // ===== Internals =====

    fn spawn_process(&self, task_id: &str) {
        let engine = self.engine.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = engine.process_task(&task_id).await {
                if err.is_error_level() {
                    error!(task_id = %task_id, error = %err, "background task processing failed");
                } else {
                    warn!(task_id = %task_id, error = %err, "background task processing failed");
                }
            }
        });
    }

    fn spawn_continue(&self, task_id: &str, message: crate::protocol::Message) {
        let engine = self.engine.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = engine.continue_task(&task_id, message).await {
                if err.is_error_level() {
                    error!(task_id = %task_id, error = %err, "background task continuation failed");
                } else {
                    warn!(task_id = %task_id, error = %err, "background task continuation failed");
                }
            }
        });
    }
}

fn parse_params<T: DeserializeOwned>(request: JsonRpcRequest) -> Result<T, JsonRpcError> {
    let params = request
        .params
        .ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
    serde_json::from_value(params)
        .map_err(|err| JsonRpcError::invalid_params(format!("invalid params: {err}")))
}

/// Subscription id for detach bookkeeping: the request id when present,
/// otherwise a fresh UUID.
fn correlation_id(request: &JsonRpcRequest) -> String {
    request
        .id
        .as_ref()
        .map(|id| id.as_correlation())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn json_result<T: serde::Serialize>(
    id: Option<super::json_rpc::JsonRpcId>,
    value: &T,
) -> JsonRpcResponse {
    match serde_json::to_value(value) {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(err) => {
            let err = EngineError::from(err);
            JsonRpcResponse::error(id, map_engine_error(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::dispatch::json_rpc::{
        JsonRpcId, INVALID_PARAMS, METHOD_NOT_FOUND, TASK_NOT_FOUND,
    };
    use crate::skills::SkillRegistry;

    fn dispatcher() -> Dispatcher {
        let store = Arc::new(TaskStore::new());
        let fan_out = Arc::new(FanOut::new(store.clone()));
        let engine = Arc::new(TaskLifecycleEngine::new(
            store,
            fan_out.clone(),
            Arc::new(SkillRegistry::with_builtin()),
            EngineConfig::default(),
        ));
        Dispatcher::new(engine, fan_out)
    }

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: Some(params),
            id: Some(JsonRpcId::Number(1)),
        }
    }

    fn send_params(task_id: &str, text: &str) -> Value {
        json!({
            "id": task_id,
            "message": { "role": "user", "parts": [{ "type": "text", "text": text }] }
        })
    }

    #[tokio::test]
    async fn send_creates_task_and_returns_submitted_snapshot() {
        let dispatcher = dispatcher();
        let response = dispatcher
            .handle(request(METHOD_SEND, send_params("t1", "hello")))
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["id"], json!("t1"));
        assert_eq!(result["status"]["state"], json!("submitted"));
    }

    #[tokio::test]
    async fn get_returns_not_found_for_unknown_task() {
        let dispatcher = dispatcher();
        let response = dispatcher
            .handle(request(METHOD_GET, json!({ "id": "ghost" })))
            .await;
        assert_eq!(response.error.unwrap().code, TASK_NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let dispatcher = dispatcher();
        let response = dispatcher
            .handle(request("tasks/unknown", json!({})))
            .await;
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_params_are_rejected() {
        let dispatcher = dispatcher();
        let response = dispatcher
            .handle(request(METHOD_SEND, json!({ "id": "t1" })))
            .await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn streaming_method_on_unary_transport_is_rejected() {
        let dispatcher = dispatcher();
        let response = dispatcher
            .handle(request(METHOD_SEND_SUBSCRIBE, send_params("t1", "hi")))
            .await;
        assert_eq!(response.error.unwrap().code, INVALID_REQUEST);
    }

    #[tokio::test]
    async fn push_config_set_then_get_round_trips() {
        let dispatcher = dispatcher();
        dispatcher
            .handle(request(METHOD_SEND, send_params("t1", "hello")))
            .await;

        let response = dispatcher
            .handle(request(
                METHOD_PUSH_SET,
                json!({
                    "id": "t1",
                    "pushNotificationConfig": { "url": "https://example.com/hook" }
                }),
            ))
            .await;
        assert!(response.error.is_none());

        let response = dispatcher
            .handle(request(METHOD_PUSH_GET, json!({ "id": "t1" })))
            .await;
        let result = response.result.unwrap();
        assert_eq!(
            result["pushNotificationConfig"]["url"],
            json!("https://example.com/hook")
        );
    }

    #[tokio::test]
    async fn rejected_continuation_send_does_not_store_push_config() {
        let dispatcher = dispatcher();
        dispatcher
            .handle(request(METHOD_SEND, send_params("t1", "hello")))
            .await;

        // The task is not awaiting input, so this send is rejected; the
        // inline push config must not stick.
        let response = dispatcher
            .handle(request(
                METHOD_SEND,
                json!({
                    "id": "t1",
                    "message": { "role": "user", "parts": [{ "type": "text", "text": "more" }] },
                    "pushNotification": { "url": "https://example.com/hook" }
                }),
            ))
            .await;
        assert!(response.error.is_some());

        let response = dispatcher
            .handle(request(METHOD_PUSH_GET, json!({ "id": "t1" })))
            .await;
        assert_eq!(
            response.result.unwrap()["pushNotificationConfig"],
            Value::Null
        );
    }

    #[tokio::test]
    async fn push_config_requires_existing_task() {
        let dispatcher = dispatcher();
        let response = dispatcher
            .handle(request(
                METHOD_PUSH_SET,
                json!({
                    "id": "ghost",
                    "pushNotificationConfig": { "url": "https://example.com/hook" }
                }),
            ))
            .await;
        assert_eq!(response.error.unwrap().code, TASK_NOT_FOUND);
    }

    #[tokio::test]
    async fn send_subscribe_streams_to_the_final_event() {
        let dispatcher = dispatcher();
        let mut receiver = dispatcher
            .handle_streaming(request(
                METHOD_SEND_SUBSCRIBE,
                send_params("t1", "please analyze this"),
            ))
            .await
            .unwrap();

        let mut saw_final = false;
        while let Some(event) = receiver.recv().await {
            if event.is_final() {
                saw_final = true;
            }
        }
        assert!(saw_final);
    }

    #[tokio::test]
    async fn resubscribe_to_unknown_task_fails() {
        let dispatcher = dispatcher();
        let response = dispatcher
            .handle_streaming(request(METHOD_RESUBSCRIBE, json!({ "id": "ghost" })))
            .await
            .unwrap_err();
        assert_eq!(response.error.unwrap().code, TASK_NOT_FOUND);
    }

    #[tokio::test]
    async fn send_subscribe_continue_requires_input_required() {
        let dispatcher = dispatcher();
        dispatcher
            .handle(request(METHOD_SEND, send_params("t1", "hello")))
            .await;

        // Task is submitted or working, not awaiting input.
        let response = dispatcher
            .handle_streaming(request(METHOD_SEND_SUBSCRIBE, send_params("t1", "more")))
            .await
            .unwrap_err();
        let code = response.error.unwrap().code;
        assert!(code == crate::dispatch::json_rpc::UNSUPPORTED_OPERATION);
    }
}
