//! Webhook push delivery for task status changes.
//!
//! Delivery is fire-and-forget: the HTTP call runs on a spawned task so a
//! slow or dead webhook endpoint never blocks a lifecycle transition.
//! Failures are logged and dropped; the store remains the source of truth
//! clients can always poll.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::protocol::{PushNotificationConfig, TaskStatus};

const NOTIFICATION_TOKEN_HEADER: &str = "X-Notification-Token";

/// Sends status-change webhooks for tasks with a registered push config.
#[derive(Clone)]
pub struct PushNotifier {
    client: reqwest::Client,
}

impl PushNotifier {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// Deliver one status notification in the background.
    pub fn notify(&self, task_id: &str, status: &TaskStatus, config: &PushNotificationConfig) {
        let payload = build_payload(task_id, status);
        let task_id = task_id.to_string();

        let mut request = self.client.post(&config.url).json(&payload);
        if let Some(token) = &config.token {
            request = request.header(NOTIFICATION_TOKEN_HEADER, token);
        }
        if let Some(auth) = &config.authentication {
            if auth.schemes.iter().any(|s| s.eq_ignore_ascii_case("bearer")) {
                if let Some(credentials) = &auth.credentials {
                    request = request.bearer_auth(credentials);
                }
            }
        }
        let url = config.url.clone();

        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(task_id = %task_id, url = %url, "push notification delivered");
                }
                Ok(response) => {
                    warn!(
                        task_id = %task_id,
                        url = %url,
                        status = %response.status(),
                        "push notification rejected by endpoint"
                    );
                }
                Err(err) => {
                    let err = EngineError::from(err);
                    warn!(
                        task_id = %task_id,
                        url = %url,
                        error = %err,
                        retryable = err.is_retryable(),
                        "push notification failed"
                    );
                }
            }
        });
    }
}

fn build_payload(task_id: &str, status: &TaskStatus) -> Value {
    json!({
        "eventType": "status",
        "taskId": task_id,
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_task_id_and_state() {
        let status = TaskStatus::completed(None);
        let payload = build_payload("t1", &status);

        assert_eq!(payload["eventType"], json!("status"));
        assert_eq!(payload["taskId"], json!("t1"));
        assert_eq!(payload["status"]["state"], json!("completed"));
        assert!(payload["timestamp"].is_string());
    }
}
