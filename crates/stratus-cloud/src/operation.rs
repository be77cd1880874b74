//! Long-running operations
//!
//! Mutating calls return an [`Operation`] handle that is polled until the
//! remote side reports it done.

use crate::error::{CloudError, Result};
use crate::retry::{Retry, classify};
use crate::status::StatusCode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout_at};

/// A long-running remote operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub done: bool,

    /// Service-specific metadata, usually carrying the affected object id
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,

    #[serde(default)]
    pub error: Option<OperationError>,

    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

/// Error reported by a failed operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationError {
    pub code: i32,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub details: Vec<serde_json::Value>,
}

impl Operation {
    /// Convert a finished operation into an error if it failed
    pub fn into_result(self) -> Result<Operation> {
        match self.error {
            Some(ref error) => Err(CloudError::OperationFailed {
                id: self.id.clone(),
                status: StatusCode::from_code(error.code),
                message: error.message.clone(),
            }),
            None => Ok(self),
        }
    }

    /// String field of the metadata object (e.g. `diskId`)
    pub fn metadata_str(&self, field: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(field)?.as_str()
    }

    /// Like [`Operation::metadata_str`] but a missing field is an error
    pub fn require_metadata(&self, field: &str) -> Result<String> {
        self.metadata_str(field).map(str::to_string).ok_or_else(|| {
            CloudError::Transport(format!(
                "operation {} metadata does not contain {}",
                self.id, field
            ))
        })
    }

    /// Decode the operation response
    pub fn response_as<T: DeserializeOwned>(&self) -> Result<T> {
        let response = self.response.clone().ok_or_else(|| {
            CloudError::Transport(format!("operation {} has no response", self.id))
        })?;
        Ok(serde_json::from_value(response)?)
    }
}

/// Something that can report the current state of an operation
#[async_trait]
pub trait OperationSource: Send + Sync {
    async fn get_operation(&self, id: &str) -> Result<Operation>;
}

/// Poll `operation` until it is done, failing terminally on error or when
/// `timeout` elapses. Transient poll failures are skipped. A poll that hangs
/// is cut off at the deadline too.
pub async fn wait_operation<S>(
    source: &S,
    operation: Operation,
    interval: Duration,
    timeout: Duration,
) -> Result<Operation>
where
    S: OperationSource + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut current = operation;

    loop {
        if current.done {
            tracing::debug!("Operation {} finished: {}", current.id, current.description);
            return current.into_result();
        }

        let timed_out = |op: &Operation| {
            CloudError::Timeout(format!(
                "operation {} ({}) did not finish within {}",
                op.id,
                op.description,
                humantime::format_duration(timeout)
            ))
        };

        if Instant::now() + interval > deadline {
            return Err(timed_out(&current));
        }
        sleep(interval).await;

        let polled = match timeout_at(deadline, source.get_operation(&current.id)).await {
            Ok(polled) => polled,
            Err(_) => return Err(timed_out(&current)),
        };
        match polled {
            Ok(op) => current = op,
            Err(err) if classify(&err) == Retry::Transient => {
                tracing::debug!("Polling operation {} failed, will retry: {}", current.id, err);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::collections::VecDeque;

    struct Script(Mutex<VecDeque<Result<Operation>>>);

    impl Script {
        fn new(steps: Vec<Result<Operation>>) -> Self {
            Self(Mutex::new(steps.into()))
        }
    }

    #[async_trait]
    impl OperationSource for Script {
        async fn get_operation(&self, id: &str) -> Result<Operation> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(pending(id)))
        }
    }

    fn pending(id: &str) -> Operation {
        serde_json::from_value(json!({ "id": id, "done": false })).unwrap()
    }

    fn finished(id: &str) -> Operation {
        serde_json::from_value(json!({
            "id": id,
            "description": "Create disk",
            "done": true,
            "metadata": { "diskId": "fhm123" },
            "response": { "id": "fhm123", "name": "data" }
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_operation() {
        let op: Operation = serde_json::from_value(json!({
            "id": "op1",
            "createdAt": "2024-03-01T10:00:00Z",
            "done": true,
            "error": { "code": 9, "message": "disk is attached" }
        }))
        .unwrap();

        assert!(op.created_at.is_some());
        let err = op.into_result().unwrap_err();
        match err {
            CloudError::OperationFailed { status, message, .. } => {
                assert_eq!(status, StatusCode::FailedPrecondition);
                assert_eq!(message, "disk is attached");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_metadata_and_response() {
        let op = finished("op1");
        assert_eq!(op.metadata_str("diskId"), Some("fhm123"));
        assert!(op.require_metadata("clusterId").is_err());

        let response: serde_json::Value = op.response_as().unwrap();
        assert_eq!(response["name"], "data");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_done() {
        let source = Script::new(vec![
            Ok(pending("op1")),
            Err(CloudError::api(StatusCode::Unavailable, "blip")),
            Ok(finished("op1")),
        ]);

        let op = wait_operation(&source, pending("op1"), Duration::from_secs(1), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(op.done);
        assert_eq!(op.metadata_str("diskId"), Some("fhm123"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let source = Script::new(Vec::new());

        let result =
            wait_operation(&source, pending("op1"), Duration::from_secs(1), Duration::from_secs(5)).await;

        assert!(matches!(result, Err(CloudError::Timeout(_))));
    }

    struct Hanging;

    #[async_trait]
    impl OperationSource for Hanging {
        async fn get_operation(&self, _id: &str) -> Result<Operation> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_poll_hits_deadline() {
        let started = Instant::now();
        let result =
            wait_operation(&Hanging, pending("op1"), Duration::from_secs(1), Duration::from_secs(5)).await;

        assert!(matches!(result, Err(CloudError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_poll_error() {
        let source = Script::new(vec![Err(CloudError::api(StatusCode::PermissionDenied, "no"))]);

        let result =
            wait_operation(&source, pending("op1"), Duration::from_secs(1), Duration::from_secs(60)).await;

        assert!(matches!(result, Err(CloudError::Api { status: StatusCode::PermissionDenied, .. })));
    }
}
