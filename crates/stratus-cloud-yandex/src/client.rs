//! API client handle
//!
//! Built once by the embedding application and passed by reference into
//! every resource call.

use crate::config::ProviderConfig;
use crate::transport::{ApiRequest, HttpTransport, Service, Transport};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use stratus_cloud::{
    CloudError, Operation, OperationSource, Result, RetryConfig, retry_on_unavailable,
    wait_operation,
};
use tokio::time::Instant;

const PAGE_SIZE: &str = "1000";

#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    config: ProviderConfig,
    retry: RetryConfig,
}

impl Client {
    /// Client talking to the real API over HTTPS
    pub fn new(config: ProviderConfig) -> crate::Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        let retry = config.retry_config();
        Self {
            transport,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Send a request, retrying while the service is unavailable
    pub async fn send(&self, request: ApiRequest, timeout: Duration) -> Result<Value> {
        let transport = &self.transport;
        retry_on_unavailable(&self.retry, timeout, move || transport.send(request.clone())).await
    }

    /// [`Client::send`] decoding the response body
    pub async fn call<T: DeserializeOwned>(&self, request: ApiRequest, timeout: Duration) -> Result<T> {
        let value = self.send(request, timeout).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Collect every page of a list call. Items are read from `field` of
    /// each page; the listing ends when no `nextPageToken` is returned.
    pub async fn list<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        field: &str,
        timeout: Duration,
    ) -> Result<Vec<T>> {
        let deadline = Instant::now() + timeout;
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut page_request = request.clone().with_query("pageSize", PAGE_SIZE);
            if let Some(token) = &page_token {
                page_request = page_request.with_query("pageToken", token.clone());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut page = self.send(page_request, remaining).await?;

            if let Some(list) = page.get_mut(field).map(Value::take) {
                if !list.is_null() {
                    items.extend(serde_json::from_value::<Vec<T>>(list)?);
                }
            }

            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                return Ok(items);
            }
        }
    }

    /// Start a long-running operation and wait for it. The call and the
    /// polling share one deadline.
    pub async fn call_operation(&self, request: ApiRequest, timeout: Duration) -> Result<Operation> {
        let deadline = Instant::now() + timeout;
        let description = request.to_string();

        let operation: Operation = self.call(request, timeout).await?;
        tracing::debug!("{} started operation {}", description, operation.id);

        let remaining = deadline.saturating_duration_since(Instant::now());
        wait_operation(self, operation, self.config.poll_interval, remaining).await
    }
}

#[async_trait]
impl OperationSource for Client {
    async fn get_operation(&self, id: &str) -> Result<Operation> {
        let value = self
            .transport
            .send(ApiRequest::get(Service::Operation, format!("operations/{id}")))
            .await?;
        serde_json::from_value(value).map_err(CloudError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use stratus_cloud::StatusCode;

    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<Result<Value>>>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<Value>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: ApiRequest) -> Result<Value> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CloudError::Transport("script exhausted".into())))
        }
    }

    fn client(transport: Arc<Scripted>) -> Client {
        Client::with_transport(ProviderConfig::default(), transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_retries_unavailable() {
        let transport = Scripted::new(vec![
            Err(CloudError::api(StatusCode::Unavailable, "down")),
            Ok(json!({ "id": "fhm1" })),
        ]);
        let client = client(transport.clone());

        let value: Value = client
            .call(ApiRequest::get(Service::Compute, "compute/v1/disks/fhm1"), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(value["id"], "fhm1");
        assert_eq!(transport.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_follows_page_tokens() {
        let transport = Scripted::new(vec![
            Ok(json!({ "disks": [{ "id": "a" }], "nextPageToken": "p2" })),
            Ok(json!({ "disks": [{ "id": "b" }], "nextPageToken": "" })),
        ]);
        let client = client(transport.clone());

        let disks: Vec<Value> = client
            .list(
                ApiRequest::get(Service::Compute, "compute/v1/disks").with_query("folderId", "b1g"),
                "disks",
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(disks.len(), 2);
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].query_value("pageToken"), None);
        assert_eq!(requests[1].query_value("pageToken"), Some("p2"));
        assert_eq!(requests[1].query_value("folderId"), Some("b1g"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_operation_polls_operation_service() {
        let transport = Scripted::new(vec![
            Ok(json!({ "id": "op1", "done": false })),
            Ok(json!({ "id": "op1", "done": true, "metadata": { "diskId": "fhm1" } })),
        ]);
        let client = client(transport.clone());

        let op = client
            .call_operation(
                ApiRequest::post(Service::Compute, "compute/v1/disks", json!({ "name": "data" })),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(op.metadata_str("diskId"), Some("fhm1"));
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[1].service, Service::Operation);
        assert_eq!(requests[1].path, "operations/op1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_operation_is_terminal() {
        let transport = Scripted::new(vec![Ok(json!({
            "id": "op1",
            "done": true,
            "error": { "code": 9, "message": "disk is in use" }
        }))]);
        let client = client(transport);

        let err = client
            .call_operation(
                ApiRequest::delete(Service::Compute, "compute/v1/disks/fhm1"),
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CloudError::OperationFailed { status: StatusCode::FailedPrecondition, .. }));
    }
}
