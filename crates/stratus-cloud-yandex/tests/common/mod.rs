use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stratus_cloud::{CloudError, Result, StatusCode};
use stratus_cloud_yandex::{ApiRequest, Client, ProviderConfig, Transport, YandexProvider};

/// A scripted API: every request must match the next expected
/// `"METHOD path"` line, which answers with the given response.
#[derive(Default)]
pub struct FakeApi {
    steps: Mutex<VecDeque<(String, Result<Value>)>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn expect(&self, call: &str, response: Value) -> &Self {
        self.steps
            .lock()
            .unwrap()
            .push_back((call.to_string(), Ok(response)));
        self
    }

    #[allow(dead_code)]
    pub fn fail(&self, call: &str, status: StatusCode, message: &str) -> &Self {
        self.steps
            .lock()
            .unwrap()
            .push_back((call.to_string(), Err(CloudError::api(status, message))));
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// `"METHOD path"` of every request made so far
    #[allow(dead_code)]
    pub fn calls(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }

    pub fn assert_finished(&self) {
        let left: Vec<String> = self
            .steps
            .lock()
            .unwrap()
            .iter()
            .map(|(call, _)| call.clone())
            .collect();
        assert!(left.is_empty(), "expected calls never made: {left:?}");
    }
}

#[async_trait]
impl Transport for FakeApi {
    async fn send(&self, request: ApiRequest) -> Result<Value> {
        let call = format!("{} {}", request.method, request.path);
        self.requests.lock().unwrap().push(request);

        let (expected, response) = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected call {call}"));
        assert_eq!(call, expected, "calls out of order");
        response
    }
}

pub fn config() -> ProviderConfig {
    ProviderConfig {
        token: Some("t1.test".into()),
        folder_id: Some("b1gfolder".into()),
        zone: Some("ru-central1-a".into()),
        poll_interval: Duration::from_millis(100),
        ..Default::default()
    }
}

pub fn provider(api: &Arc<FakeApi>) -> YandexProvider {
    YandexProvider::new(Client::with_transport(config(), api.clone()))
}

/// A finished operation carrying `metadata`
pub fn done(metadata: Value) -> Value {
    json!({ "id": "op1", "description": "test", "done": true, "metadata": metadata })
}

/// A running operation
#[allow(dead_code)]
pub fn running() -> Value {
    json!({ "id": "op1", "description": "test", "done": false })
}
