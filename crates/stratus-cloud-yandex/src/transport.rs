//! REST transport
//!
//! Every Yandex Cloud service lives on its own host under the API endpoint
//! (`compute.api.cloud.yandex.net`, `mdb.api.cloud.yandex.net`, ...). Errors
//! come back as `{ "code": <grpc code>, "message": ... }`.

use crate::config::ProviderConfig;
use crate::error::{Result, YandexError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use stratus_cloud::{CloudError, StatusCode};

/// HTTP method of an API call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// API service a request is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Compute,
    Operation,
    PostgreSql,
    ClickHouse,
    CertificateManager,
    Lockbox,
    ServerlessContainers,
    Ydb,
    Query,
}

impl Service {
    /// ホスト名の先頭部分
    pub fn host_prefix(self) -> &'static str {
        match self {
            Service::Compute => "compute",
            Service::Operation => "operation",
            Service::PostgreSql | Service::ClickHouse => "mdb",
            Service::CertificateManager => "certificate-manager",
            Service::Lockbox => "lockbox",
            Service::ServerlessContainers => "serverless-containers",
            Service::Ydb => "ydb",
            Service::Query => "query",
        }
    }
}

/// A single REST call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub service: Service,
    pub method: Method,
    /// Path below the service host, e.g. `compute/v1/disks/fhm1`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    fn new(service: Service, method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            service,
            method,
            path: path.into(),
            query: Vec::new(),
            body,
        }
    }

    pub fn get(service: Service, path: impl Into<String>) -> Self {
        Self::new(service, Method::Get, path, None)
    }

    pub fn post(service: Service, path: impl Into<String>, body: Value) -> Self {
        Self::new(service, Method::Post, path, Some(body))
    }

    pub fn patch(service: Service, path: impl Into<String>, body: Value) -> Self {
        Self::new(service, Method::Patch, path, Some(body))
    }

    pub fn delete(service: Service, path: impl Into<String>) -> Self {
        Self::new(service, Method::Delete, path, None)
    }

    pub fn with_query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    /// Value of a query parameter, if set
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.method, self.service.host_prefix(), self.path)
    }
}

/// Sends API requests and returns the decoded JSON body
///
/// An empty response body is returned as `Value::Null`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> stratus_cloud::Result<Value>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<i32>,
    #[serde(default)]
    message: String,
}

/// Map an HTTP status to the gRPC status the gateway would have reported
pub fn status_from_http(status: u16) -> StatusCode {
    match status {
        400 => StatusCode::InvalidArgument,
        401 => StatusCode::Unauthenticated,
        403 => StatusCode::PermissionDenied,
        404 => StatusCode::NotFound,
        409 => StatusCode::AlreadyExists,
        429 => StatusCode::ResourceExhausted,
        499 => StatusCode::Cancelled,
        500 => StatusCode::Internal,
        501 => StatusCode::Unimplemented,
        502 | 503 => StatusCode::Unavailable,
        504 => StatusCode::DeadlineExceeded,
        _ => StatusCode::Unknown,
    }
}

/// Decode an error response. The body's gRPC code wins over the HTTP status.
fn api_error(http_status: u16, body: &str) -> YandexError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            code: Some(code),
            message,
        }) => YandexError::Api {
            status: StatusCode::from_code(code),
            message,
        },
        Ok(ErrorBody {
            code: None,
            message,
        }) if !message.is_empty() => YandexError::Api {
            status: status_from_http(http_status),
            message,
        },
        _ => YandexError::Api {
            status: status_from_http(http_status),
            message: if body.trim().is_empty() {
                format!("HTTP {http_status}")
            } else {
                body.trim().to_string()
            },
        },
    }
}

/// reqwest-based transport authenticating with a bearer token
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpTransport {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let token = config.token()?.to_string();
        let client = reqwest::Client::builder()
            .user_agent(concat!("stratus/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            token,
        })
    }

    /// Full URL of a request. The endpoint may carry its own scheme.
    pub fn url_for(&self, request: &ApiRequest) -> String {
        let (scheme, host) = self
            .endpoint
            .split_once("://")
            .unwrap_or(("https", self.endpoint.as_str()));
        format!(
            "{}://{}.{}/{}",
            scheme,
            request.service.host_prefix(),
            host.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        )
    }

    async fn execute(&self, request: ApiRequest) -> Result<Value> {
        let url = self.url_for(&request);
        tracing::debug!("{} {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method.as_reqwest(), &url)
            .bearer_auth(&self.token);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let err = api_error(status.as_u16(), &text);
            tracing::debug!("{} {} failed: {}", request.method, url, err);
            return Err(err);
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> stratus_cloud::Result<Value> {
        self.execute(request).await.map_err(CloudError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(endpoint: &str) -> HttpTransport {
        let config = ProviderConfig {
            endpoint: endpoint.to_string(),
            token: Some("t1.test".into()),
            ..Default::default()
        };
        HttpTransport::new(&config).unwrap()
    }

    #[test]
    fn test_url_per_service() {
        let t = transport("api.cloud.yandex.net");
        let disk = ApiRequest::get(Service::Compute, "compute/v1/disks/fhm1");
        assert_eq!(
            t.url_for(&disk),
            "https://compute.api.cloud.yandex.net/compute/v1/disks/fhm1"
        );

        let cluster = ApiRequest::get(Service::PostgreSql, "/managed-postgresql/v1/clusters");
        assert_eq!(
            t.url_for(&cluster),
            "https://mdb.api.cloud.yandex.net/managed-postgresql/v1/clusters"
        );

        let local = transport("http://localhost:8080/");
        assert_eq!(
            local.url_for(&ApiRequest::get(Service::Operation, "operations/op1")),
            "http://operation.localhost:8080/operations/op1"
        );
    }

    #[test]
    fn test_transport_requires_token() {
        let result = HttpTransport::new(&ProviderConfig::default());
        assert!(matches!(result, Err(YandexError::MissingEnvVar(_))));
    }

    #[test]
    fn test_error_body_code_wins() {
        let err = api_error(400, r#"{"code": 14, "message": "try again"}"#);
        match err {
            YandexError::Api { status, message } => {
                assert_eq!(status, StatusCode::Unavailable);
                assert_eq!(message, "try again");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_falls_back_to_http_status() {
        let err: CloudError = api_error(404, "").into();
        assert!(err.is_not_found());

        let err: CloudError = api_error(503, "<html>bad gateway</html>").into();
        assert_eq!(err.status(), Some(StatusCode::Unavailable));
        assert!(err.to_string().contains("bad gateway"));
    }

    #[test]
    fn test_request_builders() {
        let request = ApiRequest::get(Service::Compute, "compute/v1/disks")
            .with_query("folderId", "b1g")
            .with_query("pageToken", "next");

        assert_eq!(request.query_value("pageToken"), Some("next"));
        assert_eq!(request.to_string(), "GET compute:compute/v1/disks");
    }
}
