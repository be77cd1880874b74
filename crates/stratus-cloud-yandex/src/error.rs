//! Yandex Cloud provider error types

use stratus_cloud::{CloudError, StatusCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum YandexError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cloud error: {0}")]
    CloudError(#[from] CloudError),
}

pub type Result<T> = std::result::Result<T, YandexError>;

impl From<YandexError> for CloudError {
    fn from(err: YandexError) -> Self {
        match err {
            YandexError::Api { status, message } => CloudError::Api { status, message },
            // Connection failures are what the gRPC stack reports as UNAVAILABLE.
            YandexError::Http(e) if e.is_connect() => {
                CloudError::api(StatusCode::Unavailable, e.to_string())
            }
            YandexError::Http(e) if e.is_timeout() => {
                CloudError::api(StatusCode::DeadlineExceeded, e.to_string())
            }
            YandexError::Http(e) => CloudError::Transport(e.to_string()),
            YandexError::InvalidConfig(msg) => CloudError::InvalidConfig(msg),
            YandexError::MissingEnvVar(var) => {
                CloudError::InvalidConfig(format!("missing environment variable {var}"))
            }
            YandexError::JsonError(e) => CloudError::Json(e),
            YandexError::IoError(e) => CloudError::Io(e),
            YandexError::CloudError(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_survives_conversion() {
        let err: CloudError = YandexError::Api {
            status: StatusCode::Unavailable,
            message: "compute is down".into(),
        }
        .into();

        assert_eq!(err.status(), Some(StatusCode::Unavailable));
        assert!(err.to_string().contains("compute is down"));
    }

    #[test]
    fn test_config_errors_stay_local() {
        let err: CloudError = YandexError::MissingEnvVar("YC_TOKEN".into()).into();
        assert!(matches!(err, CloudError::InvalidConfig(_)));
    }
}
