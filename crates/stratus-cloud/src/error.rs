//! Cloud provider error types

use crate::status::StatusCode;
use thiserror::Error;

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation {id} failed ({status}): {message}")]
    OperationFailed {
        id: String,
        status: StatusCode,
        message: String,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn api(status: StatusCode, message: impl Into<String>) -> Self {
        CloudError::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        CloudError::InvalidConfig(message.into())
    }

    /// Status code carried by the error, if it came from the remote side
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CloudError::ResourceNotFound(_) => Some(StatusCode::NotFound),
            CloudError::Api { status, .. } => Some(*status),
            CloudError::OperationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
