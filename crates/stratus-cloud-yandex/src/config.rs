//! Provider configuration
//!
//! Settings are resolved in this order, later sources winning:
//! 1. built-in defaults
//! 2. a JSON file: `STRATUS_CONFIG_PATH`, or `~/.config/stratus/yandex.json`
//!    when it exists
//! 3. environment variables (`YC_TOKEN`, `YC_FOLDER_ID`, ...)

use crate::error::{Result, YandexError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stratus_cloud::{CloudError, RetryConfig};

pub const DEFAULT_ENDPOINT: &str = "api.cloud.yandex.net";

const CONFIG_PATH_ENV: &str = "STRATUS_CONFIG_PATH";
const ENDPOINT_ENV: &str = "YC_ENDPOINT";
const TOKEN_ENV: &str = "YC_TOKEN";
const CLOUD_ID_ENV: &str = "YC_CLOUD_ID";
const FOLDER_ID_ENV: &str = "YC_FOLDER_ID";
const ZONE_ENV: &str = "YC_ZONE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base API domain; service hosts are `<service>.<endpoint>`
    pub endpoint: String,

    /// IAM or OAuth bearer token
    pub token: Option<String>,

    pub cloud_id: Option<String>,

    /// Folder used when a resource does not name one
    pub folder_id: Option<String>,

    /// Zone used when a resource does not name one
    pub zone: Option<String>,

    /// How often long-running operations are polled
    #[serde(with = "duration_text")]
    pub poll_interval: Duration,

    /// Attempt cap for transient failures; unbounded (deadline only) if unset
    pub max_retries: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: None,
            cloud_id: None,
            folder_id: None,
            zone: None,
            poll_interval: Duration::from_secs(2),
            max_retries: None,
        }
    }
}

impl ProviderConfig {
    /// Defaults, then the config file if any, then the environment
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_file() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        tracing::debug!(
            "Provider config: endpoint={}, folder={:?}, zone={:?}",
            config.endpoint,
            config.folder_id,
            config.zone
        );
        Ok(config)
    }

    /// Configuration from environment variables only; a token is required
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.token()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            YandexError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    fn config_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(path));
        }
        let path = dirs::config_dir()?.join("stratus").join("yandex.json");
        path.exists().then_some(path)
    }

    fn apply_env(&mut self) {
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            self.endpoint = endpoint;
        }
        for (var, slot) in [
            (TOKEN_ENV, &mut self.token),
            (CLOUD_ID_ENV, &mut self.cloud_id),
            (FOLDER_ID_ENV, &mut self.folder_id),
            (ZONE_ENV, &mut self.zone),
        ] {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    *slot = Some(value);
                }
            }
        }
    }

    pub fn token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| YandexError::MissingEnvVar(TOKEN_ENV.to_string()))
    }

    /// The resource's folder, falling back to the provider default
    pub fn folder_id_or(&self, explicit: Option<&str>) -> stratus_cloud::Result<String> {
        explicit
            .or(self.folder_id.as_deref())
            .map(str::to_string)
            .ok_or_else(|| {
                CloudError::invalid_config(format!(
                    "folder_id is not set on the resource and {FOLDER_ID_ENV} is not configured"
                ))
            })
    }

    /// The resource's zone, falling back to the provider default
    pub fn zone_or(&self, explicit: Option<&str>) -> stratus_cloud::Result<String> {
        explicit
            .or(self.zone.as_deref())
            .map(str::to_string)
            .ok_or_else(|| {
                CloudError::invalid_config(format!(
                    "zone is not set on the resource and {ZONE_ENV} is not configured"
                ))
            })
    }

    pub fn retry_config(&self) -> RetryConfig {
        let retry = RetryConfig::default();
        match self.max_retries {
            Some(max) => retry.with_max_attempts(max),
            None => retry,
        }
    }
}

mod duration_text {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
