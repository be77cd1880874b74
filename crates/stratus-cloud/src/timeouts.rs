//! Per-operation timeouts
//!
//! Every resource type has default timeouts; configuration may override them
//! with a `timeouts` block such as `{ "create": "30m", "delete": "1h" }`.

use crate::error::{CloudError, Result};
use std::time::Duration;

/// Configuration key holding timeout overrides
pub const TIMEOUTS_KEY: &str = "timeouts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(20 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(20 * 60),
            delete: Duration::from_secs(20 * 60),
        }
    }
}

impl Timeouts {
    /// The same timeout for every operation
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            create: timeout,
            read: timeout,
            update: timeout,
            delete: timeout,
        }
    }

    pub fn with_create(mut self, timeout: Duration) -> Self {
        self.create = timeout;
        self
    }

    pub fn with_update(mut self, timeout: Duration) -> Self {
        self.update = timeout;
        self
    }

    pub fn with_delete(mut self, timeout: Duration) -> Self {
        self.delete = timeout;
        self
    }

    /// Apply overrides from a `timeouts` configuration object
    pub fn resolve(self, overrides: Option<&serde_json::Value>) -> Result<Self> {
        let Some(value) = overrides else {
            return Ok(self);
        };
        if value.is_null() {
            return Ok(self);
        }

        let object = value.as_object().ok_or_else(|| {
            CloudError::invalid_config(format!("{TIMEOUTS_KEY} must be an object"))
        })?;

        let mut resolved = self;
        for (name, raw) in object {
            let text = raw.as_str().ok_or_else(|| {
                CloudError::invalid_config(format!("{TIMEOUTS_KEY}.{name} must be a string"))
            })?;
            let duration = parse_duration(text)
                .map_err(|e| CloudError::invalid_config(format!("{TIMEOUTS_KEY}.{name}: {e}")))?;

            match name.as_str() {
                "create" => resolved.create = duration,
                "read" => resolved.read = duration,
                "update" => resolved.update = duration,
                "delete" => resolved.delete = duration,
                other => {
                    return Err(CloudError::invalid_config(format!(
                        "unknown timeout '{other}', expected create, read, update or delete"
                    )));
                }
            }
        }

        Ok(resolved)
    }
}

/// Parse a duration such as `"30s"`, `"20m"` or `"1h 30m"`
pub fn parse_duration(text: &str) -> Result<Duration> {
    humantime::parse_duration(text.trim())
        .map_err(|e| CloudError::invalid_config(format!("malformed duration '{text}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("20m").unwrap(), Duration::from_secs(1200));
        assert_eq!(parse_duration("1h 30m").unwrap(), Duration::from_secs(5400));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_resolve_overrides() {
        let defaults = Timeouts::default().with_create(Duration::from_secs(60));
        let resolved = defaults
            .resolve(Some(&json!({ "create": "45m", "delete": "2h" })))
            .unwrap();

        assert_eq!(resolved.create, Duration::from_secs(45 * 60));
        assert_eq!(resolved.delete, Duration::from_secs(2 * 3600));
        assert_eq!(resolved.read, defaults.read);
    }

    #[test]
    fn test_resolve_rejects_garbage() {
        let defaults = Timeouts::default();
        assert!(defaults.resolve(Some(&json!({ "create": "forever" }))).is_err());
        assert!(defaults.resolve(Some(&json!({ "import": "1m" }))).is_err());
        assert!(defaults.resolve(Some(&json!({ "create": 30 }))).is_err());
        assert_eq!(defaults.resolve(None).unwrap(), defaults);
    }
}
