//! Resource data handle
//!
//! Carries one resource through a CRUD call: its id, the planned
//! configuration, the prior state (on update) and the state produced by the
//! call. Typed models are decoded from and flattened into it once, at the
//! boundary.

use crate::error::{CloudError, Result};
use crate::timeouts::Timeouts;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default)]
pub struct ResourceData {
    id: Option<String>,
    config: Map<String, Value>,
    prior: Option<Map<String, Value>>,
    state: Map<String, Value>,
    timeouts: Timeouts,
}

fn into_object(value: Value, what: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(CloudError::invalid_config(format!(
            "{what} must be an object, got {other}"
        ))),
    }
}

impl ResourceData {
    /// A resource about to be created
    pub fn planned(config: Value) -> Result<Self> {
        Ok(Self {
            config: into_object(config, "configuration")?,
            ..Default::default()
        })
    }

    /// A resource known from stored state (read, delete, import)
    pub fn stored(id: impl Into<String>, state: Value) -> Result<Self> {
        let state = into_object(state, "state")?;
        Ok(Self {
            id: Some(id.into()),
            config: state.clone(),
            prior: Some(state.clone()),
            state,
            ..Default::default()
        })
    }

    /// A resource whose configuration changed from `prior` to `config`
    pub fn changed(id: impl Into<String>, prior: Value, config: Value) -> Result<Self> {
        let prior = into_object(prior, "state")?;
        Ok(Self {
            id: Some(id.into()),
            config: into_object(config, "configuration")?,
            state: prior.clone(),
            prior: Some(prior),
            ..Default::default()
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Id of a resource that must already exist remotely
    pub fn require_id(&self) -> Result<&str> {
        self.id
            .as_deref()
            .ok_or_else(|| CloudError::invalid_config("resource has no id"))
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// Record that the remote object no longer exists
    pub fn mark_gone(&mut self) {
        self.id = None;
        self.state.clear();
    }

    pub fn is_gone(&self) -> bool {
        self.id.is_none()
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.config
    }

    pub fn prior(&self) -> Option<&Map<String, Value>> {
        self.prior.as_ref()
    }

    pub fn prior_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.prior.as_mut()
    }

    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn set_timeouts(&mut self, timeouts: Timeouts) {
        self.timeouts = timeouts;
    }

    /// Decode the planned configuration into a typed model
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.config.clone()))
            .map_err(|e| CloudError::invalid_config(e.to_string()))
    }

    /// Decode the prior state, if any
    pub fn decode_prior<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.prior
            .as_ref()
            .map(|prior| {
                serde_json::from_value(Value::Object(prior.clone()))
                    .map_err(|e| CloudError::invalid_config(e.to_string()))
            })
            .transpose()
    }

    /// Whether a top-level field differs between prior state and config
    pub fn has_change(&self, field: &str) -> bool {
        let Some(prior) = &self.prior else {
            return false;
        };
        let before = prior.get(field).filter(|v| !v.is_null());
        let after = self.config.get(field).filter(|v| !v.is_null());
        before != after
    }

    /// The subset of `fields` that changed, in the given order
    pub fn changed_fields<'a>(&self, fields: &[&'a str]) -> Vec<&'a str> {
        fields
            .iter()
            .copied()
            .filter(|f| self.has_change(f))
            .collect()
    }

    /// Write a typed model into the resulting state
    pub fn flatten<T: Serialize>(&mut self, model: &T) -> Result<()> {
        match serde_json::to_value(model)? {
            Value::Object(map) => {
                self.state = map;
                Ok(())
            }
            other => Err(CloudError::Transport(format!(
                "flattened state must be an object, got {other}"
            ))),
        }
    }

    pub fn get_state<T: DeserializeOwned>(&self, field: &str) -> Option<T> {
        self.state
            .get(field)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
