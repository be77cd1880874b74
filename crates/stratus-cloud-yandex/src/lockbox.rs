//! `yandex_lockbox_secret`
//!
//! Secret payload is never read back: the stored entries are the configured
//! ones. A changed payload is written as a new secret version.

use crate::client::Client;
use crate::transport::{ApiRequest, Service};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use stratus_cloud::{CloudError, Field, Resource, ResourceData, Result, Schema, diff_by_key};

pub const TYPE_NAME: &str = "yandex_lockbox_secret";

const SECRETS: &str = "lockbox/v1/secrets";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,

    #[serde(default)]
    pub deletion_protection: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<Entry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub text_value: String,
}

impl Entry {
    fn payload(&self) -> Value {
        json!({ "key": self.key, "textValue": self.text_value })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteSecret {
    folder_id: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    kms_key_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    current_version: Option<RemoteVersion>,
    #[serde(default)]
    deletion_protection: bool,
}

#[derive(Debug, Deserialize)]
struct RemoteVersion {
    id: String,
}

fn check_entries(entries: &[Entry]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for entry in entries {
        if !seen.insert(entry.key.as_str()) {
            return Err(CloudError::invalid_config(format!(
                "entries: duplicate key '{}'",
                entry.key
            )));
        }
    }
    Ok(())
}

fn payload(entries: &[Entry]) -> Vec<Value> {
    entries.iter().map(Entry::payload).collect()
}

fn expand_create(model: &SecretModel, folder_id: &str) -> Value {
    let mut body = json!({
        "folderId": folder_id,
        "name": model.name.clone().unwrap_or_default(),
        "description": model.description.clone().unwrap_or_default(),
        "labels": model.labels,
        "deletionProtection": model.deletion_protection,
    });
    if let Some(key) = &model.kms_key_id {
        body["kmsKeyId"] = json!(key);
    }
    if !model.entries.is_empty() {
        body["versionPayloadEntries"] = json!(payload(&model.entries));
        body["versionDescription"] = json!(model.version_description.clone().unwrap_or_default());
    }
    body
}

fn expand_update(model: &SecretModel, changed: &[&str]) -> Value {
    let mut mask = Vec::new();
    let mut body = json!({});
    for field in changed {
        match *field {
            "name" => {
                mask.push("name");
                body["name"] = json!(model.name.clone().unwrap_or_default());
            }
            "description" => {
                mask.push("description");
                body["description"] = json!(model.description.clone().unwrap_or_default());
            }
            "labels" => {
                mask.push("labels");
                body["labels"] = json!(model.labels);
            }
            "deletion_protection" => {
                mask.push("deletionProtection");
                body["deletionProtection"] = json!(model.deletion_protection);
            }
            _ => {}
        }
    }
    body["updateMask"] = json!(mask.join(","));
    body
}

/// Whether the payload differs beyond entry order
fn payload_changed(before: &[Entry], after: &[Entry]) -> bool {
    let diff = diff_by_key(before, after, |e| e.key.clone(), |a, b| a.text_value == b.text_value);
    if !diff.is_empty() {
        let summary = diff.summary();
        tracing::debug!(
            add = summary.add,
            update = summary.update,
            remove = summary.remove,
            "Secret payload changed"
        );
    }
    !diff.is_empty()
}

async fn refresh(client: &Client, data: &mut ResourceData, timeout: Duration) -> Result<()> {
    let id = data.require_id()?.to_string();
    let known: Option<SecretModel> = data.decode().ok();
    let remote: RemoteSecret = client
        .call(ApiRequest::get(Service::Lockbox, format!("{SECRETS}/{id}")), timeout)
        .await?;

    let (entries, version_description) = known
        .map(|k| (k.entries, k.version_description))
        .unwrap_or_default();
    let model = SecretModel {
        name: Some(remote.name).filter(|s| !s.is_empty()),
        folder_id: Some(remote.folder_id),
        description: Some(remote.description).filter(|s| !s.is_empty()),
        labels: remote.labels,
        kms_key_id: Some(remote.kms_key_id).filter(|s| !s.is_empty()),
        deletion_protection: remote.deletion_protection,
        entries,
        version_description,
        status: remote.status,
        current_version_id: remote.current_version.map(|v| v.id),
        created_at: remote.created_at,
    };
    data.flatten(&model)
}

pub struct LockboxSecret;

#[async_trait]
impl Resource<Client> for LockboxSecret {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::string("name"),
            Field::string("folder_id").optional_computed().force_new(),
            Field::string("description"),
            Field::labels(),
            Field::string("kms_key_id").force_new(),
            Field::bool("deletion_protection").default(json!(false)),
            Field::blocks(
                "entries",
                vec![
                    Field::string("key").required().non_empty(),
                    Field::string("text_value").required().sensitive(),
                ],
            )
            .sensitive(),
            Field::string("version_description"),
            Field::string("status").computed(),
            Field::string("current_version_id").computed(),
            Field::string("created_at").computed(),
        ])
    }

    async fn create(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let model: SecretModel = data.decode()?;
        check_entries(&model.entries)?;
        let folder_id = client.config().folder_id_or(model.folder_id.as_deref())?;

        let op = client
            .call_operation(
                ApiRequest::post(Service::Lockbox, SECRETS, expand_create(&model, &folder_id)),
                data.timeouts().create,
            )
            .await?;
        data.set_id(op.require_metadata("secretId")?);

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn read(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn update(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        let model: SecretModel = data.decode()?;
        check_entries(&model.entries)?;
        let prior: Option<SecretModel> = data.decode_prior().unwrap_or(None);

        let changed = data.changed_fields(&["name", "description", "labels", "deletion_protection"]);
        if !changed.is_empty() {
            client
                .call_operation(
                    ApiRequest::patch(
                        Service::Lockbox,
                        format!("{SECRETS}/{id}"),
                        expand_update(&model, &changed),
                    ),
                    data.timeouts().update,
                )
                .await?;
        }

        let before = prior.map(|p| p.entries).unwrap_or_default();
        if payload_changed(&before, &model.entries) {
            let body = json!({
                "description": model.version_description.clone().unwrap_or_default(),
                "payloadEntries": payload(&model.entries),
            });
            client
                .call_operation(
                    ApiRequest::post(Service::Lockbox, format!("{SECRETS}/{id}:addVersion"), body),
                    data.timeouts().update,
                )
                .await?;
            tracing::info!("Added a new version to secret {}", id);
        }

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn delete(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        client
            .call_operation(
                ApiRequest::delete(Service::Lockbox, format!("{SECRETS}/{id}")),
                data.timeouts().delete,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, value: &str) -> Entry {
        Entry {
            key: key.to_string(),
            text_value: value.to_string(),
        }
    }

    #[test]
    fn test_payload_reorder_is_not_a_change() {
        let before = vec![entry("user", "admin"), entry("password", "s3cret")];
        let after = vec![entry("password", "s3cret"), entry("user", "admin")];
        assert!(!payload_changed(&before, &after));
    }

    #[test]
    fn test_payload_value_change() {
        let before = vec![entry("password", "old")];
        assert!(payload_changed(&before, &[entry("password", "new")]));
        assert!(payload_changed(&before, &[]));
    }

    #[test]
    fn test_duplicate_entry_keys() {
        let err = check_entries(&[entry("a", "1"), entry("a", "2")]).unwrap_err();
        assert!(err.to_string().contains("duplicate key 'a'"));
    }

    #[test]
    fn test_expand_create_with_payload() {
        let model: SecretModel = serde_json::from_value(json!({
            "name": "db",
            "entries": [{ "key": "password", "text_value": "s3cret" }]
        }))
        .unwrap();

        let body = expand_create(&model, "b1g");
        assert_eq!(body["versionPayloadEntries"][0]["textValue"], "s3cret");
        assert!(body.get("kmsKeyId").is_none());
    }
}
