//! `yandex_yq_object_storage_connection`
//!
//! Query connections are managed synchronously: calls return the result
//! directly instead of a long-running operation.

use crate::client::Client;
use crate::transport::{ApiRequest, Service};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use stratus_cloud::{CloudError, Field, Resource, ResourceData, Result, Schema, Timeouts};

pub const TYPE_NAME: &str = "yandex_yq_object_storage_connection";

const CONNECTIONS: &str = "fq/v1/connections";

const VISIBILITY: &[&str] = &["SCOPE", "PRIVATE"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionModel {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "default_visibility")]
    pub visibility: String,

    pub bucket: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

fn default_visibility() -> String {
    "PRIVATE".to_string()
}

#[derive(Debug, Deserialize)]
struct RemoteConnection {
    content: RemoteContent,
    #[serde(default)]
    meta: RemoteMeta,
}

#[derive(Debug, Deserialize)]
struct RemoteContent {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    acl: Option<RemoteAcl>,
    setting: RemoteSetting,
}

#[derive(Debug, Deserialize)]
struct RemoteAcl {
    visibility: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteSetting {
    #[serde(default)]
    object_storage: Option<RemoteObjectStorage>,
}

#[derive(Debug, Deserialize)]
struct RemoteObjectStorage {
    bucket: String,
    #[serde(default)]
    auth: Option<RemoteAuth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteAuth {
    #[serde(default)]
    service_account: Option<RemoteServiceAccount>,
}

#[derive(Debug, Deserialize)]
struct RemoteServiceAccount {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteMeta {
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    #[serde(alias = "connectionId")]
    connection_id: String,
}

/// Folder the connection belongs to, as the `project` query parameter
fn project(folder_id: &str) -> String {
    format!("yandexcloud://{folder_id}")
}

fn expand_content(model: &ConnectionModel) -> Result<Value> {
    if !VISIBILITY.contains(&model.visibility.as_str()) {
        return Err(CloudError::invalid_config(format!(
            "visibility: '{}' is not one of {}",
            model.visibility,
            VISIBILITY.join(", ")
        )));
    }

    let auth = match &model.service_account_id {
        Some(id) => json!({ "serviceAccount": { "id": id } }),
        None => json!({ "none": {} }),
    };
    Ok(json!({
        "name": model.name,
        "description": model.description.clone().unwrap_or_default(),
        "acl": { "visibility": model.visibility },
        "setting": {
            "objectStorage": {
                "bucket": model.bucket,
                "auth": auth,
            }
        },
    }))
}

fn flatten_connection(remote: RemoteConnection, folder_id: Option<String>) -> Result<ConnectionModel> {
    let storage = remote.content.setting.object_storage.ok_or_else(|| {
        CloudError::Transport(format!(
            "connection {} is not an object storage connection",
            remote.content.name
        ))
    })?;

    Ok(ConnectionModel {
        name: remote.content.name,
        folder_id,
        description: Some(remote.content.description).filter(|s| !s.is_empty()),
        visibility: remote
            .content
            .acl
            .map(|acl| acl.visibility)
            .unwrap_or_else(default_visibility),
        bucket: storage.bucket,
        service_account_id: storage
            .auth
            .and_then(|auth| auth.service_account)
            .map(|sa| sa.id),
        created_by: remote.meta.created_by,
        created_at: remote.meta.created_at,
    })
}

async fn refresh(client: &Client, data: &mut ResourceData, timeout: Duration) -> Result<()> {
    let id = data.require_id()?.to_string();
    let known: ConnectionModel = data.decode()?;
    let folder_id = client.config().folder_id_or(known.folder_id.as_deref())?;

    let remote: RemoteConnection = client
        .call(
            ApiRequest::get(Service::Query, format!("{CONNECTIONS}/{id}"))
                .with_query("project", project(&folder_id)),
            timeout,
        )
        .await?;
    data.flatten(&flatten_connection(remote, Some(folder_id))?)
}

pub struct YqObjectStorageConnection;

#[async_trait]
impl Resource<Client> for YqObjectStorageConnection {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::string("name").required().non_empty(),
            Field::string("folder_id").optional_computed().force_new(),
            Field::string("description"),
            Field::string("visibility")
                .default(json!("PRIVATE"))
                .one_of(VISIBILITY),
            Field::string("bucket").required().non_empty(),
            Field::string("service_account_id"),
            Field::string("created_by").computed(),
            Field::string("created_at").computed(),
        ])
    }

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::uniform(Duration::from_secs(60))
    }

    async fn create(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let model: ConnectionModel = data.decode()?;
        let folder_id = client.config().folder_id_or(model.folder_id.as_deref())?;

        let created: Created = client
            .call(
                ApiRequest::post(Service::Query, CONNECTIONS, expand_content(&model)?)
                    .with_query("project", project(&folder_id)),
                data.timeouts().create,
            )
            .await?;
        data.set_id(created.connection_id);
        data.config_mut().insert("folder_id".to_string(), json!(folder_id));

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn read(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn update(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        let model: ConnectionModel = data.decode()?;
        let folder_id = client.config().folder_id_or(model.folder_id.as_deref())?;

        // Connections are replaced as a whole; there is no field mask.
        client
            .send(
                ApiRequest::patch(
                    Service::Query,
                    format!("{CONNECTIONS}/{id}"),
                    expand_content(&model)?,
                )
                .with_query("project", project(&folder_id)),
                data.timeouts().update,
            )
            .await?;

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn delete(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        let folder: Option<String> = data.get_state("folder_id");
        let folder_id = client.config().folder_id_or(folder.as_deref())?;
        client
            .send(
                ApiRequest::delete(Service::Query, format!("{CONNECTIONS}/{id}"))
                    .with_query("project", project(&folder_id)),
                data.timeouts().delete,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(value: Value) -> ConnectionModel {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_expand_content() {
        let content = expand_content(&model(json!({
            "name": "logs",
            "bucket": "app-logs",
            "service_account_id": "aje1",
            "visibility": "SCOPE"
        })))
        .unwrap();

        assert_eq!(content["acl"]["visibility"], "SCOPE");
        assert_eq!(content["setting"]["objectStorage"]["bucket"], "app-logs");
        assert_eq!(content["setting"]["objectStorage"]["auth"]["serviceAccount"]["id"], "aje1");
    }

    #[test]
    fn test_public_bucket_has_no_auth() {
        let content = expand_content(&model(json!({ "name": "open", "bucket": "public" }))).unwrap();
        assert_eq!(content["acl"]["visibility"], "PRIVATE");
        assert!(content["setting"]["objectStorage"]["auth"].get("none").is_some());
    }

    #[test]
    fn test_visibility_is_validated_locally() {
        let schema = YqObjectStorageConnection.schema();
        let config = json!({ "name": "logs", "bucket": "b", "visibility": "PUBLIC" });
        let err = schema.validate(config.as_object().unwrap()).unwrap_err();
        assert!(err.to_string().contains("visibility"));

        assert!(expand_content(&model(json!({ "name": "x", "bucket": "b", "visibility": "public" }))).is_err());
    }

    #[test]
    fn test_flatten_connection() {
        let remote: RemoteConnection = serde_json::from_value(json!({
            "content": {
                "name": "logs",
                "acl": { "visibility": "SCOPE" },
                "setting": { "objectStorage": { "bucket": "app-logs", "auth": { "serviceAccount": { "id": "aje1" } } } }
            },
            "meta": { "id": "yq1", "createdBy": "user@example.com" }
        }))
        .unwrap();

        let model = flatten_connection(remote, Some("b1g".into())).unwrap();
        assert_eq!(model.service_account_id.as_deref(), Some("aje1"));
        assert_eq!(model.created_by.as_deref(), Some("user@example.com"));
        assert_eq!(model.description, None);
    }
}
