//! `yandex_ydb_database_serverless`

use crate::GIB;
use crate::client::Client;
use crate::transport::{ApiRequest, Service};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use stratus_cloud::{Field, Resource, ResourceData, Result, Schema, Timeouts};

pub const TYPE_NAME: &str = "yandex_ydb_database_serverless";

const DATABASES: &str = "ydb/v1/databases";
const DEFAULT_LOCATION: &str = "ru-central1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseModel {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,

    #[serde(default)]
    pub deletion_protection: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serverless_database: Option<ServerlessLimits>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ydb_full_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ydb_api_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_api_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Request-unit and storage limits
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerlessLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttling_rcu_limit: Option<i64>,

    /// Storage limit in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_size_limit: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_throttling_rcu_limit: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned_rcu_limit: Option<i64>,
}

impl ServerlessLimits {
    fn spec(&self) -> Value {
        let mut spec = json!({});
        if let Some(limit) = self.throttling_rcu_limit {
            spec["throttlingRcuLimit"] = json!(limit.to_string());
        }
        if let Some(size) = self.storage_size_limit {
            spec["storageSizeLimit"] = json!((size * GIB).to_string());
        }
        if let Some(enabled) = self.enable_throttling_rcu_limit {
            spec["enableThrottlingRcuLimit"] = json!(enabled);
        }
        if let Some(limit) = self.provisioned_rcu_limit {
            spec["provisionedRcuLimit"] = json!(limit.to_string());
        }
        spec
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteDatabase {
    folder_id: String,
    #[serde(default)]
    created_at: Option<String>,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    document_api_endpoint: String,
    #[serde(default)]
    database_path: String,
    #[serde(default)]
    location_id: String,
    #[serde(default)]
    serverless_database: Option<RemoteLimits>,
    #[serde(default)]
    deletion_protection: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteLimits {
    #[serde(default, with = "crate::int64::option")]
    throttling_rcu_limit: Option<i64>,
    #[serde(default, with = "crate::int64::option")]
    storage_size_limit: Option<i64>,
    #[serde(default)]
    enable_throttling_rcu_limit: Option<bool>,
    #[serde(default, with = "crate::int64::option")]
    provisioned_rcu_limit: Option<i64>,
}

impl From<RemoteLimits> for ServerlessLimits {
    fn from(limits: RemoteLimits) -> Self {
        Self {
            throttling_rcu_limit: limits.throttling_rcu_limit,
            storage_size_limit: limits.storage_size_limit.map(|bytes| bytes / GIB),
            enable_throttling_rcu_limit: limits.enable_throttling_rcu_limit,
            provisioned_rcu_limit: limits.provisioned_rcu_limit,
        }
    }
}

/// Split `grpcs://host:2135/?database=/path` into the API endpoint
/// (`host:2135`) and whether it uses TLS.
fn split_endpoint(full: &str) -> Option<(String, bool)> {
    let (tls, rest) = match full.split_once("://") {
        Some(("grpcs", rest)) => (true, rest),
        Some(("grpc", rest)) => (false, rest),
        _ => return None,
    };
    let host = rest.split(['/', '?']).next().filter(|h| !h.is_empty())?;
    Some((host.to_string(), tls))
}

fn expand_create(model: &DatabaseModel, folder_id: &str) -> Value {
    json!({
        "folderId": folder_id,
        "name": model.name,
        "description": model.description.clone().unwrap_or_default(),
        "labels": model.labels,
        "locationId": model.location_id.as_deref().unwrap_or(DEFAULT_LOCATION),
        "deletionProtection": model.deletion_protection,
        "serverlessDatabase": model.serverless_database.clone().unwrap_or_default().spec(),
    })
}

fn expand_update(model: &DatabaseModel, id: &str, changed: &[&str]) -> Value {
    let mut mask = Vec::new();
    let mut body = json!({ "databaseId": id });
    for field in changed {
        match *field {
            "name" => {
                mask.push("name");
                body["name"] = json!(model.name);
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
            "serverless_database" => {
                mask.push("serverlessDatabase");
                body["serverlessDatabase"] =
                    model.serverless_database.clone().unwrap_or_default().spec();
            }
            _ => {}
        }
    }
    body["updateMask"] = json!(mask.join(","));
    body
}

async fn refresh(client: &Client, data: &mut ResourceData, timeout: Duration) -> Result<()> {
    let id = data.require_id()?.to_string();
    let db: RemoteDatabase = client
        .call(ApiRequest::get(Service::Ydb, format!("{DATABASES}/{id}")), timeout)
        .await?;

    let endpoint = split_endpoint(&db.endpoint);
    if endpoint.is_none() && !db.endpoint.is_empty() {
        tracing::warn!("Unrecognized endpoint '{}' for database {}", db.endpoint, id);
    }
    let non_empty = |s: String| Some(s).filter(|s| !s.is_empty());
    let model = DatabaseModel {
        name: db.name,
        folder_id: Some(db.folder_id),
        description: non_empty(db.description),
        labels: db.labels,
        location_id: non_empty(db.location_id),
        deletion_protection: db.deletion_protection,
        serverless_database: db.serverless_database.map(ServerlessLimits::from),
        ydb_api_endpoint: endpoint.as_ref().map(|(host, _)| host.clone()),
        tls_enabled: endpoint.map(|(_, tls)| tls),
        ydb_full_endpoint: non_empty(db.endpoint),
        database_path: non_empty(db.database_path),
        document_api_endpoint: non_empty(db.document_api_endpoint),
        status: db.status,
        created_at: db.created_at,
    };
    data.flatten(&model)
}

pub struct YdbDatabaseServerless;

#[async_trait]
impl Resource<Client> for YdbDatabaseServerless {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::string("name").required().non_empty(),
            Field::string("folder_id").optional_computed().force_new(),
            Field::string("description"),
            Field::labels(),
            Field::string("location_id").optional_computed().force_new(),
            Field::bool("deletion_protection").default(json!(false)),
            Field::object(
                "serverless_database",
                vec![
                    Field::int("throttling_rcu_limit").optional_computed(),
                    Field::int("storage_size_limit")
                        .optional_computed()
                        .int_range(1, 50)
                        .describe("Storage limit in GiB"),
                    Field::bool("enable_throttling_rcu_limit").optional_computed(),
                    Field::int("provisioned_rcu_limit").optional_computed(),
                ],
            )
            .optional_computed(),
            Field::string("ydb_full_endpoint").computed(),
            Field::string("ydb_api_endpoint").computed(),
            Field::bool("tls_enabled").computed(),
            Field::string("database_path").computed(),
            Field::string("document_api_endpoint").computed(),
            Field::string("status").computed(),
            Field::string("created_at").computed(),
        ])
    }

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::default().with_update(Duration::from_secs(20 * 60))
    }

    async fn create(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let model: DatabaseModel = data.decode()?;
        let folder_id = client.config().folder_id_or(model.folder_id.as_deref())?;

        let op = client
            .call_operation(
                ApiRequest::post(Service::Ydb, DATABASES, expand_create(&model, &folder_id)),
                data.timeouts().create,
            )
            .await?;
        data.set_id(op.require_metadata("databaseId")?);

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn read(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn update(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        let model: DatabaseModel = data.decode()?;

        let changed = data.changed_fields(&[
            "name",
            "description",
            "labels",
            "deletion_protection",
            "serverless_database",
        ]);
        if !changed.is_empty() {
            client
                .call_operation(
                    ApiRequest::patch(
                        Service::Ydb,
                        format!("{DATABASES}/{id}"),
                        expand_update(&model, &id, &changed),
                    ),
                    data.timeouts().update,
                )
                .await?;
        }

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn delete(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        client
            .call_operation(
                ApiRequest::delete(Service::Ydb, format!("{DATABASES}/{id}")),
                data.timeouts().delete,
            )
            .await?;
        Ok(())
    }
}
