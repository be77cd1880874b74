//! `yandex_serverless_container`
//!
//! The container itself only carries metadata. Everything that describes
//! what runs (image, resources, limits) lives in an immutable revision, so
//! a change to any of those fields deploys a new revision.

use crate::client::Client;
use crate::transport::{ApiRequest, Service};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use stratus_cloud::{
    CloudError, Field, FieldType, Resource, ResourceData, Result, Schema, parse_duration,
};

pub const TYPE_NAME: &str = "yandex_serverless_container";

const CONTAINERS: &str = "containers/v1/containers";
const REVISIONS: &str = "containers/v1/revisions";

const MIB: i64 = 1 << 20;

/// Fields that live in a revision rather than on the container
const REVISION_FIELDS: &[&str] = &[
    "memory",
    "cores",
    "core_fraction",
    "execution_timeout",
    "concurrency",
    "service_account_id",
    "image",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerModel {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Memory in MiB
    pub memory: i64,

    #[serde(default = "default_cores")]
    pub cores: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_fraction: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_id: Option<String>,

    pub image: ImageModel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

fn default_cores() -> i64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageModel {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteContainer {
    folder_id: String,
    #[serde(default)]
    created_at: Option<String>,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteRevision {
    id: String,
    image: RemoteImage,
    resources: RemoteResources,
    #[serde(default)]
    execution_timeout: Option<String>,
    #[serde(default, with = "crate::int64::option")]
    concurrency: Option<i64>,
    #[serde(default)]
    service_account_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteImage {
    image_url: String,
    #[serde(default)]
    image_digest: Option<String>,
    #[serde(default)]
    command: Option<RemoteCommand>,
    #[serde(default)]
    args: Option<RemoteArgs>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    working_dir: String,
}

#[derive(Debug, Deserialize)]
struct RemoteCommand {
    #[serde(default)]
    command: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteArgs {
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteResources {
    #[serde(with = "crate::int64")]
    memory: i64,
    #[serde(default, with = "crate::int64::option")]
    cores: Option<i64>,
    #[serde(default, with = "crate::int64::option")]
    core_fraction: Option<i64>,
}

/// Duration in the API's JSON form, e.g. `"30s"` or `"2.5s"`
fn api_duration(text: &str) -> Result<Duration> {
    text.strip_suffix('s')
        .and_then(|secs| secs.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| CloudError::Transport(format!("unexpected duration '{text}' in response")))
}

fn format_api_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}s", duration.as_secs_f64())
    }
}

fn expand_revision(model: &ContainerModel, container_id: &str) -> Result<Value> {
    let mut image = json!({
        "imageUrl": model.image.url,
        "environment": model.image.environment,
    });
    if let Some(dir) = &model.image.work_dir {
        image["workingDir"] = json!(dir);
    }
    if !model.image.command.is_empty() {
        image["command"] = json!({ "command": model.image.command });
    }
    if !model.image.args.is_empty() {
        image["args"] = json!({ "args": model.image.args });
    }

    let mut resources = json!({
        "memory": (model.memory * MIB).to_string(),
        "cores": model.cores.to_string(),
    });
    if let Some(fraction) = model.core_fraction {
        resources["coreFraction"] = json!(fraction.to_string());
    }

    let mut body = json!({
        "containerId": container_id,
        "imageSpec": image,
        "resources": resources,
    });
    if let Some(timeout) = &model.execution_timeout {
        body["executionTimeout"] = json!(format_api_duration(parse_duration(timeout)?));
    }
    if let Some(concurrency) = model.concurrency {
        body["concurrency"] = json!(concurrency.to_string());
    }
    if let Some(account) = &model.service_account_id {
        body["serviceAccountId"] = json!(account);
    }
    Ok(body)
}

fn expand_update(model: &ContainerModel, changed: &[&str]) -> Value {
    let mut body = json!({ "updateMask": changed.join(",") });
    for field in changed {
        match *field {
            "name" => body["name"] = json!(model.name),
            "description" => {
                body["description"] = json!(model.description.clone().unwrap_or_default())
            }
            "labels" => body["labels"] = json!(model.labels),
            _ => {}
        }
    }
    body
}

/// Keep the configured spelling of an equal timeout (`"1m"` vs `"60s"`)
fn flatten_timeout(configured: Option<&str>, remote: Option<&str>) -> Result<Option<String>> {
    let Some(remote) = remote else {
        return Ok(None);
    };
    let remote_duration = api_duration(remote)?;
    if let Some(text) = configured {
        if parse_duration(text).ok() == Some(remote_duration) {
            return Ok(Some(text.to_string()));
        }
    }
    Ok(Some(humantime::format_duration(remote_duration).to_string()))
}

async fn deploy_revision(
    client: &Client,
    model: &ContainerModel,
    container_id: &str,
    timeout: Duration,
) -> Result<String> {
    let body = expand_revision(model, container_id)?;
    let op = client
        .call_operation(
            ApiRequest::post(
                Service::ServerlessContainers,
                format!("{REVISIONS}:deployRevision"),
                body,
            ),
            timeout,
        )
        .await?;
    let revision = op.require_metadata("containerRevisionId")?;
    tracing::info!("Deployed revision {} of container {}", revision, container_id);
    Ok(revision)
}

async fn refresh(client: &Client, data: &mut ResourceData, timeout: Duration) -> Result<()> {
    let id = data.require_id()?.to_string();
    let known: ContainerModel = data.decode()?;
    let container: RemoteContainer = client
        .call(
            ApiRequest::get(Service::ServerlessContainers, format!("{CONTAINERS}/{id}")),
            timeout,
        )
        .await?;

    let mut model = ContainerModel {
        name: container.name,
        folder_id: Some(container.folder_id),
        description: Some(container.description).filter(|s| !s.is_empty()),
        labels: container.labels,
        url: container.url,
        status: container.status,
        created_at: container.created_at,
        ..known.clone()
    };

    if let Some(revision_id) = &known.revision_id {
        let revision: RemoteRevision = client
            .call(
                ApiRequest::get(Service::ServerlessContainers, format!("{REVISIONS}/{revision_id}")),
                timeout,
            )
            .await?;
        model.revision_id = Some(revision.id);
        model.memory = revision.resources.memory / MIB;
        model.cores = revision.resources.cores.unwrap_or(model.cores);
        model.core_fraction = revision.resources.core_fraction.or(known.core_fraction);
        model.execution_timeout = flatten_timeout(
            known.execution_timeout.as_deref(),
            revision.execution_timeout.as_deref(),
        )?;
        model.concurrency = revision.concurrency.or(known.concurrency);
        model.service_account_id = Some(revision.service_account_id).filter(|s| !s.is_empty());
        model.image = ImageModel {
            url: revision.image.image_url,
            work_dir: Some(revision.image.working_dir).filter(|s| !s.is_empty()),
            command: revision.image.command.map(|c| c.command).unwrap_or_default(),
            args: revision.image.args.map(|a| a.args).unwrap_or_default(),
            environment: revision.image.environment,
            digest: revision.image.image_digest,
        };
    }
    data.flatten(&model)
}

pub struct ServerlessContainer;

#[async_trait]
impl Resource<Client> for ServerlessContainer {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::string("name").required().non_empty(),
            Field::string("folder_id").optional_computed().force_new(),
            Field::string("description"),
            Field::labels(),
            Field::int("memory").required().int_range(128, 8192).describe("Memory in MiB"),
            Field::int("cores").default(json!(1)).int_range(1, 4),
            Field::int("core_fraction").optional_computed().int_range(5, 100),
            Field::string("execution_timeout").optional_computed().duration(),
            Field::int("concurrency").optional_computed().int_range(1, 16),
            Field::string("service_account_id"),
            Field::object(
                "image",
                vec![
                    Field::string("url").required().non_empty(),
                    Field::string("work_dir"),
                    Field::list("command", FieldType::String),
                    Field::list("args", FieldType::String),
                    Field::map("environment", FieldType::String),
                    Field::string("digest").computed(),
                ],
            )
            .required(),
            Field::string("url").computed(),
            Field::string("revision_id").computed(),
            Field::string("status").computed(),
            Field::string("created_at").computed(),
        ])
    }

    async fn create(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let model: ContainerModel = data.decode()?;
        let folder_id = client.config().folder_id_or(model.folder_id.as_deref())?;

        let body = json!({
            "folderId": folder_id,
            "name": model.name,
            "description": model.description.clone().unwrap_or_default(),
            "labels": model.labels,
        });
        let op = client
            .call_operation(
                ApiRequest::post(Service::ServerlessContainers, CONTAINERS, body),
                data.timeouts().create,
            )
            .await?;
        let id = op.require_metadata("containerId")?;
        data.set_id(id.clone());

        let revision = deploy_revision(client, &model, &id, data.timeouts().create).await?;
        data.config_mut().insert("revision_id".to_string(), json!(revision));

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn read(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn update(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        let model: ContainerModel = data.decode()?;

        let changed = data.changed_fields(&["name", "description", "labels"]);
        if !changed.is_empty() {
            client
                .call_operation(
                    ApiRequest::patch(
                        Service::ServerlessContainers,
                        format!("{CONTAINERS}/{id}"),
                        expand_update(&model, &changed),
                    ),
                    data.timeouts().update,
                )
                .await?;
        }

        let revision = if data.changed_fields(REVISION_FIELDS).is_empty() {
            data.get_state::<String>("revision_id").map(Value::String)
        } else {
            let revision = deploy_revision(client, &model, &id, data.timeouts().update).await?;
            Some(json!(revision))
        };
        if let Some(revision) = revision {
            data.config_mut().insert("revision_id".to_string(), revision);
        }

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn delete(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        client
            .call_operation(
                ApiRequest::delete(Service::ServerlessContainers, format!("{CONTAINERS}/{id}")),
                data.timeouts().delete,
            )
            .await?;
        Ok(())
    }
}
