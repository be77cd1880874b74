//! `yandex_compute_disk`

use super::DISKS;
use crate::GIB;
use crate::client::Client;
use crate::transport::{ApiRequest, Service};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use stratus_cloud::{CloudError, Field, Resource, ResourceData, Result, Schema, Timeouts};

pub const TYPE_NAME: &str = "yandex_compute_disk";

const DEFAULT_TYPE: &str = "network-hdd";
const DEFAULT_SIZE_GB: i64 = 150;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<String>,

    /// Size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteDisk {
    folder_id: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    type_id: String,
    zone_id: String,
    #[serde(with = "crate::int64")]
    size: i64,
    #[serde(default, with = "crate::int64::option")]
    block_size: Option<i64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    source_image_id: Option<String>,
    #[serde(default)]
    source_snapshot_id: Option<String>,
}

impl From<RemoteDisk> for DiskModel {
    fn from(disk: RemoteDisk) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        Self {
            name: non_empty(Some(disk.name)),
            folder_id: Some(disk.folder_id),
            description: non_empty(Some(disk.description)),
            labels: disk.labels,
            zone: Some(disk.zone_id),
            disk_type: Some(disk.type_id),
            size: Some(disk.size / GIB),
            block_size: disk.block_size,
            image_id: non_empty(disk.source_image_id),
            snapshot_id: non_empty(disk.source_snapshot_id),
            status: disk.status,
            created_at: disk.created_at,
        }
    }
}

fn expand_create(model: &DiskModel, folder_id: &str, zone: &str) -> Value {
    let mut body = json!({
        "folderId": folder_id,
        "zoneId": zone,
        "typeId": model.disk_type.as_deref().unwrap_or(DEFAULT_TYPE),
        "size": (model.size.unwrap_or(DEFAULT_SIZE_GB) * GIB).to_string(),
        "labels": model.labels,
    });
    if let Some(name) = &model.name {
        body["name"] = json!(name);
    }
    if let Some(description) = &model.description {
        body["description"] = json!(description);
    }
    if let Some(block_size) = model.block_size {
        body["blockSize"] = json!(block_size.to_string());
    }
    if let Some(image) = &model.image_id {
        body["imageId"] = json!(image);
    }
    if let Some(snapshot) = &model.snapshot_id {
        body["snapshotId"] = json!(snapshot);
    }
    body
}

fn expand_update(model: &DiskModel, changed: &[&str]) -> Value {
    let mut body = json!({ "updateMask": changed.join(",") });
    for field in changed {
        match *field {
            "name" => body["name"] = json!(model.name.clone().unwrap_or_default()),
            "description" => {
                body["description"] = json!(model.description.clone().unwrap_or_default())
            }
            "labels" => body["labels"] = json!(model.labels),
            "size" => body["size"] = json!((model.size.unwrap_or(DEFAULT_SIZE_GB) * GIB).to_string()),
            _ => {}
        }
    }
    body
}

async fn refresh(client: &Client, data: &mut ResourceData, timeout: Duration) -> Result<()> {
    let id = data.require_id()?.to_string();
    let disk: RemoteDisk = client
        .call(ApiRequest::get(Service::Compute, format!("{DISKS}/{id}")), timeout)
        .await?;
    data.flatten(&DiskModel::from(disk))
}

pub struct ComputeDisk;

#[async_trait]
impl Resource<Client> for ComputeDisk {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::string("name"),
            Field::string("folder_id").optional_computed().force_new(),
            Field::string("description"),
            Field::labels(),
            Field::string("zone").optional_computed().force_new(),
            Field::string("type").default(json!(DEFAULT_TYPE)).force_new(),
            Field::int("size")
                .optional_computed()
                .int_range(1, 256 * 1024)
                .describe("Size in GiB"),
            Field::int("block_size").optional_computed().force_new(),
            Field::string("image_id")
                .optional_computed()
                .force_new()
                .conflicts_with(&["snapshot_id"]),
            Field::string("snapshot_id")
                .optional_computed()
                .force_new()
                .conflicts_with(&["image_id"]),
            Field::string("status").computed(),
            Field::string("created_at").computed(),
        ])
    }

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::uniform(Duration::from_secs(5 * 60))
    }

    async fn create(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let model: DiskModel = data.decode()?;
        let folder_id = client.config().folder_id_or(model.folder_id.as_deref())?;
        let zone = client.config().zone_or(model.zone.as_deref())?;

        let op = client
            .call_operation(
                ApiRequest::post(Service::Compute, DISKS, expand_create(&model, &folder_id, &zone)),
                data.timeouts().create,
            )
            .await?;
        data.set_id(op.require_metadata("diskId")?);

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn read(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn update(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        let model: DiskModel = data.decode()?;

        if data.has_change("size") {
            let before = data.prior().and_then(|p| p.get("size")).and_then(Value::as_i64);
            if let (Some(before), Some(after)) = (before, model.size) {
                if after < before {
                    return Err(CloudError::invalid_config(format!(
                        "disk {id} cannot shrink from {before} GiB to {after} GiB"
                    )));
                }
            }
        }

        let changed = data.changed_fields(&["name", "description", "labels", "size"]);
        if !changed.is_empty() {
            client
                .call_operation(
                    ApiRequest::patch(
                        Service::Compute,
                        format!("{DISKS}/{id}"),
                        expand_update(&model, &changed),
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
                ApiRequest::delete(Service::Compute, format!("{DISKS}/{id}")),
                data.timeouts().delete,
            )
            .await?;
        Ok(())
    }
}
