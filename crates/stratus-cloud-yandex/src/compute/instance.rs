//! `yandex_compute_instance`
//!
//! Name, description, labels and metadata change on a running instance.
//! Resources and platform only change while it is stopped, which has to be
//! allowed explicitly with `allow_stopping_for_update`.

use super::INSTANCES;
use crate::GIB;
use crate::client::Client;
use crate::transport::{ApiRequest, Service};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use stratus_cloud::{
    CloudError, Field, FieldType, Resource, ResourceData, Result, Schema, Timeouts,
};

pub const TYPE_NAME: &str = "yandex_compute_instance";

const DEFAULT_PLATFORM: &str = "standard-v3";
const RUNNING: &str = "RUNNING";

/// Fields that can only change while the instance is stopped
const STOP_FIELDS: [&str; 2] = ["resources", "platform_id"];
const LIVE_FIELDS: [&str; 4] = ["name", "description", "labels", "metadata"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceModel {
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

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<String>,

    pub resources: InstanceResources,

    pub boot_disk: BootDisk,

    #[serde(default)]
    pub network_interface: Vec<NetworkInterface>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub allow_stopping_for_update: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceResources {
    pub cores: i64,

    /// Memory in GiB
    pub memory: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_fraction: Option<i64>,
}

impl InstanceResources {
    fn to_api(&self) -> Value {
        let mut spec = json!({
            "cores": self.cores.to_string(),
            "memory": (self.memory * GIB).to_string(),
        });
        if let Some(fraction) = self.core_fraction {
            spec["coreFraction"] = json!(fraction.to_string());
        }
        spec
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootDisk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize_params: Option<InitializeParams>,

    #[serde(default = "default_true")]
    pub auto_delete: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,

    /// Size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub subnet_id: String,

    #[serde(default)]
    pub nat: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteInstance {
    folder_id: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    zone_id: String,
    platform_id: String,
    resources: RemoteResources,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    boot_disk: RemoteAttachedDisk,
    #[serde(default)]
    network_interfaces: Vec<RemoteInterface>,
    #[serde(default)]
    fqdn: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteResources {
    #[serde(with = "crate::int64")]
    memory: i64,
    #[serde(with = "crate::int64")]
    cores: i64,
    #[serde(default, with = "crate::int64::option")]
    core_fraction: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteAttachedDisk {
    disk_id: String,
    #[serde(default)]
    auto_delete: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteInterface {
    subnet_id: String,
    #[serde(default)]
    primary_v4_address: Option<RemoteAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteAddress {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    one_to_one_nat: Option<RemoteNat>,
}

#[derive(Debug, Deserialize)]
struct RemoteNat {
    #[serde(default)]
    address: Option<String>,
}

/// Remote instance as state. The boot disk source is not reported back, so
/// the configured initialize params are kept.
fn flatten_instance(remote: RemoteInstance, known: Option<&InstanceModel>) -> InstanceModel {
    let non_empty = |s: String| Some(s).filter(|s| !s.is_empty());
    let network_interface = remote
        .network_interfaces
        .into_iter()
        .map(|nic| {
            let address = nic.primary_v4_address;
            let nat = address.as_ref().and_then(|a| a.one_to_one_nat.as_ref());
            NetworkInterface {
                subnet_id: nic.subnet_id,
                nat: nat.is_some(),
                nat_ip_address: nat.and_then(|n| n.address.clone()),
                ip_address: address.and_then(|a| a.address),
            }
        })
        .collect();

    InstanceModel {
        name: non_empty(remote.name),
        folder_id: Some(remote.folder_id),
        description: non_empty(remote.description),
        labels: remote.labels,
        zone: Some(remote.zone_id),
        platform_id: Some(remote.platform_id),
        resources: InstanceResources {
            cores: remote.resources.cores,
            memory: remote.resources.memory / GIB,
            core_fraction: remote.resources.core_fraction,
        },
        boot_disk: BootDisk {
            disk_id: Some(remote.boot_disk.disk_id),
            initialize_params: known.and_then(|k| k.boot_disk.initialize_params.clone()),
            auto_delete: remote.boot_disk.auto_delete,
        },
        network_interface,
        metadata: remote.metadata,
        allow_stopping_for_update: known.is_some_and(|k| k.allow_stopping_for_update),
        status: remote.status,
        fqdn: remote.fqdn.filter(|f| !f.is_empty()),
        created_at: remote.created_at,
    }
}

fn boot_disk_spec(disk: &BootDisk) -> Result<Value> {
    match (&disk.disk_id, &disk.initialize_params) {
        (Some(id), None) => Ok(json!({ "autoDelete": disk.auto_delete, "diskId": id })),
        (None, Some(params)) => {
            let mut spec = json!({});
            if let Some(image) = &params.image_id {
                spec["imageId"] = json!(image);
            }
            if let Some(snapshot) = &params.snapshot_id {
                spec["snapshotId"] = json!(snapshot);
            }
            if let Some(size) = params.size {
                spec["size"] = json!((size * GIB).to_string());
            }
            if let Some(disk_type) = &params.disk_type {
                spec["typeId"] = json!(disk_type);
            }
            Ok(json!({ "autoDelete": disk.auto_delete, "diskSpec": spec }))
        }
        _ => Err(CloudError::invalid_config(
            "boot_disk needs exactly one of disk_id or initialize_params",
        )),
    }
}

fn expand_create(model: &InstanceModel, folder_id: &str, zone: &str) -> Result<Value> {
    let interfaces: Vec<Value> = model
        .network_interface
        .iter()
        .map(|nic| {
            let mut address = json!({});
            if nic.nat {
                address["oneToOneNatSpec"] = json!({ "ipVersion": "IPV4" });
            }
            json!({ "subnetId": nic.subnet_id, "primaryV4AddressSpec": address })
        })
        .collect();

    Ok(json!({
        "folderId": folder_id,
        "zoneId": zone,
        "name": model.name.clone().unwrap_or_default(),
        "description": model.description.clone().unwrap_or_default(),
        "labels": model.labels,
        "platformId": model.platform_id.as_deref().unwrap_or(DEFAULT_PLATFORM),
        "resourcesSpec": model.resources.to_api(),
        "metadata": model.metadata,
        "bootDiskSpec": boot_disk_spec(&model.boot_disk)?,
        "networkInterfaceSpecs": interfaces,
    }))
}

fn expand_update(model: &InstanceModel, changed: &[&str]) -> Value {
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
            "metadata" => {
                mask.push("metadata");
                body["metadata"] = json!(model.metadata);
            }
            "resources" => {
                mask.push("resourcesSpec");
                body["resourcesSpec"] = model.resources.to_api();
            }
            "platform_id" => {
                mask.push("platformId");
                body["platformId"] = json!(model.platform_id.as_deref().unwrap_or(DEFAULT_PLATFORM));
            }
            _ => {}
        }
    }
    body["updateMask"] = json!(mask.join(","));
    body
}

async fn fetch(client: &Client, id: &str, timeout: Duration) -> Result<RemoteInstance> {
    client
        .call(ApiRequest::get(Service::Compute, format!("{INSTANCES}/{id}")), timeout)
        .await
}

async fn refresh(client: &Client, data: &mut ResourceData, timeout: Duration) -> Result<()> {
    let id = data.require_id()?.to_string();
    let known: Option<InstanceModel> = data.decode().ok();
    let remote = fetch(client, &id, timeout).await?;
    data.flatten(&flatten_instance(remote, known.as_ref()))
}

async fn power(client: &Client, id: &str, action: &str, timeout: Duration) -> Result<()> {
    tracing::info!("Instance {}: {}", id, action);
    client
        .call_operation(
            ApiRequest::post(Service::Compute, format!("{INSTANCES}/{id}:{action}"), json!({})),
            timeout,
        )
        .await?;
    Ok(())
}

async fn patch(client: &Client, id: &str, body: Value, timeout: Duration) -> Result<()> {
    client
        .call_operation(
            ApiRequest::patch(Service::Compute, format!("{INSTANCES}/{id}"), body),
            timeout,
        )
        .await?;
    Ok(())
}

pub struct ComputeInstance;

#[async_trait]
impl Resource<Client> for ComputeInstance {
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
            Field::string("platform_id").default(json!(DEFAULT_PLATFORM)),
            Field::object(
                "resources",
                vec![
                    Field::int("cores").required().int_range(1, 96),
                    Field::int("memory").required().int_range(1, 640).describe("Memory in GiB"),
                    Field::int("core_fraction").int_range(5, 100),
                ],
            )
            .required(),
            Field::object(
                "boot_disk",
                vec![
                    Field::string("disk_id")
                        .optional_computed()
                        .conflicts_with(&["initialize_params"]),
                    Field::object(
                        "initialize_params",
                        vec![
                            Field::string("image_id").conflicts_with(&["snapshot_id"]),
                            Field::string("snapshot_id"),
                            Field::int("size").int_range(1, 4096),
                            Field::string("type"),
                        ],
                    ),
                    Field::bool("auto_delete").default(json!(true)),
                ],
            )
            .required()
            .force_new(),
            Field::blocks(
                "network_interface",
                vec![
                    Field::string("subnet_id").required(),
                    Field::bool("nat").default(json!(false)),
                    Field::string("ip_address").computed(),
                    Field::string("nat_ip_address").computed(),
                ],
            )
            .required()
            .min_items(1)
            .force_new(),
            Field::map("metadata", FieldType::String),
            Field::bool("allow_stopping_for_update").default(json!(false)),
            Field::string("status").computed(),
            Field::string("fqdn").computed(),
            Field::string("created_at").computed(),
        ])
    }

    async fn create(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let model: InstanceModel = data.decode()?;
        let folder_id = client.config().folder_id_or(model.folder_id.as_deref())?;
        let zone = client.config().zone_or(model.zone.as_deref())?;
        let body = expand_create(&model, &folder_id, &zone)?;

        let op = client
            .call_operation(
                ApiRequest::post(Service::Compute, INSTANCES, body),
                data.timeouts().create,
            )
            .await?;
        data.set_id(op.require_metadata("instanceId")?);

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn read(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn update(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        let model: InstanceModel = data.decode()?;
        let timeout = data.timeouts().update;

        let live = data.changed_fields(&LIVE_FIELDS);
        let stopped = data.changed_fields(&STOP_FIELDS);

        if !stopped.is_empty() && !model.allow_stopping_for_update {
            return Err(CloudError::invalid_config(format!(
                "changing {} requires stopping instance {}; set allow_stopping_for_update to allow it",
                stopped.join(", "),
                id
            )));
        }

        if !live.is_empty() {
            patch(client, &id, expand_update(&model, &live), timeout).await?;
        }

        if !stopped.is_empty() {
            let was_running = fetch(client, &id, timeout).await?.status.as_deref() == Some(RUNNING);
            if was_running {
                power(client, &id, "stop", timeout).await?;
            }
            patch(client, &id, expand_update(&model, &stopped), timeout).await?;
            if was_running {
                power(client, &id, "start", timeout).await?;
            }
        }

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn delete(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        client
            .call_operation(
                ApiRequest::delete(Service::Compute, format!("{INSTANCES}/{id}")),
                data.timeouts().delete,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> InstanceModel {
        serde_json::from_value(json!({
            "name": "web",
            "resources": { "cores": 2, "memory": 4 },
            "boot_disk": { "initialize_params": { "image_id": "fd8ubuntu", "size": 20 } },
            "network_interface": [{ "subnet_id": "e9b1", "nat": true }],
            "metadata": { "user-data": "#cloud-config" }
        }))
        .unwrap()
    }

    #[test]
    fn test_expand_create() {
        let body = expand_create(&model(), "b1g", "ru-central1-a").unwrap();

        assert_eq!(body["platformId"], DEFAULT_PLATFORM);
        assert_eq!(body["resourcesSpec"]["memory"], "4294967296");
        assert_eq!(body["bootDiskSpec"]["diskSpec"]["size"], "21474836480");
        assert_eq!(body["bootDiskSpec"]["autoDelete"], true);
        assert_eq!(
            body["networkInterfaceSpecs"][0]["primaryV4AddressSpec"]["oneToOneNatSpec"]["ipVersion"],
            "IPV4"
        );
    }

    #[test]
    fn test_boot_disk_needs_one_source() {
        let mut m = model();
        m.boot_disk.initialize_params = None;
        assert!(matches!(
            expand_create(&m, "b1g", "ru-central1-a"),
            Err(CloudError::InvalidConfig(_))
        ));

        m.boot_disk.disk_id = Some("fhmdisk".into());
        let body = expand_create(&m, "b1g", "ru-central1-a").unwrap();
        assert_eq!(body["bootDiskSpec"]["diskId"], "fhmdisk");
    }

    #[test]
    fn test_update_masks() {
        let body = expand_update(&model(), &["resources", "platform_id"]);
        assert_eq!(body["updateMask"], "resourcesSpec,platformId");
        assert_eq!(body["resourcesSpec"]["cores"], "2");
    }

    #[test]
    fn test_flatten_keeps_initialize_params() {
        let remote: RemoteInstance = serde_json::from_value(json!({
            "id": "fhmvm",
            "folderId": "b1g",
            "name": "web",
            "zoneId": "ru-central1-a",
            "platformId": "standard-v3",
            "resources": { "memory": "4294967296", "cores": "2", "coreFraction": "100" },
            "status": "RUNNING",
            "bootDisk": { "diskId": "fhmboot", "autoDelete": true },
            "networkInterfaces": [{
                "subnetId": "e9b1",
                "primaryV4Address": { "address": "10.0.0.5", "oneToOneNat": { "address": "51.250.1.2" } }
            }]
        }))
        .unwrap();

        let known = model();
        let state = flatten_instance(remote, Some(&known));

        assert_eq!(state.resources.memory, 4);
        assert_eq!(state.boot_disk.disk_id.as_deref(), Some("fhmboot"));
        assert_eq!(state.boot_disk.initialize_params, known.boot_disk.initialize_params);
        assert!(state.network_interface[0].nat);
        assert_eq!(state.network_interface[0].nat_ip_address.as_deref(), Some("51.250.1.2"));
    }
}
