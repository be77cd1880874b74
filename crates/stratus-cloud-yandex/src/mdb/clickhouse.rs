//! `yandex_mdb_clickhouse_cluster`
//!
//! A sharded cluster. Shards are created together with their first hosts
//! and deleted together with all of theirs, so host changes that belong to
//! a shard being added or removed are left to the shard call.

use super::hosts::{HostModel, HostsDiff, diff_hosts, order_hosts_like};
use super::{ClusterApi, RemoteResources, ResourcesModel, default_host_zones, hosts_schema};
use crate::client::Client;
use crate::transport::{ApiRequest, Service};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use stratus_cloud::{Diff, Field, Resource, ResourceData, Result, Schema, Timeouts, diff_keys};

pub const TYPE_NAME: &str = "yandex_mdb_clickhouse_cluster";

const API: ClusterApi = ClusterApi {
    service: Service::ClickHouse,
    collection: "managed-clickhouse/v1/clusters",
};

pub const CLICKHOUSE_HOST: &str = "CLICKHOUSE";
pub const ZOOKEEPER_HOST: &str = "ZOOKEEPER";
const DEFAULT_SHARD: &str = "shard1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickhouseClusterModel {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,

    pub environment: String,

    pub network_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub clickhouse: NodeConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zookeeper: Option<NodeConfig>,

    #[serde(default)]
    pub hosts: Vec<HostModel>,

    #[serde(default)]
    pub shards: Vec<ShardModel>,

    #[serde(default)]
    pub databases: Vec<DatabaseModel>,

    #[serde(default)]
    pub deletion_protection: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub resources: ResourcesModel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardModel {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseModel {
    pub name: String,
}

/// Hosts are ClickHouse hosts unless typed otherwise; ClickHouse hosts
/// without a shard go to the default shard.
fn normalize_hosts(hosts: &mut [HostModel]) {
    for host in hosts {
        if host.host_type.is_none() {
            host.host_type = Some(CLICKHOUSE_HOST.to_string());
        }
        if host.host_type.as_deref() == Some(CLICKHOUSE_HOST) && host.shard_name.is_none() {
            host.shard_name = Some(DEFAULT_SHARD.to_string());
        }
    }
}

impl ClickhouseClusterModel {
    /// Configured shards, or the shards the hosts name, in order of appearance
    fn effective_shards(&self) -> Vec<ShardModel> {
        if !self.shards.is_empty() {
            return self.shards.clone();
        }
        let mut seen = BTreeSet::new();
        self.hosts
            .iter()
            .filter_map(|h| h.shard_name.as_deref())
            .filter(|s| seen.insert(*s))
            .map(|s| ShardModel { name: s.to_string() })
            .collect()
    }

    fn hosts_of_shard(&self, shard: &str) -> Vec<&HostModel> {
        self.hosts
            .iter()
            .filter(|h| h.shard_name.as_deref() == Some(shard))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteCluster {
    folder_id: String,
    #[serde(default)]
    created_at: Option<String>,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    environment: String,
    network_id: String,
    config: RemoteConfig,
    #[serde(default)]
    health: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    deletion_protection: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteConfig {
    #[serde(default)]
    version: Option<String>,
    clickhouse: RemoteNode,
    #[serde(default)]
    zookeeper: Option<RemoteNode>,
}

#[derive(Debug, Deserialize)]
struct RemoteNode {
    resources: RemoteResources,
}

#[derive(Debug, Deserialize)]
struct RemoteNamed {
    name: String,
}

fn config_spec(model: &ClickhouseClusterModel) -> Value {
    let mut spec = json!({
        "clickhouse": { "resources": model.clickhouse.resources.to_api() },
    });
    if let Some(version) = &model.version {
        spec["version"] = json!(version);
    }
    if let Some(zookeeper) = &model.zookeeper {
        spec["zookeeper"] = json!({ "resources": zookeeper.resources.to_api() });
    }
    spec
}

fn expand_create(model: &ClickhouseClusterModel, folder_id: &str) -> Value {
    json!({
        "folderId": folder_id,
        "name": model.name,
        "description": model.description.clone().unwrap_or_default(),
        "labels": model.labels,
        "environment": model.environment,
        "networkId": model.network_id,
        "configSpec": config_spec(model),
        "hostSpecs": model.hosts.iter().map(HostModel::spec).collect::<Vec<_>>(),
        "databaseSpecs": model.databases.iter().map(|d| json!({ "name": d.name })).collect::<Vec<_>>(),
        "deletionProtection": model.deletion_protection,
    })
}

fn expand_update(model: &ClickhouseClusterModel, changed: &[&str]) -> Value {
    let mut mask: Vec<&str> = Vec::new();
    let mut body = json!({});
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
            "version" => mask.push("configSpec.version"),
            "clickhouse" => mask.push("configSpec.clickhouse.resources"),
            "zookeeper" => mask.push("configSpec.zookeeper.resources"),
            "deletion_protection" => {
                mask.push("deletionProtection");
                body["deletionProtection"] = json!(model.deletion_protection);
            }
            _ => {}
        }
    }
    if mask.iter().any(|m| m.starts_with("configSpec")) {
        body["configSpec"] = config_spec(model);
    }
    body["updateMask"] = json!(mask.join(","));
    body
}

/// Host changes left after shard creation and deletion took their share
fn hosts_outside_shard_changes(
    mut hosts: HostsDiff,
    shards: &Diff<String, ShardModel>,
) -> HostsDiff {
    let added: BTreeSet<&str> = shards.to_add.iter().map(|s| s.name.as_str()).collect();
    let removed: BTreeSet<&str> = shards.to_remove.iter().map(String::as_str).collect();

    hosts.to_add.retain(|h| !added.contains(h.shard()));
    hosts.to_remove.retain(|h| !removed.contains(h.shard()));
    hosts.to_update.retain(|_, h| !removed.contains(h.shard()));
    hosts
}

async fn refresh(client: &Client, data: &mut ResourceData, timeout: Duration) -> Result<()> {
    let id = data.require_id()?.to_string();
    let known: Option<ClickhouseClusterModel> = data.decode().ok();

    let cluster: RemoteCluster = API.get(client, &id, timeout).await?;
    let hosts = API.list_hosts(client, &id, timeout).await?;
    let shards: Vec<RemoteNamed> = API.list_children(client, &id, "shards", timeout).await?;
    let databases: Vec<RemoteNamed> = API.list_children(client, &id, "databases", timeout).await?;

    let mut known_hosts = known.map(|m| m.hosts).unwrap_or_default();
    normalize_hosts(&mut known_hosts);

    let model = ClickhouseClusterModel {
        name: cluster.name,
        folder_id: Some(cluster.folder_id),
        environment: cluster.environment,
        network_id: cluster.network_id,
        description: Some(cluster.description).filter(|d| !d.is_empty()),
        labels: cluster.labels,
        version: cluster.config.version,
        clickhouse: NodeConfig {
            resources: cluster.config.clickhouse.resources.into(),
        },
        zookeeper: cluster.config.zookeeper.map(|z| NodeConfig {
            resources: z.resources.into(),
        }),
        hosts: order_hosts_like(&known_hosts, hosts),
        shards: shards.into_iter().map(|s| ShardModel { name: s.name }).collect(),
        databases: databases
            .into_iter()
            .map(|d| DatabaseModel { name: d.name })
            .collect(),
        deletion_protection: cluster.deletion_protection,
        health: cluster.health,
        status: cluster.status,
        created_at: cluster.created_at,
    };
    data.flatten(&model)
}

pub struct ClickhouseCluster;

#[async_trait]
impl Resource<Client> for ClickhouseCluster {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        let node = |name: &'static str| Field::object(name, vec![ResourcesModel::schema()]);
        Schema::new(vec![
            Field::string("name").required().non_empty(),
            Field::string("folder_id").optional_computed().force_new(),
            Field::string("environment")
                .required()
                .force_new()
                .one_of(&["PRESTABLE", "PRODUCTION"]),
            Field::string("network_id").required().force_new(),
            Field::string("description"),
            Field::labels(),
            Field::string("version").optional_computed(),
            node("clickhouse").required(),
            node("zookeeper"),
            hosts_schema(vec![
                Field::string("type")
                    .default(json!(CLICKHOUSE_HOST))
                    .one_of(&[CLICKHOUSE_HOST, ZOOKEEPER_HOST]),
                Field::string("shard_name").optional_computed(),
            ]),
            // Derived from the hosts when omitted; never carried over from state.
            Field::blocks("shards", vec![Field::string("name").required().non_empty()]),
            Field::blocks("databases", vec![Field::string("name").required().non_empty()]),
            Field::bool("deletion_protection").default(json!(false)),
            Field::string("health").computed(),
            Field::string("status").computed(),
            Field::string("created_at").computed(),
        ])
    }

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::default()
            .with_create(Duration::from_secs(60 * 60))
            .with_update(Duration::from_secs(90 * 60))
            .with_delete(Duration::from_secs(30 * 60))
    }

    async fn create(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let mut model: ClickhouseClusterModel = data.decode()?;
        normalize_hosts(&mut model.hosts);
        default_host_zones(client, &mut model.hosts)?;
        let folder_id = client.config().folder_id_or(model.folder_id.as_deref())?;

        let id = API
            .create(client, expand_create(&model, &folder_id), data.timeouts().create)
            .await?;
        data.set_id(id);

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn read(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn update(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        let mut model: ClickhouseClusterModel = data.decode()?;
        normalize_hosts(&mut model.hosts);
        default_host_zones(client, &mut model.hosts)?;
        let timeout = data.timeouts().update;

        let changed = data.changed_fields(&[
            "name",
            "description",
            "labels",
            "version",
            "clickhouse",
            "zookeeper",
            "deletion_protection",
        ]);
        if !changed.is_empty() {
            tracing::info!("Updating cluster {} fields: {}", id, changed.join(", "));
            API.patch(client, &id, expand_update(&model, &changed), timeout)
                .await?;
        }

        let current_shards: Vec<ShardModel> = API
            .list_children::<RemoteNamed>(client, &id, "shards", timeout)
            .await?
            .into_iter()
            .map(|s| ShardModel { name: s.name })
            .collect();
        let shards = diff_keys(&current_shards, &model.effective_shards(), |s| s.name.clone());
        tracing::info!("Shards of cluster {}: {}", id, shards.summary());

        let current_hosts = API.list_hosts(client, &id, timeout).await?;
        let hosts = hosts_outside_shard_changes(diff_hosts(&current_hosts, &model.hosts)?, &shards);

        for shard in &shards.to_add {
            let specs: Vec<Value> = model
                .hosts_of_shard(&shard.name)
                .into_iter()
                .map(HostModel::spec)
                .collect();
            client
                .call_operation(
                    ApiRequest::post(
                        API.service,
                        API.child_path(&id, "shards"),
                        json!({
                            "shardName": shard.name,
                            "configSpec": { "clickhouse": { "resources": model.clickhouse.resources.to_api() } },
                            "hostSpecs": specs,
                        }),
                    ),
                    timeout,
                )
                .await?;
        }

        if !hosts.is_empty() {
            API.apply_hosts(client, &id, &hosts, timeout).await?;
        }

        for name in &shards.to_remove {
            client
                .call_operation(
                    ApiRequest::delete(API.service, API.child_path(&id, &format!("shards/{name}"))),
                    timeout,
                )
                .await?;
        }

        let current_databases: Vec<DatabaseModel> = API
            .list_children::<RemoteNamed>(client, &id, "databases", timeout)
            .await?
            .into_iter()
            .map(|d| DatabaseModel { name: d.name })
            .collect();
        let databases = diff_keys(&current_databases, &model.databases, |d| d.name.clone());
        for db in &databases.to_add {
            client
                .call_operation(
                    ApiRequest::post(
                        API.service,
                        API.child_path(&id, "databases"),
                        json!({ "databaseSpec": { "name": db.name } }),
                    ),
                    timeout,
                )
                .await?;
        }
        for name in &databases.to_remove {
            client
                .call_operation(
                    ApiRequest::delete(API.service, API.child_path(&id, &format!("databases/{name}"))),
                    timeout,
                )
                .await?;
        }

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn delete(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        API.delete(client, &id, data.timeouts().delete).await
    }
}
