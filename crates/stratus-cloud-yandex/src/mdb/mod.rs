//! Managed database services
//!
//! PostgreSQL and ClickHouse clusters share the cluster/host API shape:
//! hosts are listed under the cluster and changed in batches.

pub mod clickhouse;
pub mod hosts;
pub mod postgresql;

use crate::GIB;
use crate::client::Client;
use crate::transport::{ApiRequest, Service};
use hosts::{HostModel, HostsDiff, RemoteHost};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use stratus_cloud::{Field, Result};

/// Compute resources of cluster hosts. `disk_size` is in GiB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesModel {
    pub resource_preset_id: String,
    pub disk_size: i64,
    pub disk_type_id: String,
}

impl ResourcesModel {
    pub fn schema() -> Field {
        Field::object(
            "resources",
            vec![
                Field::string("resource_preset_id").required().non_empty(),
                Field::int("disk_size").required().int_range(1, 65536),
                Field::string("disk_type_id").required().non_empty(),
            ],
        )
        .required()
    }

    pub fn to_api(&self) -> Value {
        json!({
            "resourcePresetId": self.resource_preset_id,
            "diskSize": (self.disk_size * GIB).to_string(),
            "diskTypeId": self.disk_type_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteResources {
    pub resource_preset_id: String,
    #[serde(with = "crate::int64")]
    pub disk_size: i64,
    pub disk_type_id: String,
}

impl From<RemoteResources> for ResourcesModel {
    fn from(remote: RemoteResources) -> Self {
        Self {
            resource_preset_id: remote.resource_preset_id,
            disk_size: remote.disk_size / GIB,
            disk_type_id: remote.disk_type_id,
        }
    }
}

/// Schema of the `hosts` block list
pub(crate) fn hosts_schema(extra: Vec<Field>) -> Field {
    let mut fields = vec![
        Field::string("name").computed().describe("FQDN assigned by the service"),
        Field::string("zone").optional_computed(),
        Field::string("subnet_id").optional_computed(),
        Field::bool("assign_public_ip").default(json!(false)),
    ];
    fields.extend(extra);
    Field::blocks("hosts", fields)
        .keyed_by(&["type", "zone", "shard_name"])
        .required()
        .min_items(1)
}

/// Cluster collection of one managed database service
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClusterApi {
    pub service: Service,
    pub collection: &'static str,
}

impl ClusterApi {
    pub fn cluster_path(&self, id: &str) -> String {
        format!("{}/{}", self.collection, id)
    }

    pub fn child_path(&self, id: &str, child: &str) -> String {
        format!("{}/{}/{}", self.collection, id, child)
    }

    pub async fn create(&self, client: &Client, body: Value, timeout: Duration) -> Result<String> {
        let op = client
            .call_operation(ApiRequest::post(self.service, self.collection, body), timeout)
            .await?;
        op.require_metadata("clusterId")
    }

    pub async fn get<T: DeserializeOwned>(&self, client: &Client, id: &str, timeout: Duration) -> Result<T> {
        client
            .call(ApiRequest::get(self.service, self.cluster_path(id)), timeout)
            .await
    }

    pub async fn patch(&self, client: &Client, id: &str, body: Value, timeout: Duration) -> Result<()> {
        client
            .call_operation(ApiRequest::patch(self.service, self.cluster_path(id), body), timeout)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, client: &Client, id: &str, timeout: Duration) -> Result<()> {
        client
            .call_operation(ApiRequest::delete(self.service, self.cluster_path(id)), timeout)
            .await?;
        Ok(())
    }

    pub async fn list_children<T: DeserializeOwned>(
        &self,
        client: &Client,
        id: &str,
        child: &str,
        timeout: Duration,
    ) -> Result<Vec<T>> {
        client
            .list(ApiRequest::get(self.service, self.child_path(id, child)), child, timeout)
            .await
    }

    pub async fn list_hosts(&self, client: &Client, id: &str, timeout: Duration) -> Result<Vec<HostModel>> {
        let hosts: Vec<RemoteHost> = self.list_children(client, id, "hosts", timeout).await?;
        Ok(hosts.into_iter().map(HostModel::from).collect())
    }

    /// Apply a host diff: create first, then update, then delete, so the
    /// cluster never drops below its configured size in between.
    pub async fn apply_hosts(&self, client: &Client, id: &str, diff: &HostsDiff, timeout: Duration) -> Result<()> {
        if !diff.to_add.is_empty() {
            let specs: Vec<Value> = diff.to_add.iter().map(HostModel::spec).collect();
            tracing::info!("Adding {} host(s) to cluster {}", specs.len(), id);
            client
                .call_operation(
                    ApiRequest::post(
                        self.service,
                        self.child_path(id, "hosts:batchCreate"),
                        json!({ "hostSpecs": specs }),
                    ),
                    timeout,
                )
                .await?;
        }

        if !diff.to_update.is_empty() {
            let specs: Vec<Value> = diff
                .to_update
                .iter()
                .map(|(name, host)| {
                    json!({
                        "hostName": name,
                        "assignPublicIp": host.assign_public_ip,
                        "updateMask": "assignPublicIp",
                    })
                })
                .collect();
            tracing::info!("Updating {} host(s) of cluster {}", specs.len(), id);
            client
                .call_operation(
                    ApiRequest::post(
                        self.service,
                        self.child_path(id, "hosts:batchUpdate"),
                        json!({ "updateHostSpecs": specs }),
                    ),
                    timeout,
                )
                .await?;
        }

        let names: Vec<String> = diff.to_remove.iter().filter_map(|h| h.name.clone()).collect();
        if !names.is_empty() {
            tracing::info!("Removing host(s) {} from cluster {}", names.join(", "), id);
            client
                .call_operation(
                    ApiRequest::post(
                        self.service,
                        self.child_path(id, "hosts:batchDelete"),
                        json!({ "hostNames": names }),
                    ),
                    timeout,
                )
                .await?;
        }

        Ok(())
    }
}

/// Fill in the provider's default zone for hosts configured without one
pub(crate) fn default_host_zones(client: &Client, hosts: &mut [HostModel]) -> Result<()> {
    for host in hosts.iter_mut().filter(|h| h.zone.is_empty()) {
        host.zone = client.config().zone_or(None)?;
    }
    Ok(())
}
