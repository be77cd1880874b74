//! Database cluster host reconciliation
//!
//! Hosts have no user-visible identity: the service names them (FQDN) when
//! they are created. Configured hosts are therefore matched against remote
//! hosts by (type, zone, shard), several hosts sharing one key.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use stratus_cloud::{CloudError, Result, match_by_key};

/// One cluster host, as configured or as reported by the service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostModel {
    /// FQDN assigned by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub zone: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,

    #[serde(default)]
    pub assign_public_ip: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_name: Option<String>,

    /// Host type where the service has several (CLICKHOUSE / ZOOKEEPER)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub host_type: Option<String>,
}

/// Natural key of a host
pub type HostKey = (Option<String>, String, Option<String>);

impl HostModel {
    pub fn key(&self) -> HostKey {
        (self.host_type.clone(), self.zone.clone(), self.shard_name.clone())
    }

    /// Shard name used for grouping; hosts of unsharded clusters group under ""
    pub fn shard(&self) -> &str {
        self.shard_name.as_deref().unwrap_or_default()
    }

    /// `hostSpecs` element of create calls
    pub fn spec(&self) -> Value {
        let mut spec = json!({
            "zoneId": self.zone,
            "assignPublicIp": self.assign_public_ip,
        });
        if let Some(subnet) = &self.subnet_id {
            spec["subnetId"] = json!(subnet);
        }
        if let Some(shard) = &self.shard_name {
            spec["shardName"] = json!(shard);
        }
        if let Some(host_type) = &self.host_type {
            spec["type"] = json!(host_type);
        }
        spec
    }
}

/// Host as returned by `.../clusters/{id}/hosts`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteHost {
    pub name: String,
    pub zone_id: String,
    #[serde(default)]
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub assign_public_ip: bool,
    #[serde(default)]
    pub shard_name: Option<String>,
    #[serde(default, rename = "type")]
    pub host_type: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub health: Option<String>,
}

impl From<RemoteHost> for HostModel {
    fn from(host: RemoteHost) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        Self {
            name: Some(host.name),
            zone: host.zone_id,
            subnet_id: non_empty(host.subnet_id),
            assign_public_ip: host.assign_public_ip,
            shard_name: non_empty(host.shard_name),
            host_type: non_empty(host.host_type),
        }
    }
}

/// Changes that turn the current host set into the desired one
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostsDiff {
    /// Desired hosts to create, in configuration order
    pub to_add: Vec<HostModel>,

    /// Current hosts to delete, in remote order
    pub to_remove: Vec<HostModel>,

    /// Current host name → desired host, for hosts whose public IP setting changed
    pub to_update: BTreeMap<String, HostModel>,
}

impl HostsDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_update.is_empty()
    }

    /// Names of hosts to delete, grouped by shard
    pub fn removed_by_shard(&self) -> BTreeMap<String, Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for host in &self.to_remove {
            if let Some(name) = &host.name {
                grouped
                    .entry(host.shard().to_string())
                    .or_default()
                    .push(name.clone());
            }
        }
        grouped
    }

    /// Hosts to create, grouped by shard
    pub fn added_by_shard(&self) -> BTreeMap<String, Vec<HostModel>> {
        let mut grouped: BTreeMap<String, Vec<HostModel>> = BTreeMap::new();
        for host in &self.to_add {
            grouped
                .entry(host.shard().to_string())
                .or_default()
                .push(host.clone());
        }
        grouped
    }
}

/// Diff remote hosts against configured hosts.
///
/// Every current host must carry its name; one without is reported as an
/// error rather than silently skipped.
pub fn diff_hosts(current: &[HostModel], desired: &[HostModel]) -> Result<HostsDiff> {
    if let Some(host) = current.iter().find(|h| h.name.is_none()) {
        return Err(CloudError::Transport(format!(
            "remote host in zone {} (shard {:?}) has no name",
            host.zone, host.shard_name
        )));
    }

    let matching = match_by_key(current, desired, HostModel::key, |c, d| {
        c.assign_public_ip == d.assign_public_ip
    });

    let mut diff = HostsDiff::default();
    for (cur, want) in matching.matched {
        if cur.assign_public_ip != want.assign_public_ip {
            if let Some(name) = &cur.name {
                diff.to_update.insert(name.clone(), want.clone());
            }
        }
    }
    diff.to_remove = matching.unmatched_current.into_iter().cloned().collect();
    diff.to_add = matching.unmatched_desired.into_iter().cloned().collect();

    tracing::debug!(
        "Host diff: {} to add, {} to update, {} to remove",
        diff.to_add.len(),
        diff.to_update.len(),
        diff.to_remove.len()
    );
    Ok(diff)
}

/// Reorder remote hosts to follow the configured order, so that a refresh
/// does not report the host list as changed. Remote hosts without a
/// configured counterpart are appended in remote order.
pub fn order_hosts_like(config: &[HostModel], remote: Vec<HostModel>) -> Vec<HostModel> {
    let matching = match_by_key(&remote, config, HostModel::key, |r, c| {
        r.assign_public_ip == c.assign_public_ip
    });

    let mut slots: Vec<Option<&HostModel>> = vec![None; config.len()];
    for (remote_host, config_host) in &matching.matched {
        if let Some(pos) = config.iter().position(|c| std::ptr::eq(c, *config_host)) {
            slots[pos] = Some(*remote_host);
        }
    }

    slots
        .into_iter()
        .flatten()
        .chain(matching.unmatched_current)
        .cloned()
        .collect()
}
