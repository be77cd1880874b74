//! `yandex_mdb_postgresql_cluster`
//!
//! Besides the cluster itself this resource owns its hosts, users and
//! databases. Users and databases reference each other (a database has an
//! owner, a user has permissions on databases), so changes are applied in
//! dependency order:
//!
//! 1. create new users without permissions
//! 2. create and update databases
//! 3. grant permissions and update changed users
//! 4. drop removed databases
//! 5. drop removed users

use super::hosts::{HostModel, diff_hosts, order_hosts_like};
use super::{ClusterApi, RemoteResources, ResourcesModel, default_host_zones, hosts_schema};
use crate::client::Client;
use crate::transport::{ApiRequest, Service};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use stratus_cloud::{
    CloudError, Field, FieldType, Resource, ResourceData, Result, Schema, Timeouts, diff_by_key,
};

pub const TYPE_NAME: &str = "yandex_mdb_postgresql_cluster";

const API: ClusterApi = ClusterApi {
    service: Service::PostgreSql,
    collection: "managed-postgresql/v1/clusters",
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresqlClusterModel {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,

    pub environment: String,

    pub network_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    pub config: PostgresqlConfigModel,

    #[serde(default)]
    pub hosts: Vec<HostModel>,

    #[serde(default)]
    pub users: Vec<PostgresqlUser>,

    #[serde(default)]
    pub databases: Vec<PostgresqlDatabase>,

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
pub struct PostgresqlConfigModel {
    pub version: String,
    pub resources: ResourcesModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresqlUser {
    pub name: String,

    pub password: String,

    /// Databases the user may connect to
    #[serde(default)]
    pub permissions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_limit: Option<i64>,
}

impl PostgresqlUser {
    fn permission_set(&self) -> BTreeSet<&str> {
        self.permissions.iter().map(String::as_str).collect()
    }

    /// Update mask of the attributes that differ from `current`
    fn changed_from(&self, current: &PostgresqlUser) -> Vec<&'static str> {
        let mut mask = Vec::new();
        if self.password != current.password {
            mask.push("password");
        }
        if self.permission_set() != current.permission_set() {
            mask.push("permissions");
        }
        if self.conn_limit.is_some() && self.conn_limit != current.conn_limit {
            mask.push("connLimit");
        }
        mask
    }

    fn spec(&self) -> Value {
        let mut spec = json!({
            "name": self.name,
            "password": self.password,
            "permissions": permissions_api(&self.permissions),
        });
        if let Some(limit) = self.conn_limit {
            spec["connLimit"] = json!(limit.to_string());
        }
        spec
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresqlDatabase {
    pub name: String,

    pub owner: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lc_collate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lc_type: Option<String>,

    #[serde(default)]
    pub extensions: Vec<String>,
}

impl PostgresqlDatabase {
    fn extension_set(&self) -> BTreeSet<&str> {
        self.extensions.iter().map(String::as_str).collect()
    }

    fn spec(&self) -> Value {
        let mut spec = json!({
            "name": self.name,
            "owner": self.owner,
            "extensions": extensions_api(&self.extensions),
        });
        if let Some(collate) = &self.lc_collate {
            spec["lcCollate"] = json!(collate);
        }
        if let Some(ctype) = &self.lc_type {
            spec["lcCtype"] = json!(ctype);
        }
        spec
    }
}

fn permissions_api(databases: &[String]) -> Vec<Value> {
    databases
        .iter()
        .map(|db| json!({ "databaseName": db }))
        .collect()
}

fn extensions_api(extensions: &[String]) -> Vec<Value> {
    extensions.iter().map(|e| json!({ "name": e })).collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteCluster {
    id: String,
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
    version: String,
    resources: RemoteResources,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteUser {
    name: String,
    #[serde(default)]
    permissions: Vec<RemotePermission>,
    #[serde(default, with = "crate::int64::option")]
    conn_limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemotePermission {
    database_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteDatabase {
    name: String,
    owner: String,
    #[serde(default)]
    lc_collate: Option<String>,
    #[serde(default)]
    lc_ctype: Option<String>,
    #[serde(default)]
    extensions: Vec<RemoteExtension>,
}

#[derive(Debug, Deserialize)]
struct RemoteExtension {
    name: String,
}

impl RemoteUser {
    /// The API never returns passwords; the known one is carried over.
    fn into_model(self, known_passwords: &HashMap<String, String>) -> PostgresqlUser {
        PostgresqlUser {
            password: known_passwords.get(&self.name).cloned().unwrap_or_default(),
            permissions: self.permissions.into_iter().map(|p| p.database_name).collect(),
            conn_limit: self.conn_limit,
            name: self.name,
        }
    }
}

impl From<RemoteDatabase> for PostgresqlDatabase {
    fn from(db: RemoteDatabase) -> Self {
        Self {
            name: db.name,
            owner: db.owner,
            lc_collate: db.lc_collate.filter(|s| !s.is_empty()),
            lc_type: db.lc_ctype.filter(|s| !s.is_empty()),
            extensions: db.extensions.into_iter().map(|e| e.name).collect(),
        }
    }
}

/// Permissions and owners must name databases and users of this cluster
fn check_permissions(model: &PostgresqlClusterModel) -> Result<()> {
    let databases: BTreeSet<&str> = model.databases.iter().map(|d| d.name.as_str()).collect();
    let mut problems = Vec::new();

    for user in &model.users {
        for db in &user.permissions {
            if !databases.contains(db.as_str()) {
                problems.push(format!(
                    "user {} has permission on unknown database {}",
                    user.name, db
                ));
            }
        }
    }
    for db in &model.databases {
        if !model.users.iter().any(|u| u.name == db.owner) {
            problems.push(format!(
                "database {} is owned by unknown user {}",
                db.name, db.owner
            ));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(CloudError::invalid_config(problems.join("; ")))
    }
}

fn expand_create(model: &PostgresqlClusterModel, folder_id: &str) -> Value {
    json!({
        "folderId": folder_id,
        "name": model.name,
        "description": model.description.clone().unwrap_or_default(),
        "labels": model.labels,
        "environment": model.environment,
        "networkId": model.network_id,
        "configSpec": {
            "version": model.config.version,
            "resources": model.config.resources.to_api(),
        },
        "hostSpecs": model.hosts.iter().map(HostModel::spec).collect::<Vec<_>>(),
        "userSpecs": model.users.iter().map(PostgresqlUser::spec).collect::<Vec<_>>(),
        "databaseSpecs": model.databases.iter().map(PostgresqlDatabase::spec).collect::<Vec<_>>(),
        "deletionProtection": model.deletion_protection,
    })
}

/// Cluster-level update body for the changed top-level fields
fn expand_update(model: &PostgresqlClusterModel, changed: &[&str]) -> Value {
    let mut mask = Vec::new();
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
            "config" => {
                mask.extend(["configSpec.version", "configSpec.resources"]);
                body["configSpec"] = json!({
                    "version": model.config.version,
                    "resources": model.config.resources.to_api(),
                });
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

/// Order `remote` like `known`, appending unknown items in remote order
fn order_by_name<T: Clone>(known: &[String], remote: Vec<T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    let mut ordered: Vec<T> = known
        .iter()
        .filter_map(|k| remote.iter().find(|r| name(r) == k).cloned())
        .collect();
    ordered.extend(remote.into_iter().filter(|r| !known.iter().any(|k| k == name(r))));
    ordered
}

async fn refresh(client: &Client, data: &mut ResourceData, timeout: Duration) -> Result<()> {
    let id = data.require_id()?.to_string();
    // The configuration holds passwords and the order the user wrote things in.
    let known: Option<PostgresqlClusterModel> = data.decode().ok();

    let cluster: RemoteCluster = API.get(client, &id, timeout).await?;
    let hosts = API.list_hosts(client, &id, timeout).await?;
    let users: Vec<RemoteUser> = API.list_children(client, &id, "users", timeout).await?;
    let databases: Vec<RemoteDatabase> = API.list_children(client, &id, "databases", timeout).await?;

    let passwords: HashMap<String, String> = known
        .iter()
        .flat_map(|m| m.users.iter().map(|u| (u.name.clone(), u.password.clone())))
        .collect();
    let known_users: Vec<String> = known
        .iter()
        .flat_map(|m| m.users.iter().map(|u| u.name.clone()))
        .collect();
    let known_databases: Vec<String> = known
        .iter()
        .flat_map(|m| m.databases.iter().map(|d| d.name.clone()))
        .collect();
    let known_hosts = known.as_ref().map(|m| m.hosts.as_slice()).unwrap_or_default();

    let users: Vec<PostgresqlUser> = users.into_iter().map(|u| u.into_model(&passwords)).collect();
    let databases: Vec<PostgresqlDatabase> = databases.into_iter().map(Into::into).collect();

    let model = PostgresqlClusterModel {
        name: cluster.name,
        folder_id: Some(cluster.folder_id),
        environment: cluster.environment,
        network_id: cluster.network_id,
        description: Some(cluster.description).filter(|d| !d.is_empty()),
        labels: cluster.labels,
        config: PostgresqlConfigModel {
            version: cluster.config.version,
            resources: cluster.config.resources.into(),
        },
        hosts: order_hosts_like(known_hosts, hosts),
        users: order_by_name(&known_users, users, |u| u.name.as_str()),
        databases: order_by_name(&known_databases, databases, |d| d.name.as_str()),
        deletion_protection: cluster.deletion_protection,
        health: cluster.health,
        status: cluster.status,
        created_at: cluster.created_at,
    };
    tracing::debug!("Refreshed cluster {} ({})", cluster.id, model.name);
    data.flatten(&model)
}

/// Bring users and databases to the desired set
async fn sync_users_and_databases(
    client: &Client,
    id: &str,
    current_users: &[PostgresqlUser],
    current_databases: &[PostgresqlDatabase],
    desired: &PostgresqlClusterModel,
    timeout: Duration,
) -> Result<()> {
    let users = diff_by_key(
        current_users,
        &desired.users,
        |u| u.name.clone(),
        |c, d| d.changed_from(c).is_empty(),
    );
    let databases = diff_by_key(
        current_databases,
        &desired.databases,
        |d| d.name.clone(),
        |c, d| c.extension_set() == d.extension_set() && c.owner == d.owner,
    );
    tracing::info!("Users: {}; databases: {}", users.summary(), databases.summary());

    let current_by_name: HashMap<&str, &PostgresqlUser> =
        current_users.iter().map(|u| (u.name.as_str(), u)).collect();
    let current_db_by_name: HashMap<&str, &PostgresqlDatabase> =
        current_databases.iter().map(|d| (d.name.as_str(), d)).collect();

    for (name, db) in &databases.to_update {
        if let Some(current) = current_db_by_name.get(name.as_str()) {
            if current.owner != db.owner {
                return Err(CloudError::invalid_config(format!(
                    "owner of database {name} cannot be changed from {} to {}",
                    current.owner, db.owner
                )));
            }
        }
    }

    for user in &users.to_add {
        let without_permissions = PostgresqlUser {
            permissions: Vec::new(),
            ..user.clone()
        };
        client
            .call_operation(
                ApiRequest::post(
                    API.service,
                    API.child_path(id, "users"),
                    json!({ "userSpec": without_permissions.spec() }),
                ),
                timeout,
            )
            .await?;
    }

    for db in &databases.to_add {
        client
            .call_operation(
                ApiRequest::post(
                    API.service,
                    API.child_path(id, "databases"),
                    json!({ "databaseSpec": db.spec() }),
                ),
                timeout,
            )
            .await?;
    }

    for (name, db) in &databases.to_update {
        client
            .call_operation(
                ApiRequest::patch(
                    API.service,
                    API.child_path(id, &format!("databases/{name}")),
                    json!({
                        "updateMask": "extensions",
                        "extensions": extensions_api(&db.extensions),
                    }),
                ),
                timeout,
            )
            .await?;
    }

    let mut user_updates: Vec<(&str, &PostgresqlUser, Vec<&str>)> = users
        .to_add
        .iter()
        .filter(|u| !u.permissions.is_empty())
        .map(|u| (u.name.as_str(), u, vec!["permissions"]))
        .collect();
    for (name, user) in &users.to_update {
        if let Some(current) = current_by_name.get(name.as_str()) {
            user_updates.push((name.as_str(), user, user.changed_from(current)));
        }
    }

    for (name, user, mask) in user_updates {
        let mut body = json!({ "updateMask": mask.join(",") });
        for field in &mask {
            match *field {
                "password" => body["password"] = json!(user.password),
                "permissions" => body["permissions"] = json!(permissions_api(&user.permissions)),
                "connLimit" => body["connLimit"] = json!(user.conn_limit.map(|l| l.to_string())),
                _ => {}
            }
        }
        client
            .call_operation(
                ApiRequest::patch(API.service, API.child_path(id, &format!("users/{name}")), body),
                timeout,
            )
            .await?;
    }

    for name in &databases.to_remove {
        client
            .call_operation(
                ApiRequest::delete(API.service, API.child_path(id, &format!("databases/{name}"))),
                timeout,
            )
            .await?;
    }

    for name in &users.to_remove {
        client
            .call_operation(
                ApiRequest::delete(API.service, API.child_path(id, &format!("users/{name}"))),
                timeout,
            )
            .await?;
    }

    Ok(())
}

pub struct PostgresqlCluster;

#[async_trait]
impl Resource<Client> for PostgresqlCluster {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
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
            Field::object(
                "config",
                vec![
                    Field::string("version").required().non_empty(),
                    ResourcesModel::schema(),
                ],
            )
            .required(),
            hosts_schema(Vec::new()),
            Field::blocks(
                "users",
                vec![
                    Field::string("name").required().non_empty(),
                    Field::string("password").required().sensitive().non_empty(),
                    Field::set("permissions", FieldType::String),
                    Field::int("conn_limit").int_range(0, 10000),
                ],
            ),
            Field::blocks(
                "databases",
                vec![
                    Field::string("name").required().non_empty(),
                    Field::string("owner").required(),
                    Field::string("lc_collate"),
                    Field::string("lc_type"),
                    Field::set("extensions", FieldType::String),
                ],
            ),
            Field::bool("deletion_protection").default(json!(false)),
            Field::string("health").computed(),
            Field::string("status").computed(),
            Field::string("created_at").computed(),
        ])
    }

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::default()
            .with_create(Duration::from_secs(30 * 60))
            .with_update(Duration::from_secs(60 * 60))
            .with_delete(Duration::from_secs(15 * 60))
    }

    async fn create(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let mut model: PostgresqlClusterModel = data.decode()?;
        check_permissions(&model)?;
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
        let mut model: PostgresqlClusterModel = data.decode()?;
        check_permissions(&model)?;
        default_host_zones(client, &mut model.hosts)?;
        let timeout = data.timeouts().update;

        let changed =
            data.changed_fields(&["name", "description", "labels", "config", "deletion_protection"]);
        if !changed.is_empty() {
            tracing::info!("Updating cluster {} fields: {}", id, changed.join(", "));
            API.patch(client, &id, expand_update(&model, &changed), timeout)
                .await?;
        }

        let current_hosts = API.list_hosts(client, &id, timeout).await?;
        let hosts = diff_hosts(&current_hosts, &model.hosts)?;
        if !hosts.is_empty() {
            API.apply_hosts(client, &id, &hosts, timeout).await?;
        }

        // Prior state is the only source of current passwords.
        let prior: Option<PostgresqlClusterModel> = data.decode_prior().unwrap_or(None);
        let passwords: HashMap<String, String> = prior
            .iter()
            .flat_map(|m| m.users.iter().map(|u| (u.name.clone(), u.password.clone())))
            .collect();
        let current_users: Vec<PostgresqlUser> = API
            .list_children::<RemoteUser>(client, &id, "users", timeout)
            .await?
            .into_iter()
            .map(|u| u.into_model(&passwords))
            .collect();
        let current_databases: Vec<PostgresqlDatabase> = API
            .list_children::<RemoteDatabase>(client, &id, "databases", timeout)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        sync_users_and_databases(client, &id, &current_users, &current_databases, &model, timeout)
            .await?;

        let timeout = data.timeouts().read;
        refresh(client, data, timeout).await
    }

    async fn delete(&self, client: &Client, data: &mut ResourceData) -> Result<()> {
        let id = data.require_id()?.to_string();
        API.delete(client, &id, data.timeouts().delete).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, password: &str, permissions: &[&str]) -> PostgresqlUser {
        PostgresqlUser {
            name: name.into(),
            password: password.into(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            conn_limit: None,
        }
    }

    fn model() -> PostgresqlClusterModel {
        serde_json::from_value(json!({
            "name": "pg",
            "environment": "PRODUCTION",
            "network_id": "enp1",
            "config": {
                "version": "16",
                "resources": { "resource_preset_id": "s2.micro", "disk_size": 10, "disk_type_id": "network-ssd" }
            },
            "hosts": [{ "zone": "ru-central1-a" }],
            "users": [{ "name": "app", "password": "secret", "permissions": ["appdb"] }],
            "databases": [{ "name": "appdb", "owner": "app", "extensions": ["uuid-ossp"] }]
        }))
        .unwrap()
    }

    #[test]
    fn test_user_change_mask() {
        let current = user("app", "old", &["a", "b"]);
        assert!(user("app", "old", &["b", "a"]).changed_from(&current).is_empty());
        assert_eq!(user("app", "new", &["a"]).changed_from(&current), vec!["password", "permissions"]);

        let limited = PostgresqlUser {
            conn_limit: Some(10),
            ..current.clone()
        };
        assert_eq!(limited.changed_from(&current), vec!["connLimit"]);
    }

    #[test]
    fn test_permissions_must_reference_databases() {
        let mut m = model();
        assert!(check_permissions(&m).is_ok());

        m.users[0].permissions.push("missing".into());
        m.databases[0].owner = "nobody".into();
        let err = check_permissions(&m).unwrap_err().to_string();
        assert!(err.contains("unknown database missing"));
        assert!(err.contains("unknown user nobody"));
    }

    #[test]
    fn test_expand_create() {
        let body = expand_create(&model(), "b1gfolder");

        assert_eq!(body["folderId"], "b1gfolder");
        assert_eq!(body["configSpec"]["resources"]["diskSize"], "10737418240");
        assert_eq!(body["userSpecs"][0]["permissions"][0]["databaseName"], "appdb");
        assert_eq!(body["databaseSpecs"][0]["extensions"][0]["name"], "uuid-ossp");
        assert_eq!(body["hostSpecs"][0]["zoneId"], "ru-central1-a");
    }

    #[test]
    fn test_expand_update_mask() {
        let body = expand_update(&model(), &["labels", "config"]);
        assert_eq!(body["updateMask"], "labels,configSpec.version,configSpec.resources");
        assert!(body.get("name").is_none());
    }

    #[test]
    fn test_order_by_name() {
        let known = vec!["b".to_string(), "a".to_string()];
        let remote = vec![user("a", "", &[]), user("c", "", &[]), user("b", "", &[])];

        let names: Vec<String> = order_by_name(&known, remote, |u| u.name.as_str())
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_schema_accepts_model() {
        let mut config = serde_json::to_value(model()).unwrap().as_object().unwrap().clone();
        let schema = PostgresqlCluster.schema();
        schema.apply_defaults(&mut config);
        schema.validate(&config).unwrap();
    }
}
