//! Yandex Cloud provider
//!
//! Holds the client handle and the table of supported resource types, and
//! dispatches CRUD calls by type name through the lifecycle driver.

use crate::client::Client;
use crate::cm::certificate::Certificate;
use crate::compute::disk::ComputeDisk;
use crate::compute::instance::ComputeInstance;
use crate::config::ProviderConfig;
use crate::lockbox::LockboxSecret;
use crate::mdb::clickhouse::ClickhouseCluster;
use crate::mdb::postgresql::PostgresqlCluster;
use crate::serverless::ServerlessContainer;
use crate::ydb::YdbDatabaseServerless;
use crate::yq::YqObjectStorageConnection;
use stratus_cloud::{CloudError, Resource, ResourceData, Result, lifecycle};

/// Yandex Cloud provider
pub struct YandexProvider {
    client: Client,
    resources: Vec<Box<dyn Resource<Client>>>,
}

impl YandexProvider {
    /// Provider configured from the config file and `YC_*` environment
    pub fn from_env() -> crate::Result<Self> {
        let config = ProviderConfig::load()?;
        Ok(Self::new(Client::new(config)?))
    }

    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: vec![
                Box::new(ComputeDisk),
                Box::new(ComputeInstance),
                Box::new(PostgresqlCluster),
                Box::new(ClickhouseCluster),
                Box::new(Certificate),
                Box::new(LockboxSecret),
                Box::new(ServerlessContainer),
                Box::new(YdbDatabaseServerless),
                Box::new(YqObjectStorageConnection),
            ],
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Supported resource types
    pub fn resources(&self) -> impl Iterator<Item = &dyn Resource<Client>> {
        self.resources.iter().map(|r| r.as_ref())
    }

    pub fn resource(&self, type_name: &str) -> Result<&dyn Resource<Client>> {
        self.resources()
            .find(|r| r.type_name() == type_name)
            .ok_or_else(|| CloudError::invalid_config(format!("unknown resource type '{type_name}'")))
    }

    pub async fn create(&self, type_name: &str, data: &mut ResourceData) -> Result<()> {
        lifecycle::create(self.resource(type_name)?, &self.client, data).await
    }

    pub async fn read(&self, type_name: &str, data: &mut ResourceData) -> Result<()> {
        lifecycle::read(self.resource(type_name)?, &self.client, data).await
    }

    pub async fn update(&self, type_name: &str, data: &mut ResourceData) -> Result<()> {
        lifecycle::update(self.resource(type_name)?, &self.client, data).await
    }

    pub async fn delete(&self, type_name: &str, data: &mut ResourceData) -> Result<()> {
        lifecycle::delete(self.resource(type_name)?, &self.client, data).await
    }
}
