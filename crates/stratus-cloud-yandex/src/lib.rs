//! Yandex Cloud provider for Stratus
//!
//! Implements the [`stratus_cloud::Resource`] contract for Yandex Cloud
//! resource types over the public REST API.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ YandexProvider: type name → Resource<Client>  │
//! └───────┬──────────────────────────────────────┘
//!         │ schema / expand / flatten / CRUD
//! ┌───────▼──────────────────────────────────────┐
//! │ compute · mdb · cm · lockbox · serverless ·   │
//! │ ydb · yq                                      │
//! └───────┬──────────────────────────────────────┘
//!         │ ApiRequest
//! ┌───────▼──────────┐   ┌────────────────────────┐
//! │ Client           │──▶│ retry on UNAVAILABLE   │
//! │ (paging, ops)    │   │ poll operations        │
//! └───────┬──────────┘   └────────────────────────┘
//!         │ trait Transport
//! ┌───────▼──────────┐
//! │ HttpTransport    │  https://<service>.api.cloud.yandex.net
//! └──────────────────┘
//! ```
//!
//! # Supported resources
//!
//! - `yandex_compute_disk`, `yandex_compute_instance`
//! - `yandex_mdb_postgresql_cluster`, `yandex_mdb_clickhouse_cluster`
//! - `yandex_cm_certificate`
//! - `yandex_lockbox_secret`
//! - `yandex_serverless_container`
//! - `yandex_ydb_database_serverless`
//! - `yandex_yq_object_storage_connection`
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use stratus_cloud::ResourceData;
//! use stratus_cloud_yandex::YandexProvider;
//!
//! let provider = YandexProvider::from_env()?;
//!
//! let mut disk = ResourceData::planned(json!({ "name": "data", "size": 20 }))?;
//! provider.create("yandex_compute_disk", &mut disk).await?;
//! ```

pub mod client;
pub mod cm;
pub mod compute;
pub mod config;
pub mod error;
pub mod int64;
pub mod lockbox;
pub mod mdb;
pub mod provider;
pub mod serverless;
pub mod transport;
pub mod ydb;
pub mod yq;

/// Sizes are configured in GiB and sent in bytes
pub(crate) const GIB: i64 = 1 << 30;

pub use client::Client;
pub use config::ProviderConfig;
pub use error::{Result, YandexError};
pub use provider::YandexProvider;
pub use transport::{ApiRequest, HttpTransport, Method, Service, Transport};
