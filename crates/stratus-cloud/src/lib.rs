//! Stratus Cloud core
//!
//! This crate provides the provider-agnostic building blocks of Stratus:
//! how a resource type declares its schema, how its CRUD calls are driven,
//! and the helpers every provider shares for talking to a remote API.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │          declarative configuration host          │
//! └─────────────────┬───────────────────────────────┘
//!                   │ ResourceData
//! ┌─────────────────▼───────────────────────────────┐
//! │                 stratus-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │   lifecycle: validate → CRUD → not-found  │   │
//! │  │   trait Resource<C> { ... }               │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌───────────┐ ┌───────────┐ ┌──────────────┐   │
//! │  │ reconcile │ │   retry   │ │  operation   │   │
//! │  └───────────┘ └───────────┘ └──────────────┘   │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────────┐
//! │ stratus-cloud-    │
//! │ yandex provider   │
//! └───────────────────┘
//! ```

pub mod data;
pub mod error;
pub mod lifecycle;
pub mod operation;
pub mod reconcile;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod status;
pub mod timeouts;

// Re-exports
pub use data::ResourceData;
pub use error::{CloudError, Result};
pub use operation::{Operation, OperationError, OperationSource, wait_operation};
pub use reconcile::{Diff, DiffSummary, Matching, diff_by_key, diff_keys, match_by_key};
pub use resource::Resource;
pub use retry::{Retry, RetryConfig, classify, retry_on_unavailable, retry_with};
pub use schema::{Field, FieldType, Presence, Schema, Validation};
pub use status::StatusCode;
pub use timeouts::{Timeouts, parse_duration};
