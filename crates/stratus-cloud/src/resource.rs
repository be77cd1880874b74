//! Resource CRUD contract

use crate::data::ResourceData;
use crate::error::Result;
use crate::schema::Schema;
use crate::timeouts::Timeouts;
use async_trait::async_trait;

/// A managed resource type
///
/// `C` is the provider's client handle; it is constructed once by the
/// embedding application and passed to every call.
///
/// Implementations do not validate configuration or special-case missing
/// remote objects themselves: the [`lifecycle`](crate::lifecycle) driver
/// does that around every call.
#[async_trait]
pub trait Resource<C: ?Sized + Sync>: Send + Sync {
    /// Type name as written in configuration (e.g. "yandex_compute_disk")
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Create the remote object and record its id and state
    async fn create(&self, client: &C, data: &mut ResourceData) -> Result<()>;

    /// Refresh state from the remote object
    async fn read(&self, client: &C, data: &mut ResourceData) -> Result<()>;

    /// Converge the remote object on the planned configuration
    async fn update(&self, client: &C, data: &mut ResourceData) -> Result<()>;

    async fn delete(&self, client: &C, data: &mut ResourceData) -> Result<()>;
}
