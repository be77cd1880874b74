//! Compute Cloud: disks and virtual machines

pub mod disk;
pub mod instance;

pub(crate) const DISKS: &str = "compute/v1/disks";
pub(crate) const INSTANCES: &str = "compute/v1/instances";
