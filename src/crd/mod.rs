//! Custom Resource Definitions for the Dell CSI operator
//!
//! This module defines the `storage.dell.com/v1` driver and reverse-proxy
//! kinds, plus the external VolumeSnapshotClass type the operator writes.

mod csi_driver;
mod rev_proxy;
mod snapshot_class;
pub mod types;

#[cfg(test)]
mod tests;

pub use csi_driver::{
    CSIIsilon, CSIIsilonSpec, CSIPowerMax, CSIPowerMaxSpec, CSIPowerStore, CSIPowerStoreSpec,
    CSIUnity, CSIUnitySpec, CSIVXFlexOS, CSIVXFlexOSSpec, Driver, DriverInstance, DriverStatus,
};
pub use rev_proxy::{
    CSIPowerMaxRevProxy, CSIPowerMaxRevProxySpec, CSIPowerMaxRevProxyStatus, LinkConfig,
    ManagementServerConfig, ProxyLimits, RevProxyConfig, StandAloneConfig, StorageArrayConfig,
};
pub use snapshot_class::VolumeSnapshotClass;
pub use types::*;

/// API group shared by every operator-owned kind
pub const GROUP: &str = "storage.dell.com";
