//! Controllers for the Dell CSI driver kinds and the PowerMax reverse proxy
//!
//! The reconciliation engine drives each custom resource through the
//! lifecycle in [`state`], using the builders in [`resources`] and the
//! syncers in [`sync`] to converge the cluster, and [`status`] to observe it.

pub mod client;
pub mod driver_hooks;
pub mod finalizers;
pub mod memory;
pub mod merge;
#[cfg(feature = "metrics")]
pub mod metrics;
mod reconciler;
pub mod resources;
pub mod rev_proxy;
pub mod spec_init;
pub mod state;
pub mod status;
pub mod sync;
pub mod validation;

#[cfg(test)]
mod driver_hooks_test;
#[cfg(test)]
mod merge_test;
#[cfg(test)]
mod reconciler_test;
#[cfg(test)]
mod spec_init_test;

pub use client::{ClusterObject, ClusterStateClient, KubeClusterClient};
pub use finalizers::DRIVER_FINALIZER;
pub use memory::InMemoryCluster;
pub use reconciler::{run_controller, DriverReconciler};
pub use rev_proxy::{run_proxy_controller, ProxyReconciler};
pub use state::Requeue;
