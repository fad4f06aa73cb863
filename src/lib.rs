//! Dell CSI Operator: installs and manages Dell CSI storage drivers
//!
//! Each driver custom resource (PowerMax, Isilon, Unity, VxFlexOS,
//! PowerStore) is reconciled into the RBAC, CSIDriver, controller workload,
//! node DaemonSet and storage classes of one driver installation. The
//! PowerMax reverse proxy has its own resource and controller.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod leader;

pub use crate::error::{Error, Result};
