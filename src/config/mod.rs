//! Operator and driver configuration
//!
//! - [`opconfig`]: operator-level YAML (supported Kubernetes versions, image tags)
//! - [`driver_config`]: per-driver JSON defaults
//! - [`provider`]: resolves both into a [`ResolvedDriverConfig`]
//! - [`operator`]: process settings built at start-up

pub mod driver_config;
pub mod opconfig;
pub mod operator;
pub mod provider;


pub use driver_config::{ContainerKind, DriverConfig, DriverEnv, EnvDataType};
pub use opconfig::OpConfig;
pub use operator::OperatorConfig;
pub use provider::{DriverConfigProvider, FileConfigProvider, ResolvedDriverConfig};
