//! Shared types for the Dell CSI driver custom resources
//!
//! These types are used across the CRD definitions and controller logic.
//!
//! # Type Hierarchy
//!
//! - [`DriverType`] - the per-driver strategy table (plugin name, env names, RBAC scope)
//! - [`ContainerTemplate`] - image/args/envs/scheduling for one container
//! - [`StorageClass`] / [`SnapshotClass`] - classes declared alongside a driver
//! - [`PodStatus`], [`LastUpdate`], [`DriverState`], [`ConditionType`] - observed state

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{EnvVar, Toleration, TopologySelectorTerm};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Container/image names understood by the operator
pub mod images {
    pub const DRIVER: &str = "driver";
    pub const PROVISIONER: &str = "provisioner";
    pub const ATTACHER: &str = "attacher";
    pub const SNAPSHOTTER: &str = "snapshotter";
    pub const REGISTRAR: &str = "registrar";
    pub const RESIZER: &str = "resizer";
    pub const SDC_MONITOR: &str = "sdc-monitor";
    pub const HEALTH_MONITOR: &str = "external-health-monitor";
    pub const SDC: &str = "sdc";
    /// Pseudo sidecar whose args are shared by every controller sidecar
    pub const COMMON: &str = "common";
}

/// Supported Dell CSI driver types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DriverType {
    PowerMax,
    Isilon,
    Unity,
    VxFlexOs,
    PowerStore,
}

impl DriverType {
    pub const ALL: [DriverType; 5] = [
        DriverType::PowerMax,
        DriverType::Isilon,
        DriverType::Unity,
        DriverType::VxFlexOs,
        DriverType::PowerStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DriverType::PowerMax => "powermax",
            DriverType::Isilon => "isilon",
            DriverType::Unity => "unity",
            DriverType::VxFlexOs => "vxflexos",
            DriverType::PowerStore => "powerstore",
        }
    }

    pub fn plugin_name(&self) -> &'static str {
        match self {
            DriverType::PowerMax => "csi-powermax",
            DriverType::Isilon => "csi-isilon",
            DriverType::Unity => "csi-unity",
            DriverType::VxFlexOs => "csi-vxflexos",
            DriverType::PowerStore => "csi-powerstore",
        }
    }

    /// Name registered with the CSIDriver object
    pub fn default_driver_name(&self) -> String {
        format!("{}.dellemc.com", self.plugin_name())
    }

    pub fn controller_name(&self) -> String {
        format!("{}-controller", self.as_str())
    }

    pub fn daemonset_name(&self) -> String {
        format!("{}-node", self.as_str())
    }

    pub fn user_env_name(&self) -> &'static str {
        match self {
            DriverType::PowerMax => "X_CSI_POWERMAX_USER",
            DriverType::Isilon => "X_CSI_ISI_USER",
            DriverType::Unity => "X_CSI_UNITY_USER",
            DriverType::VxFlexOs => "X_CSI_VXFLEXOS_USER",
            DriverType::PowerStore => "X_CSI_POWERSTORE_USER",
        }
    }

    pub fn password_env_name(&self) -> &'static str {
        match self {
            DriverType::PowerMax => "X_CSI_POWERMAX_PASSWORD",
            DriverType::Isilon => "X_CSI_ISI_PASSWORD",
            DriverType::Unity => "X_CSI_UNITY_PASSWORD",
            DriverType::VxFlexOs => "X_CSI_VXFLEXOS_PASSWORD",
            DriverType::PowerStore => "X_CSI_POWERSTORE_PASSWORD",
        }
    }

    /// Env var carrying a user-chosen driver name, if the driver supports one
    pub fn driver_name_env(&self) -> Option<&'static str> {
        match self {
            DriverType::PowerMax => Some("X_CSI_POWERMAX_DRIVER_NAME"),
            _ => None,
        }
    }

    pub fn cert_volume_name(&self) -> &'static str {
        "certs"
    }

    /// Env var that, when `false`, requires a certificate secret
    pub fn cert_validation_env(&self) -> String {
        match self {
            DriverType::PowerMax => "X_CSI_POWERMAX_SKIP_CERTIFICATE_VALIDATION".to_string(),
            other => format!("X_CSI_{}_INSECURE", other.as_str().to_uppercase()),
        }
    }

    /// Whether the CSIDriver object carries an fsGroupPolicy
    pub fn supports_fs_group_policy(&self) -> bool {
        matches!(self, DriverType::PowerStore | DriverType::Isilon)
    }

    /// Node RBAC is limited to the SCC rule for these drivers
    pub fn is_limited_node_rbac(&self, config_version: &str) -> bool {
        match self {
            DriverType::PowerMax => config_version != "v1",
            DriverType::PowerStore => true,
            DriverType::Isilon | DriverType::Unity | DriverType::VxFlexOs => false,
        }
    }

    /// Whether the projected `{type}-certs-N` secrets are mounted on the controller
    pub fn mounts_projected_certs(&self) -> bool {
        matches!(self, DriverType::Unity | DriverType::Isilon)
    }
}

impl fmt::Display for DriverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DriverType::ALL
            .into_iter()
            .find(|d| d.as_str() == s.trim())
            .ok_or_else(|| Error::ConfigError(format!("unknown driver type: {}", s)))
    }
}

/// Image, arguments, environment and scheduling for one container
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerTemplate {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub envs: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub tolerations: Vec<Toleration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
}

/// A StorageClass to be created for the driver
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageClass {
    pub name: String,

    #[serde(default, rename = "default", skip_serializing_if = "std::ops::Not::not")]
    pub default_sc: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reclaim_policy: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_volume_expansion: Option<bool>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume_binding_mode: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<Vec<serde_json::Value>>")]
    pub allowed_topologies: Option<Vec<TopologySelectorTerm>>,
}

/// A VolumeSnapshotClass to be created for the driver
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotClass {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

/// Partition of a workload's pods by health
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PodStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ready: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub starting: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stopped: Vec<String>,
}

/// Lifecycle state of a driver or proxy installation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum DriverState {
    #[default]
    #[serde(rename = "")]
    NoState,
    Updating,
    Succeeded,
    Running,
    Failed,
    InvalidConfig,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverState::NoState => "",
            DriverState::Updating => "Updating",
            DriverState::Succeeded => "Succeeded",
            DriverState::Running => "Running",
            DriverState::Failed => "Failed",
            DriverState::InvalidConfig => "InvalidConfig",
        };
        f.write_str(s)
    }
}

/// Condition recorded in `status.lastUpdate`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    Succeeded,
    InvalidConfig,
    Running,
    Error,
    Updating,
    Failed,
}

impl ConditionType {
    /// Condition reported for a state; `NoState` has none
    pub fn from_state(state: DriverState) -> Option<ConditionType> {
        match state {
            DriverState::NoState => None,
            DriverState::Updating => Some(ConditionType::Updating),
            DriverState::Succeeded => Some(ConditionType::Succeeded),
            DriverState::Running => Some(ConditionType::Running),
            DriverState::Failed => Some(ConditionType::Failed),
            DriverState::InvalidConfig => Some(ConditionType::InvalidConfig),
        }
    }
}

/// Last recorded condition change
///
/// `time` only moves when `condition` or `error_message` changes, so the
/// elapsed time since `time` measures how long the condition has persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}
