//! Per-driver default configuration
//!
//! One JSON file per `{driverType}_{configVersionNoDots}_{kubeVersion}`
//! describes the env vars, volumes, args, tolerations and sidecar/init
//! container parameters a driver is deployed with. The reconciler layers the
//! user's spec on top of these defaults.

use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, ObjectFieldSelector, SecretKeySelector, Toleration, Volume, VolumeMount,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Value type of a driver env var
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvDataType {
    String,
    Boolean,
    List,
    Int,
    FloatType,
    /// Default value is `apiVersion/fieldPath`
    EnvVarReferenceType,
    /// Default value is `key/secretName`
    EnvSecretReference,
    #[default]
    #[serde(other)]
    Unknown,
}

impl EnvDataType {
    /// Whether `value` is acceptable for this type
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            EnvDataType::String | EnvDataType::List => true,
            EnvDataType::Boolean => {
                let v = value.to_lowercase();
                v == "true" || v == "false"
            }
            EnvDataType::Int => value.parse::<i64>().is_ok(),
            EnvDataType::FloatType => value.parse::<f32>().is_ok(),
            EnvDataType::EnvVarReferenceType
            | EnvDataType::EnvSecretReference
            | EnvDataType::Unknown => false,
        }
    }
}

/// Which driver container a value applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    Controller,
    Node,
}

impl std::fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerKind::Controller => write!(f, "controller"),
            ContainerKind::Node => write!(f, "node"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverEnv {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Mandatory", default)]
    pub mandatory: bool,
    #[serde(rename = "CSIEnvType", default)]
    pub env_type: EnvDataType,
    #[serde(rename = "SetForController", default)]
    pub set_for_controller: bool,
    #[serde(rename = "SetForNode", default)]
    pub set_for_node: bool,
    #[serde(rename = "DefaultValueForController", default)]
    pub default_value_for_controller: String,
    #[serde(rename = "DefaultValueForNode", default)]
    pub default_value_for_node: String,
}

impl DriverEnv {
    fn applies_to(&self, kind: ContainerKind) -> bool {
        match kind {
            ContainerKind::Controller => self.set_for_controller,
            ContainerKind::Node => self.set_for_node,
        }
    }

    fn default_value(&self, kind: ContainerKind) -> &str {
        match kind {
            ContainerKind::Controller => &self.default_value_for_controller,
            ContainerKind::Node => &self.default_value_for_node,
        }
    }

    /// Render the default value as an `EnvVar`; malformed references yield `None`
    fn to_env_var(&self, kind: ContainerKind) -> Option<EnvVar> {
        let default = self.default_value(kind);
        let value_from = match self.env_type {
            EnvDataType::EnvVarReferenceType => {
                let (api_version, field_path) = split_reference(default)?;
                Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        api_version: Some(api_version.to_string()),
                        field_path: field_path.to_string(),
                    }),
                    ..Default::default()
                })
            }
            EnvDataType::EnvSecretReference => {
                let (key, secret_name) = split_reference(default)?;
                Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        key: key.to_string(),
                        name: Some(secret_name.to_string()),
                        optional: None,
                    }),
                    ..Default::default()
                })
            }
            _ => None,
        };
        Some(match value_from {
            Some(source) => EnvVar {
                name: self.name.clone(),
                value: None,
                value_from: Some(source),
            },
            None => EnvVar {
                name: self.name.clone(),
                value: Some(default.to_string()),
                value_from: None,
            },
        })
    }
}

fn split_reference(value: &str) -> Option<(&str, &str)> {
    let mut fields = value.split('/');
    match (fields.next(), fields.next(), fields.next()) {
        (Some(a), Some(b), None) => Some((a, b)),
        _ => {
            debug!("Invalid default value found: {}. Ignoring this", value);
            None
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SidecarParams {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub envs: Vec<EnvVar>,
    #[serde(default, rename = "volumeMounts")]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitContainerParams {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(rename = "SetForController", default)]
    pub set_for_controller: bool,
    #[serde(rename = "SetForNode", default)]
    pub set_for_node: bool,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub envs: Vec<EnvVar>,
    #[serde(default, rename = "volumeMounts")]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageClassParam {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Mandatory", default)]
    pub mandatory: bool,
}

/// Storage class attribute default, e.g. `allowVolumeExpansion: true`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageClassAttr {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Static default configuration of one driver/config/Kubernetes version
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(rename = "controllerHA", default)]
    pub controller_ha: bool,
    #[serde(rename = "enableEphemeralVolumes", default)]
    pub enable_ephemeral_volumes: bool,
    #[serde(rename = "driverEnvs", default)]
    pub driver_envs: Vec<DriverEnv>,
    #[serde(rename = "driverNodeVolumes", default)]
    pub node_volumes: Vec<Volume>,
    #[serde(rename = "driverControllerVolumes", default)]
    pub controller_volumes: Vec<Volume>,
    #[serde(rename = "driverNodeVolumeMounts", default)]
    pub node_volume_mounts: Vec<VolumeMount>,
    #[serde(rename = "driverControllerVolumeMounts", default)]
    pub controller_volume_mounts: Vec<VolumeMount>,
    #[serde(rename = "driverArgs", default)]
    pub driver_args: Vec<String>,
    #[serde(rename = "controllerTolerations", default)]
    pub controller_tolerations: Vec<Toleration>,
    #[serde(rename = "nodeTolerations", default)]
    pub node_tolerations: Vec<Toleration>,
    #[serde(rename = "sidecarParams", default)]
    pub sidecar_params: Vec<SidecarParams>,
    #[serde(rename = "initContainerParams", default)]
    pub init_container_params: Vec<InitContainerParams>,
    #[serde(rename = "storageClassParams", default)]
    pub storage_class_params: Vec<StorageClassParam>,
    #[serde(rename = "storageClassAttrs", default)]
    pub storage_class_attrs: Vec<StorageClassAttr>,
}

/// Top-level layout of a driver config file
#[derive(Debug, Deserialize)]
pub(crate) struct DriverConfigFile {
    #[serde(rename = "driverConfig")]
    pub driver_config: DriverConfig,
}

impl DriverConfig {
    /// Default env vars for the given driver container
    pub fn envs(&self, kind: ContainerKind) -> Vec<EnvVar> {
        self.driver_envs
            .iter()
            .filter(|e| e.applies_to(kind))
            .filter_map(|e| e.to_env_var(kind))
            .collect()
    }

    pub fn volumes(&self, kind: ContainerKind) -> &[Volume] {
        match kind {
            ContainerKind::Controller => &self.controller_volumes,
            ContainerKind::Node => &self.node_volumes,
        }
    }

    pub fn volume_mounts(&self, kind: ContainerKind) -> &[VolumeMount] {
        match kind {
            ContainerKind::Controller => &self.controller_volume_mounts,
            ContainerKind::Node => &self.node_volume_mounts,
        }
    }

    pub fn tolerations(&self, kind: ContainerKind) -> &[Toleration] {
        match kind {
            ContainerKind::Controller => &self.controller_tolerations,
            ContainerKind::Node => &self.node_tolerations,
        }
    }

    /// Names of sidecars that are added even when the spec omits them
    pub fn mandatory_sidecars(&self) -> Vec<&str> {
        self.sidecar_params
            .iter()
            .filter(|s| !s.optional)
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn sidecar(&self, name: &str) -> Option<&SidecarParams> {
        self.sidecar_params.iter().find(|s| s.name == name)
    }

    pub fn init_container(&self, name: &str) -> Option<&InitContainerParams> {
        self.init_container_params.iter().find(|c| c.name == name)
    }

    /// Init containers that run on the given driver workload
    pub fn init_containers_for(&self, kind: ContainerKind) -> Vec<&InitContainerParams> {
        self.init_container_params
            .iter()
            .filter(|c| match kind {
                ContainerKind::Controller => c.set_for_controller,
                ContainerKind::Node => c.set_for_node,
            })
            .collect()
    }

    pub fn mandatory_storage_class_params(&self) -> Vec<&str> {
        self.storage_class_params
            .iter()
            .filter(|p| p.mandatory)
            .map(|p| p.name.as_str())
            .collect()
    }

    pub fn mandatory_env_names(&self, kind: ContainerKind) -> Vec<&str> {
        self.driver_envs
            .iter()
            .filter(|e| e.mandatory && e.applies_to(kind))
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Name of the secret referenced by a config env var, if any
    pub fn secret_name_for_env(&self, env_name: &str, kind: ContainerKind) -> Option<String> {
        self.envs(kind)
            .into_iter()
            .find(|e| e.name == env_name)
            .and_then(|e| e.value_from)
            .and_then(|v| v.secret_key_ref)
            .and_then(|s| s.name)
    }

    pub fn storage_class_attr(&self, name: &str) -> Option<&serde_json::Value> {
        self.storage_class_attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    /// Check a user supplied env var against its declared type
    ///
    /// Unknown names pass unless `strict` is set.
    pub fn validate_env_type(&self, env: &EnvVar, strict: bool) -> Result<()> {
        let value = env.value.as_deref().unwrap_or_default();
        match self.driver_envs.iter().find(|d| d.name == env.name) {
            Some(declared) => {
                if !declared.env_type.accepts(value) {
                    return Err(Error::ValidationError(format!(
                        "invalid value specified in spec - Name: {}, Value: {}",
                        env.name, value
                    )));
                }
                if declared.mandatory && value.is_empty() {
                    return Err(Error::ValidationError(format!(
                        "missing value for a mandatory env - Name: {}, Value:{}",
                        env.name, value
                    )));
                }
                Ok(())
            }
            None if strict => Err(Error::ValidationError(format!(
                "failed to find the environment variable: {} in the default config",
                env.name
            ))),
            None => {
                debug!(
                    "Unknown environment variable {} specified by the user. Continuing",
                    env.name
                );
                Ok(())
            }
        }
    }
}
