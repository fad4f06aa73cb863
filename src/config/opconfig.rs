//! Operator-level configuration (`config.yaml`)
//!
//! Lists the Kubernetes versions the operator supports and, per driver and
//! config version, where default sidecar image tags come from.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crd::{images, DriverType};
use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpConfig {
    #[serde(default)]
    pub drivers: Vec<DriverConfigParams>,
    #[serde(default, rename = "csiSideCars")]
    pub csi_side_cars: Vec<ContainerApp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ContainerApp>,
    #[serde(default, rename = "supportedK8sVersions")]
    pub supported_k8s_versions: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfigParams {
    pub name: String,
    #[serde(default)]
    pub config_versions: Vec<ConfigVersionParams>,
}

/// Explicit sidecar tags; empty fields mean "not set"
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SidecarTags {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub attacher: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provisioner: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resizer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snapshotter: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registrar: String,
}

impl SidecarTags {
    fn entries(&self) -> [(&'static str, &str); 5] {
        [
            (images::PROVISIONER, &self.provisioner),
            (images::ATTACHER, &self.attacher),
            (images::RESIZER, &self.resizer),
            (images::SNAPSHOTTER, &self.snapshotter),
            (images::REGISTRAR, &self.registrar),
        ]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigVersionParams {
    pub config_version: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub use_defaults: bool,
    #[serde(default)]
    pub supported_versions: Vec<SupportedVersionParams>,
    #[serde(flatten)]
    pub tags: SidecarTags,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportedVersionParams {
    pub version: String,
    #[serde(flatten)]
    pub tags: SidecarTags,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageTag {
    pub version: String,
    #[serde(default)]
    pub tag: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerApp {
    pub name: String,
    #[serde(default)]
    pub images: Vec<ImageTag>,
}

impl OpConfig {
    /// Read and parse `{dir}/{file}`
    pub fn read(config_dir: &Path, config_file: &str) -> Result<Self> {
        let path = config_dir.join(config_file);
        info!("Reading file for default image tags: {}", path.display());
        let raw = std::fs::read_to_string(&path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    fn config_version(&self, driver_type: DriverType, config_version: &str) -> Option<&ConfigVersionParams> {
        self.drivers
            .iter()
            .find(|d| d.name == driver_type.as_str())?
            .config_versions
            .iter()
            .find(|c| c.config_version == config_version)
    }

    /// Check that a driver config version is supported on a Kubernetes version
    pub fn is_supported_version(
        &self,
        driver_type: DriverType,
        config_version: &str,
        k8s_version: &str,
    ) -> Result<()> {
        if !self.supported_k8s_versions.iter().any(|v| v == k8s_version) {
            return Err(Error::UnsupportedVersion(
                "k8s version not supported by operator".to_string(),
            ));
        }
        let driver = self
            .drivers
            .iter()
            .find(|d| d.name == driver_type.as_str())
            .ok_or_else(|| {
                Error::UnsupportedDriverConfigVersion("unknown driver type".to_string())
            })?;
        let params = driver
            .config_versions
            .iter()
            .find(|c| c.config_version == config_version)
            .ok_or_else(|| {
                Error::UnsupportedDriverConfigVersion("unknown driver config version".to_string())
            })?;
        if params.supported_versions.iter().any(|s| s.version == k8s_version) {
            Ok(())
        } else {
            Err(Error::UnsupportedVersion(
                "driver config version not supported on this K8s version".to_string(),
            ))
        }
    }

    /// Default image tag per sidecar/extension name
    ///
    /// Per-Kubernetes-version overrides win over the config version's own tags.
    pub fn default_image_tags(
        &self,
        driver_type: DriverType,
        config_version: &str,
        k8s_version: &str,
    ) -> Result<BTreeMap<String, String>> {
        self.is_supported_version(driver_type, config_version, k8s_version)?;
        let mut tags = BTreeMap::new();

        if let Some(params) = self.config_version(driver_type, config_version) {
            if params.use_defaults {
                for sidecar in &self.csi_side_cars {
                    for image in sidecar.images.iter().filter(|i| i.version == k8s_version) {
                        tags.insert(sidecar.name.clone(), image.tag.clone());
                    }
                }
            } else {
                for (name, tag) in params.tags.entries() {
                    tags.insert(name.to_string(), tag.to_string());
                }
                for supported in params.supported_versions.iter().filter(|s| s.version == k8s_version) {
                    for (name, tag) in supported.tags.entries() {
                        if !tag.is_empty() {
                            tags.insert(name.to_string(), tag.to_string());
                        }
                    }
                }
            }
        }

        for app in &self.extensions {
            for image in app.images.iter().filter(|i| i.version == k8s_version) {
                tags.insert(app.name.clone(), image.tag.clone());
            }
        }

        if let Some((name, _)) = tags.iter().find(|(_, tag)| tag.is_empty()) {
            return Err(Error::ConfigError(format!(
                "default image tag not found for: {}",
                name
            )));
        }
        Ok(tags)
    }
}
