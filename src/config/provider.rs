//! Resolution of `(driverType, configVersion, kubeVersion)` into a concrete
//! driver configuration

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, error};

use super::driver_config::{DriverConfig, DriverConfigFile};
use super::opconfig::OpConfig;
use crate::crd::DriverType;
use crate::error::{Error, Result};

/// A driver configuration resolved for one reconcile
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedDriverConfig {
    pub config_version: String,
    pub kube_version: String,
    /// `{driverType}_{configVersionNoDots}_{kubeVersion}`
    pub driver_version: String,
    pub image_tags: BTreeMap<String, String>,
    pub driver: DriverConfig,
}

impl ResolvedDriverConfig {
    pub fn default_image_tag(&self, image: &str) -> Result<String> {
        self.image_tags
            .get(image)
            .map(|t| t.trim().to_string())
            .ok_or_else(|| Error::ConfigError(format!("failed to find image tag for: {}", image)))
    }

    pub fn is_controller_ha(&self) -> bool {
        self.driver.controller_ha
    }
}

/// Source of default driver configuration
///
/// Implementations must be side-effect free; the reconciler calls `resolve`
/// once per reconcile.
pub trait DriverConfigProvider: Send + Sync {
    fn resolve(
        &self,
        driver_type: DriverType,
        config_version: &str,
        kube_version: &str,
    ) -> Result<ResolvedDriverConfig>;
}

/// Reads the operator config and the driver JSON files from a directory
#[derive(Clone, Debug)]
pub struct FileConfigProvider {
    pub config_dir: PathBuf,
    pub config_file: String,
}

impl FileConfigProvider {
    pub fn new(config_dir: impl Into<PathBuf>, config_file: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
            config_file: config_file.into(),
        }
    }

    fn read_driver_config(&self, driver_version: &str) -> Result<DriverConfig> {
        let path = self.config_dir.join(format!("{}.json", driver_version));
        debug!("Reading {} for default config", path.display());
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            error!("unable to find config file for driver: {}", path.display());
            Error::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        let file: DriverConfigFile = serde_json::from_str(&raw)?;
        Ok(file.driver_config)
    }
}

impl DriverConfigProvider for FileConfigProvider {
    fn resolve(
        &self,
        driver_type: DriverType,
        config_version: &str,
        kube_version: &str,
    ) -> Result<ResolvedDriverConfig> {
        let op_config = OpConfig::read(&self.config_dir, &self.config_file).map_err(|e| {
            error!("error in reading operator config: {}", e);
            e
        })?;
        let image_tags = op_config.default_image_tags(driver_type, config_version, kube_version)?;
        let driver_version = format!(
            "{}_{}_{}",
            driver_type,
            config_version.replace('.', ""),
            kube_version
        );
        let driver = self.read_driver_config(&driver_version)?;
        Ok(ResolvedDriverConfig {
            config_version: config_version.to_string(),
            kube_version: kube_version.to_string(),
            driver_version,
            image_tags,
            driver,
        })
    }
}
