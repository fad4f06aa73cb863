//! Process-level operator settings
//!
//! Built once at start-up from CLI flags, environment and cluster discovery,
//! then shared read-only by every controller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use super::opconfig::OpConfig;
use crate::crd::DriverType;
use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_DIR: &str = "driverconfig/";
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
pub const FALLBACK_CONFIG_DIR: &str = "/etc/config/local/dell-csi-operator";
/// Kubernetes version assumed when the API server version cannot be read
pub const BASE_K8S_VERSION: &str = "v117";
/// Delay before re-reading a controller workload whose replicas are not all ready
pub const POD_REFRESH_DELAY: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    pub config_dir: PathBuf,
    pub config_file: String,
    pub kube_version: String,
    pub enabled_drivers: Vec<DriverType>,
    pub is_openshift: bool,
    /// Reject user env vars unknown to the driver config
    pub strict_check: bool,
    pub pod_refresh_delay: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            config_file: DEFAULT_CONFIG_FILE.to_string(),
            kube_version: BASE_K8S_VERSION.to_string(),
            enabled_drivers: DriverType::ALL.to_vec(),
            is_openshift: false,
            strict_check: false,
            pod_refresh_delay: POD_REFRESH_DELAY,
        }
    }
}

/// Pick the config directory, falling back to the image-local copy when an
/// explicitly configured directory does not contain the config file
pub fn resolve_config_dir(explicit: Option<&Path>, config_file: &str) -> PathBuf {
    match explicit {
        None => PathBuf::from(DEFAULT_CONFIG_DIR),
        Some(dir) => {
            let candidate = dir.join(config_file);
            if std::fs::File::open(&candidate).is_ok() {
                dir.to_path_buf()
            } else {
                error!(
                    "Error reading {} from the configmap mount. Falling back to local copy of config files",
                    candidate.display()
                );
                PathBuf::from(FALLBACK_CONFIG_DIR)
            }
        }
    }
}

/// Parse the comma-separated enabled driver list; `None`/empty means all
pub fn parse_enabled_drivers(value: Option<&str>) -> Vec<DriverType> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => DriverType::ALL.to_vec(),
        Some(list) => list
            .split(',')
            .filter_map(|d| match d.parse::<DriverType>() {
                Ok(t) => Some(t),
                Err(_) => {
                    warn!("Unknown driver type {} specified. Ignoring...", d);
                    None
                }
            })
            .collect(),
    }
}

/// Map the API server version onto a Kubernetes version the operator has configs for
///
/// An unsupported minor version falls back to the previous one.
pub fn resolve_kube_version(major: &str, minor: &str, op_config: &OpConfig) -> Result<String> {
    let supported = &op_config.supported_k8s_versions;
    if supported.is_empty() {
        return Err(Error::ConfigError(
            "list of supported K8s versions missing from config file".to_string(),
        ));
    }
    let minor = minor.trim_end_matches('+');
    let kube_version = format!("v{}{}", major, minor);
    info!("Kubernetes Version: {}", kube_version);
    if supported.contains(&kube_version) {
        return Ok(kube_version);
    }
    if let Some(previous) = minor.parse::<i64>().ok().map(|m| format!("v{}{}", major, m - 1)) {
        if supported.contains(&previous) {
            info!(
                "{} is not supported by dell-csi-operator. Falling back to config files for {}",
                kube_version, previous
            );
            return Ok(previous);
        }
    }
    Err(Error::UnsupportedVersion(
        "unsupported k8s version. can't run operator".to_string(),
    ))
}

/// Detect OpenShift by its security API group; discovery errors assume OpenShift
pub async fn detect_openshift(client: &kube::Client) -> bool {
    match client.list_api_groups().await {
        Ok(groups) => {
            let found = groups
                .groups
                .iter()
                .any(|g| g.name == "security.openshift.io");
            if found {
                info!("Detected OpenShift API groups");
            }
            found
        }
        Err(e) => {
            error!("Failed to determine if it is an Openshift cluster. Assuming it is: {}", e);
            true
        }
    }
}

/// Resolve the Kubernetes version from the live API server
pub async fn discover_kube_version(
    client: &kube::Client,
    config_dir: &Path,
    config_file: &str,
) -> Result<String> {
    let info = match client.apiserver_version().await {
        Ok(info) => info,
        Err(e) => {
            info!(
                "Failed to get KubeAPI Server versions ({}). Defaulting to {}",
                e, BASE_K8S_VERSION
            );
            return Ok(BASE_K8S_VERSION.to_string());
        }
    };
    let op_config = OpConfig::read(config_dir, config_file)
        .map_err(|e| Error::ConfigError(format!("missing config file: {}", e)))?;
    resolve_kube_version(&info.major, &info.minor, &op_config)
}
