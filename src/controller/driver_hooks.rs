//! Driver-specific initialization and validation
//!
//! Most driver types need nothing beyond the generic handling; the hooks
//! below cover PowerMax topology defaults and version limits, Unity array
//! credentials and storage class parameters, and VxFlexOS MDM addresses.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use k8s_openapi::api::core::v1::{
    EnvVar, Secret, TopologySelectorLabelRequirement, TopologySelectorTerm,
};
use kube::ResourceExt;
use serde::Deserialize;
use tracing::{debug, info};

use super::client::ClusterStateClient;
use super::merge::{env_value, set_env};
use crate::crd::{images, Driver, DriverInstance, DriverType};
use crate::error::{Error, Result};

const SYMID_PARAM: &str = "SYMID";
const WAIT_FOR_FIRST_CONSUMER: &str = "WaitForFirstConsumer";
const MDM_ENV: &str = "MDM";
const HOST_PID_ENV: &str = "HOST_PID";
const TIERING_POLICY_PARAM: &str = "tieringPolicy";

/// Driver-specific defaults applied after the generic initialization
///
/// Returns whether the spec changed.
pub fn initialize_driver_spec<K: DriverInstance>(instance: &mut K) -> Result<bool> {
    match K::DRIVER_TYPE {
        DriverType::PowerMax => {
            let first_install = instance
                .driver_status()
                .map(|s| s.driver_hash == 0)
                .unwrap_or(true);
            if !first_install {
                return Ok(false);
            }
            let namespace = instance.namespace().unwrap_or_default();
            Ok(default_powermax_topologies(instance.driver_mut(), &namespace))
        }
        DriverType::VxFlexOs => normalize_mdm(instance.driver_mut()),
        DriverType::Isilon | DriverType::Unity | DriverType::PowerStore => Ok(false),
    }
}

/// Driver-specific checks run after the generic validation
pub async fn validate_driver_spec<C, K>(client: &C, instance: &K) -> Result<()>
where
    C: ClusterStateClient,
    K: DriverInstance,
{
    match K::DRIVER_TYPE {
        DriverType::PowerMax => validate_powermax(instance.driver()),
        DriverType::Unity => {
            let namespace = instance.namespace().unwrap_or_default();
            validate_unity_credentials(client, &namespace, instance.driver()).await?;
            validate_unity_storage_classes(instance.driver(), &instance.name_any())
        }
        DriverType::VxFlexOs => validate_host_pid(instance.driver()),
        DriverType::Isilon | DriverType::PowerStore => Ok(()),
    }
}

// ============================================================================
// PowerMax
// ============================================================================

fn powermax_driver_name(driver: &Driver, namespace: &str) -> String {
    let default = DriverType::PowerMax.default_driver_name();
    let custom = DriverType::PowerMax
        .driver_name_env()
        .and_then(|name| env_value(&driver.common.envs, name))
        .filter(|value| *value != default);
    match custom {
        Some(value) => format!("{}.{}.dellemc.com", namespace, value),
        None => default,
    }
}

/// Pin WaitForFirstConsumer classes of one array to the nodes that can reach it
pub fn default_powermax_topologies(driver: &mut Driver, namespace: &str) -> bool {
    let driver_name = powermax_driver_name(driver, namespace);
    let mut updated = false;
    for sc in driver.storage_class.iter_mut() {
        let Some(symid) = sc.parameters.get(SYMID_PARAM) else {
            continue;
        };
        if sc.allowed_topologies.is_none() && sc.volume_binding_mode == WAIT_FOR_FIRST_CONSUMER {
            sc.allowed_topologies = Some(vec![TopologySelectorTerm {
                match_label_expressions: Some(vec![TopologySelectorLabelRequirement {
                    key: format!("{}/{}", driver_name, symid),
                    values: vec![driver_name.clone()],
                }]),
            }]);
            debug!("Added default topology to storage class {}", sc.name);
            updated = true;
        }
    }
    updated
}

/// Numeric form of a config version, `v4` -> 4, `v2.1` -> 21
fn config_version_number(config_version: &str) -> Result<u32> {
    let digits = config_version.replace(['v', '.'], "");
    digits.parse().map_err(|_| {
        Error::ValidationError(format!("invalid config version: {}", config_version))
    })
}

fn validate_powermax(driver: &Driver) -> Result<()> {
    let version = config_version_number(&driver.config_version)?;
    if version >= 4 {
        return Ok(());
    }
    for sc in &driver.storage_class {
        if !sc.volume_binding_mode.is_empty() && sc.volume_binding_mode != "Immediate" {
            return Err(Error::ValidationError(format!(
                "{} is not a supported value for volumeBindingMode in driver config version: {}",
                sc.volume_binding_mode, version
            )));
        }
        if sc.allowed_topologies.is_some() {
            return Err(Error::ValidationError(format!(
                "topology is not supported in driver config version: {}",
                version
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Unity
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnityArray {
    #[serde(default)]
    array_id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    rest_gateway: String,
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    is_default_array: bool,
    #[serde(default)]
    is_default: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnityArrayList {
    #[serde(default)]
    storage_array_list: Vec<UnityArray>,
}

/// Check the `storageArrayList` held in the `config` key of the creds secret
///
/// YAML parsing also accepts the JSON form used by newer driver versions.
pub fn check_unity_arrays(raw: &str) -> Result<()> {
    if raw.trim().is_empty() {
        return Err(Error::ValidationError(
            "Arrays details are not provided in unity-creds secret".to_string(),
        ));
    }
    let list: UnityArrayList = serde_yaml::from_str(raw).map_err(|e| {
        Error::ValidationError(format!("Unable to parse the credentials [{}]", e))
    })?;
    if list.storage_array_list.is_empty() {
        return Err(Error::ValidationError(
            "Arrays details are not provided in unity-creds secret".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut defaults = 0;
    for (i, array) in list.storage_array_list.iter().enumerate() {
        let invalid = |field: &str| {
            Error::ValidationError(format!("invalid value for {} at index [{}]", field, i))
        };
        if array.array_id.is_empty() {
            return Err(invalid("ArrayID"));
        }
        if array.username.is_empty() {
            return Err(invalid("Username"));
        }
        if array.password.is_empty() {
            return Err(invalid("Password"));
        }
        if array.rest_gateway.is_empty() && array.endpoint.is_empty() {
            return Err(invalid("RestGateway"));
        }
        if !seen.insert(array.array_id.as_str()) {
            return Err(Error::ValidationError(format!(
                "Duplicate ArrayID [{}] found in storageArrayList parameter",
                array.array_id
            )));
        }
        if array.is_default_array || array.is_default {
            defaults += 1;
        }
        if defaults > 1 {
            return Err(Error::ValidationError(format!(
                "'isDefaultArray' parameter located in multiple places ArrayID: {}. \
                 'isDefaultArray' parameter should present only once in the storageArrayList",
                array.array_id
            )));
        }
    }
    Ok(())
}

async fn validate_unity_credentials<C: ClusterStateClient>(
    client: &C,
    namespace: &str,
    driver: &Driver,
) -> Result<()> {
    let secret_name = format!("{}-creds", DriverType::Unity);
    let secret = match client.get::<Secret>(Some(namespace), &secret_name).await {
        Ok(Some(secret)) => secret,
        Ok(None) => {
            return Err(Error::ValidationError(format!(
                "reading secret [{}] error [secret not found]",
                secret_name
            )))
        }
        Err(e) => {
            return Err(Error::ValidationError(format!(
                "reading secret [{}] error [{}]",
                secret_name, e
            )))
        }
    };
    let raw = secret
        .data
        .as_ref()
        .and_then(|d| d.get("config"))
        .map(|b| String::from_utf8_lossy(&b.0).into_owned())
        .unwrap_or_default();
    info!(
        "Validating {} arrays for config version {}",
        secret_name, driver.config_version
    );
    check_unity_arrays(&raw)
}

fn validate_unity_storage_classes(driver: &Driver, instance_name: &str) -> Result<()> {
    for sc in &driver.storage_class {
        if driver.config_version == "v2" {
            for param in ["storagePool", "arrayId"] {
                match sc.parameters.get(param) {
                    None => {
                        return Err(Error::ValidationError(format!(
                            "{} paramter is mandatory in StorageClass [{}]",
                            param, sc.name
                        )))
                    }
                    Some(value) if value.is_empty() => {
                        return Err(Error::ValidationError(format!(
                            "{} paramter should not be empty in StorageClass [{}]",
                            param, sc.name
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        if let Some(policy) = sc.parameters.get(TIERING_POLICY_PARAM) {
            if !matches!(policy.parse::<i64>(), Ok(0..=2)) {
                return Err(Error::ValidationError(format!(
                    "tieringPolicy should be numeric and values should be 0,1,2 for instance {}",
                    instance_name
                )));
            }
        }
    }
    Ok(())
}

// ============================================================================
// VxFlexOS
// ============================================================================

/// Trim a comma-separated MDM list; every entry must be an IPv4 address
pub fn normalize_mdm_list(value: &str) -> Option<String> {
    let entries: Vec<&str> = value.split(',').map(str::trim).collect();
    entries
        .iter()
        .all(|e| e.parse::<Ipv4Addr>().is_ok())
        .then(|| entries.join(","))
}

fn find_env_mut<'a>(envs: &'a mut [EnvVar], name: &str) -> Option<&'a mut EnvVar> {
    envs.iter_mut().find(|e| e.name == name)
}

fn normalize_mdm(driver: &mut Driver) -> Result<bool> {
    let mut updated = false;
    let mut mdm = None;
    if let Some(sdc) = driver.init_containers.iter_mut().find(|c| c.name == images::SDC) {
        if let Some(env) = find_env_mut(&mut sdc.envs, MDM_ENV) {
            let normalized = normalize_mdm_list(env.value.as_deref().unwrap_or_default())
                .ok_or_else(|| {
                    Error::ValidationError(
                        "Invalid MDM value. Ip address should be nummeric and comma separated without space"
                            .to_string(),
                    )
                })?;
            if env.value.as_deref() != Some(normalized.as_str()) {
                env.value = Some(normalized.clone());
                updated = true;
            }
            mdm = Some(normalized);
        }
    }

    let Some(monitor) = driver
        .side_cars
        .iter_mut()
        .find(|s| s.name == images::SDC_MONITOR)
    else {
        return Ok(updated);
    };
    match find_env_mut(&mut monitor.envs, MDM_ENV) {
        Some(env) => {
            let existing = normalize_mdm_list(env.value.as_deref().unwrap_or_default())
                .ok_or_else(|| {
                    Error::ValidationError(
                        "Invalid MDM value, ip address should be nummeric, comma separated without space"
                            .to_string(),
                    )
                })?;
            if let Some(mdm) = mdm.filter(|m| *m != existing) {
                env.value = Some(mdm);
                updated = true;
            }
        }
        None => {
            if let Some(mdm) = mdm.filter(|m| !m.is_empty()) {
                set_env(&mut monitor.envs, MDM_ENV, &mdm);
                updated = true;
            }
        }
    }
    Ok(updated)
}

fn validate_host_pid(driver: &Driver) -> Result<()> {
    let host_pid = driver
        .side_cars
        .iter()
        .filter(|s| s.name == images::SDC_MONITOR)
        .find_map(|s| s.envs.iter().find(|e| e.name == HOST_PID_ENV))
        .map(|e| e.value.as_deref().unwrap_or_default());
    match host_pid {
        Some(value) if value != "0" && value != "1" => Err(Error::ValidationError(
            "Invalid HOST_PID value, it should be 0 or 1".to_string(),
        )),
        _ => Ok(()),
    }
}
