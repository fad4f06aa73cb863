//! Spec initialization
//!
//! Fills the gaps in a driver spec from the resolved driver config before
//! validation: sidecar and init-container images, pull policies, storage
//! class attributes, and the config-version annotation that marks which
//! configuration the instance was last initialized with.

use std::collections::BTreeMap;

use kube::Resource;
use tracing::{debug, info, warn};

use super::resources::DEFAULT_PULL_POLICY;
use crate::config::ResolvedDriverConfig;
use crate::crd::{ContainerTemplate, Driver, DriverInstance};
use crate::error::{Error, Result};

pub const CONFIG_VERSION_ANNOTATION: &str = "storage.dell.com/CSIDriverConfigVersion";

const ALLOW_VOLUME_EXPANSION_ATTR: &str = "allowVolumeExpansion";
const VOLUME_BINDING_MODE_ATTR: &str = "volumeBindingMode";
const DEFAULT_VOLUME_BINDING_MODE: &str = "Immediate";

fn image_annotation(sidecar: &str) -> String {
    format!("storage.dell.com/{}.Image", sidecar)
}

fn image_default_annotation(sidecar: &str) -> String {
    format!("storage.dell.com/{}.Image.IsDefault", sidecar)
}

/// Record the config version the instance is initialized with
///
/// Returns whether the annotation changed.
pub fn annotate_config_version(
    annotations: &mut BTreeMap<String, String>,
    config_version: &str,
) -> Result<bool> {
    if config_version.is_empty() {
        return Err(Error::ValidationError(
            "mandatory argument: ConfigVersion missing".to_string(),
        ));
    }
    match annotations.get(CONFIG_VERSION_ANNOTATION) {
        Some(current) if current == config_version => Ok(false),
        _ => {
            annotations.insert(
                CONFIG_VERSION_ANNOTATION.to_string(),
                config_version.to_string(),
            );
            Ok(true)
        }
    }
}

/// An instance is being upgraded when it was initialized with another config version
fn is_upgrade(annotations: &BTreeMap<String, String>, config: &ResolvedDriverConfig) -> bool {
    if annotations.is_empty() {
        return config.is_controller_ha();
    }
    annotations
        .get(CONFIG_VERSION_ANNOTATION)
        .map(|v| !v.is_empty() && *v != config.config_version)
        .unwrap_or(false)
}

fn mark_default_image(annotations: &mut BTreeMap<String, String>, sidecar: &ContainerTemplate) {
    annotations.insert(image_default_annotation(&sidecar.name), "true".to_string());
    annotations.insert(image_annotation(&sidecar.name), sidecar.image.clone());
}

fn default_sidecars(
    driver: &mut Driver,
    annotations: &mut BTreeMap<String, String>,
    config: &ResolvedDriverConfig,
    upgrade: bool,
) -> Result<()> {
    for sidecar in driver.side_cars.iter_mut() {
        if config.driver.sidecar(&sidecar.name).is_none() {
            continue;
        }
        let default_image = config.default_image_tag(&sidecar.name)?;
        if sidecar.image.is_empty() {
            sidecar.image = default_image;
            mark_default_image(annotations, sidecar);
        } else if sidecar.image != default_image {
            if upgrade {
                info!(
                    "Resetting image of sidecar {} to {} for the upgrade",
                    sidecar.name, default_image
                );
                sidecar.image = default_image;
                mark_default_image(annotations, sidecar);
            } else {
                annotations.insert(image_default_annotation(&sidecar.name), "false".to_string());
                annotations.insert(image_annotation(&sidecar.name), sidecar.image.clone());
            }
        } else {
            mark_default_image(annotations, sidecar);
        }
        if sidecar.image_pull_policy.is_empty() {
            sidecar.image_pull_policy = DEFAULT_PULL_POLICY.to_string();
        }
    }

    for name in config.driver.mandatory_sidecars() {
        if driver.side_cars.iter().any(|s| s.name == name) {
            continue;
        }
        let image = match config.default_image_tag(name) {
            Ok(image) => image,
            Err(e) => {
                warn!("Skipping mandatory sidecar {}: {}", name, e);
                continue;
            }
        };
        let sidecar = ContainerTemplate {
            name: name.to_string(),
            image,
            image_pull_policy: DEFAULT_PULL_POLICY.to_string(),
            ..Default::default()
        };
        mark_default_image(annotations, &sidecar);
        debug!("Adding mandatory sidecar {}", name);
        driver.side_cars.push(sidecar);
    }
    Ok(())
}

fn default_init_containers(driver: &mut Driver, config: &ResolvedDriverConfig) -> Result<()> {
    for init in driver.init_containers.iter_mut() {
        if init.image.is_empty() {
            init.image = config.default_image_tag(&init.name)?;
        }
        if init.image_pull_policy.is_empty() {
            init.image_pull_policy = DEFAULT_PULL_POLICY.to_string();
        }
    }
    Ok(())
}

fn default_storage_classes(driver: &mut Driver, config: &ResolvedDriverConfig, upgrade: bool) {
    let expansion = config
        .driver
        .storage_class_attr(ALLOW_VOLUME_EXPANSION_ATTR)
        .and_then(|v| v.as_bool());
    let binding_mode = config
        .driver
        .storage_class_attr(VOLUME_BINDING_MODE_ATTR)
        .and_then(|v| v.as_str());
    for sc in driver.storage_class.iter_mut() {
        if sc.allow_volume_expansion.is_none() {
            sc.allow_volume_expansion = expansion;
        }
        if sc.volume_binding_mode.is_empty() && !upgrade {
            if let Some(mode) = binding_mode {
                sc.volume_binding_mode = mode.to_string();
            }
        }
        if sc.volume_binding_mode.is_empty() {
            sc.volume_binding_mode = DEFAULT_VOLUME_BINDING_MODE.to_string();
        }
    }
}

/// Apply the driver config defaults to an instance
///
/// Returns whether the annotations changed. The spec itself may change as
/// well; callers compare it against the stored object.
pub fn initialize_spec<K: DriverInstance>(
    instance: &mut K,
    config: &ResolvedDriverConfig,
) -> Result<bool> {
    let mut updated = instance.meta().annotations.is_none();
    let mut annotations = instance.meta().annotations.clone().unwrap_or_default();
    let upgrade = is_upgrade(&annotations, config);
    let before = annotations.clone();

    let mut driver = instance.driver().clone();
    default_sidecars(&mut driver, &mut annotations, config, upgrade)?;
    default_init_containers(&mut driver, config)?;
    default_storage_classes(&mut driver, config, upgrade);
    annotate_config_version(&mut annotations, &driver.config_version)?;
    updated |= annotations != before;

    *instance.driver_mut() = driver;
    instance.meta_mut().annotations = Some(annotations);
    if let Some(status) = instance.driver_status() {
        let mut status = status.clone();
        status.last_update.error_message.clear();
        instance.set_driver_status(status);
    }
    Ok(updated)
}
