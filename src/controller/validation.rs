//! Generic driver spec validation
//!
//! Checks every driver type shares: the driver image, the credentials
//! secret, user env vars against the driver config, and the certificate
//! secret when certificate validation is requested.

use k8s_openapi::api::core::v1::{EnvVar, Secret};
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use super::client::ClusterStateClient;
use super::merge::{env_value, merge_envs};
use crate::config::{ContainerKind, ResolvedDriverConfig};
use crate::crd::{DriverInstance, DriverType};
use crate::error::{Error, Result};

const ISCSI_CHAP_ENV: &str = "X_CSI_POWERMAX_ISCSI_ENABLE_CHAP";

/// Whether the credentials secret is still read from env vars in this config version
fn uses_credentials_secret(driver_type: DriverType, config_version: &str) -> bool {
    match driver_type {
        DriverType::Unity => config_version == "v1",
        DriverType::PowerStore => matches!(config_version, "v1" | "v2"),
        DriverType::Isilon => matches!(config_version, "v1" | "v2" | "v3" | "v4"),
        DriverType::VxFlexOs => matches!(config_version, "v2" | "v3"),
        DriverType::PowerMax => true,
    }
}

fn user_envs<K: DriverInstance>(instance: &K, kind: ContainerKind) -> Vec<EnvVar> {
    let driver = instance.driver();
    let overrides = match kind {
        ContainerKind::Controller => &driver.controller.envs,
        ContainerKind::Node => &driver.node.envs,
    };
    merge_envs(&driver.common.envs, overrides)
}

async fn check_credentials_secret<C, K>(
    client: &C,
    instance: &K,
    config: &ResolvedDriverConfig,
    kind: ContainerKind,
) -> Result<()>
where
    C: ClusterStateClient,
    K: DriverInstance,
{
    let driver_type = K::DRIVER_TYPE;
    if !uses_credentials_secret(driver_type, &config.config_version) {
        info!(
            "{} {} reads its credentials from a mounted config secret",
            driver_type, config.config_version
        );
        return Ok(());
    }

    let config_envs = config.driver.envs(kind);
    let user_env_name = driver_type.user_env_name();
    if !config_envs.iter().any(|e| e.name == user_env_name) {
        error!("Internal error: credential details missing from driver configuration");
        return Err(Error::ConfigError(format!(
            "failed to find env {} in the driver configuration",
            user_env_name
        )));
    }
    let driver = instance.driver();
    let secret_name = if driver.auth_secret.is_empty() {
        config
            .driver
            .secret_name_for_env(user_env_name, kind)
            .unwrap_or_default()
    } else {
        driver.auth_secret.clone()
    };

    let namespace = instance.namespace().unwrap_or_default();
    let secret = match client.get::<Secret>(Some(&namespace), &secret_name).await {
        Ok(Some(secret)) => secret,
        Ok(None) => {
            return Err(Error::ValidationError(format!(
                "failed to find secret: [{}] for connecting to the API endpoint",
                secret_name
            )))
        }
        Err(e) => {
            warn!(
                "Failed to query for secret {}. The driver pod may not start: {}",
                secret_name, e
            );
            return Ok(());
        }
    };

    let data = secret.data.unwrap_or_default();
    for key in ["username", "password"] {
        if !data.contains_key(key) {
            return Err(Error::ValidationError(format!(
                "{} key not found in secret",
                key
            )));
        }
    }
    if kind == ContainerKind::Node
        && driver_type == DriverType::PowerMax
        && config.config_version != "v1"
    {
        let envs = merge_envs(&config_envs, &user_envs(instance, kind));
        let chap_enabled = env_value(&envs, ISCSI_CHAP_ENV)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if chap_enabled && !data.contains_key("chapsecret") {
            return Err(Error::ValidationError(
                "chapsecret key not found in secret".to_string(),
            ));
        }
    }
    Ok(())
}

/// Mandatory envs must be present with a value; every env must match its declared type
pub fn validate_user_envs(
    config: &ResolvedDriverConfig,
    envs: &[EnvVar],
    kind: ContainerKind,
    strict: bool,
) -> Result<()> {
    for name in config.driver.mandatory_env_names(kind) {
        match envs.iter().find(|e| e.name == name) {
            None => {
                return Err(Error::ValidationError(format!(
                    "mandatory Env - {} not specified in user spec",
                    name
                )))
            }
            Some(env) if env.value.as_deref().unwrap_or_default().is_empty() => {
                return Err(Error::ValidationError(format!(
                    "value for mandatory Env - {} not specified in user spec",
                    name
                )))
            }
            Some(_) => {}
        }
    }
    envs.iter()
        .try_for_each(|env| config.driver.validate_env_type(env, strict))
}

fn certificate_validation_requested(driver_type: DriverType, envs: &[EnvVar]) -> bool {
    env_value(envs, &driver_type.cert_validation_env())
        .map(|v| v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

async fn check_cert_secret<C, K>(
    client: &C,
    instance: &K,
    config: &ResolvedDriverConfig,
    kind: ContainerKind,
) -> Result<()>
where
    C: ClusterStateClient,
    K: DriverInstance,
{
    let volume_name = K::DRIVER_TYPE.cert_volume_name();
    let secret_name = config
        .driver
        .volumes(kind)
        .iter()
        .find(|v| v.name == volume_name)
        .and_then(|v| v.secret.as_ref())
        .and_then(|s| s.secret_name.clone());
    let Some(secret_name) = secret_name else {
        info!(
            "Volume {} not found in config. Secret name for validation of certs not found. Continuing",
            volume_name
        );
        return Ok(());
    };
    let namespace = instance.namespace().unwrap_or_default();
    match client.get::<Secret>(Some(&namespace), &secret_name).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(Error::ValidationError(format!(
            "failed to find secret {} and certificate validation is requested",
            secret_name
        ))),
        Err(e) => {
            warn!(
                "Failed to query for secret {}. The {} pod may not start: {}",
                secret_name, kind, e
            );
            Ok(())
        }
    }
}

/// Validate a driver spec against the cluster and its resolved config
#[instrument(skip(client, instance, config), fields(name = %instance.name_any(), namespace = instance.namespace()))]
pub async fn validate_spec<C, K>(
    client: &C,
    instance: &K,
    config: &ResolvedDriverConfig,
    strict: bool,
) -> Result<()>
where
    C: ClusterStateClient,
    K: DriverInstance,
{
    let driver = instance.driver();
    if driver.common.image.is_empty() {
        return Err(Error::ValidationError(
            "driver image not specified in spec".to_string(),
        ));
    }

    for kind in [ContainerKind::Controller, ContainerKind::Node] {
        check_credentials_secret(client, instance, config, kind).await?;
        let envs = user_envs(instance, kind);
        validate_user_envs(config, &envs, kind, strict)?;
        if certificate_validation_requested(K::DRIVER_TYPE, &envs) {
            check_cert_secret(client, instance, config, kind).await?;
        }
    }

    if !driver.storage_class.is_empty() {
        warn!("Creation of storage class via operator is deprecated");
    }
    if !driver.snapshot_class.is_empty() {
        warn!("Creation of snapshot class via operator is deprecated");
    }
    Ok(())
}
