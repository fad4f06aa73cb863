//! CSIPowerMaxRevProxy Custom Resource Definition
//!
//! Describes a PowerMax reverse proxy: a single Deployment fronted by a
//! Service, configured through a ConfigMap rendered from the spec.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{DriverState, LastUpdate, PodStatus};

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "storage.dell.com",
    version = "v1",
    kind = "CSIPowerMaxRevProxy",
    plural = "csipowermaxrevproxies",
    namespaced,
    derive = "PartialEq",
    status = "CSIPowerMaxRevProxyStatus",
    shortname = "revproxy",
    printcolumn = r#"{"name":"CreationTime","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CSIPowerMaxRevProxySpec {
    pub image: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,

    pub tls_secret: String,

    #[serde(rename = "config")]
    pub rev_proxy: RevProxyConfig,
}

/// Reverse proxy configuration, rendered verbatim into the proxy ConfigMap
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevProxyConfig {
    /// `Linked` (default) or `StandAlone`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_config: Option<LinkConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stand_alone_config: Option<StandAloneConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    pub primary: ManagementServerConfig,

    #[serde(default)]
    pub backup: ManagementServerConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StandAloneConfig {
    #[serde(default, rename = "storageArrays")]
    pub storage_arrays: Vec<StorageArrayConfig>,

    #[serde(default, rename = "managementServers")]
    pub management_servers: Vec<ManagementServerConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagementServerConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub array_credential_secret: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_certificate_validation: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cert_secret: String,

    #[serde(default)]
    pub limits: ProxyLimits,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyLimits {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_active_read: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_active_write: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_out_standing_read: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_out_standing_write: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StorageArrayConfig {
    #[serde(rename = "storageArrayId")]
    pub storage_array_id: String,

    #[serde(rename = "primaryURL")]
    pub primary_url: String,

    #[serde(default, rename = "backupURL", skip_serializing_if = "String::is_empty")]
    pub backup_url: String,

    #[serde(default, rename = "proxyCredentialSecrets")]
    pub proxy_credential_secrets: Vec<String>,
}

/// Observed state of the reverse proxy
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CSIPowerMaxRevProxyStatus {
    #[serde(default)]
    pub proxy_status: PodStatus,

    #[serde(default)]
    pub proxy_hash: u64,

    #[serde(default)]
    pub state: DriverState,

    #[serde(default)]
    pub last_update: LastUpdate,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}
