//! Dell CSI driver Custom Resource Definitions
//!
//! The five driver kinds (`CSIPowerMax`, `CSIIsilon`, `CSIUnity`, `CSIVXFlexOS`,
//! `CSIPowerStore`) share one [`Driver`] spec and one [`DriverStatus`]. Per-kind
//! behaviour lives in the [`DriverType`] table; the kinds differ only in their
//! API names, so they are generated from a single definition.

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::types::{
    ContainerTemplate, DriverState, DriverType, LastUpdate, PodStatus, SnapshotClass,
    StorageClass,
};

/// Desired state of one driver installation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    /// Driver configuration version, e.g. `v4`
    pub config_version: String,

    #[serde(default)]
    pub replicas: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dns_policy: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fs_group_policy: String,

    #[serde(default)]
    pub common: ContainerTemplate,

    #[serde(default)]
    pub controller: ContainerTemplate,

    #[serde(default)]
    pub node: ContainerTemplate,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub side_cars: Vec<ContainerTemplate>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<ContainerTemplate>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_class: Vec<StorageClass>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snapshot_class: Vec<SnapshotClass>,

    /// One-shot flag that forces a resync out of `Failed`/`InvalidConfig`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_update: bool,

    /// Overrides the credentials secret name baked into the driver config
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_secret: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_cert_secret: String,
}

/// Observed state of one driver installation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriverStatus {
    #[serde(default)]
    pub controller_status: PodStatus,

    #[serde(default)]
    pub node_status: PodStatus,

    /// Hash of the spec last fully synced
    #[serde(default)]
    pub driver_hash: u64,

    #[serde(default)]
    pub state: DriverState,

    #[serde(default)]
    pub last_update: LastUpdate,
}

/// Capability set shared by every driver custom resource
pub trait DriverInstance:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const DRIVER_TYPE: DriverType;

    /// Build an instance with the given name and driver spec
    fn from_driver(name: &str, driver: Driver) -> Self;

    fn driver(&self) -> &Driver;

    fn driver_mut(&mut self) -> &mut Driver;

    fn driver_status(&self) -> Option<&DriverStatus>;

    fn set_driver_status(&mut self, status: DriverStatus);

    /// JSON of the full spec, used for change detection
    fn spec_json(&self) -> serde_json::Result<Vec<u8>>;

    fn driver_type(&self) -> DriverType {
        Self::DRIVER_TYPE
    }

    fn controller_name(&self) -> String {
        Self::DRIVER_TYPE.controller_name()
    }

    fn daemonset_name(&self) -> String {
        Self::DRIVER_TYPE.daemonset_name()
    }

    fn default_driver_name(&self) -> String {
        Self::DRIVER_TYPE.default_driver_name()
    }
}

macro_rules! driver_resource {
    ($spec:ident, $root:ident, $kind:tt, $plural:tt, $short:tt, $driver_type:expr) => {
        #[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
        #[kube(
            group = "storage.dell.com",
            version = "v1",
            kind = $kind,
            plural = $plural,
            namespaced,
            derive = "PartialEq",
            status = "DriverStatus",
            shortname = $short,
            printcolumn = r#"{"name":"CreationTime","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
            printcolumn = r#"{"name":"DriverVersion","type":"string","jsonPath":".spec.driver.configVersion"}"#,
            printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
        )]
        #[serde(rename_all = "camelCase")]
        pub struct $spec {
            pub driver: Driver,
        }

        impl DriverInstance for $root {
            const DRIVER_TYPE: DriverType = $driver_type;

            fn from_driver(name: &str, driver: Driver) -> Self {
                $root::new(name, $spec { driver })
            }

            fn driver(&self) -> &Driver {
                &self.spec.driver
            }

            fn driver_mut(&mut self) -> &mut Driver {
                &mut self.spec.driver
            }

            fn driver_status(&self) -> Option<&DriverStatus> {
                self.status.as_ref()
            }

            fn set_driver_status(&mut self, status: DriverStatus) {
                self.status = Some(status);
            }

            fn spec_json(&self) -> serde_json::Result<Vec<u8>> {
                serde_json::to_vec(&self.spec)
            }
        }
    };
}

driver_resource!(CSIPowerMaxSpec, CSIPowerMax, "CSIPowerMax", "csipowermaxes", "powermax", DriverType::PowerMax);
driver_resource!(CSIIsilonSpec, CSIIsilon, "CSIIsilon", "csiisilons", "isilon", DriverType::Isilon);
driver_resource!(CSIUnitySpec, CSIUnity, "CSIUnity", "csiunities", "unity", DriverType::Unity);
driver_resource!(CSIVXFlexOSSpec, CSIVXFlexOS, "CSIVXFlexOS", "csivxflexoses", "vxflexos", DriverType::VxFlexOs);
driver_resource!(CSIPowerStoreSpec, CSIPowerStore, "CSIPowerStore", "csipowerstores", "powerstore", DriverType::PowerStore);
