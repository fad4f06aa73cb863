//! VolumeSnapshotClass (`snapshot.storage.k8s.io/v1`)
//!
//! k8s-openapi does not ship the external-snapshotter types, and the object
//! keeps its fields at the top level rather than under `spec`, so the
//! `kube::Resource` implementation is written out by hand.

use std::borrow::Cow;
use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ClusterResourceScope;
use kube::Resource;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotClass {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    pub driver: String,

    pub deletion_policy: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,
}

impl VolumeSnapshotClass {
    pub fn new(metadata: ObjectMeta, driver: String) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata,
            driver,
            deletion_policy: "Delete".to_string(),
            parameters: None,
        }
    }
}

fn default_api_version() -> String {
    "snapshot.storage.k8s.io/v1".to_string()
}

fn default_kind() -> String {
    "VolumeSnapshotClass".to_string()
}

impl Resource for VolumeSnapshotClass {
    type DynamicType = ();
    type Scope = ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "VolumeSnapshotClass".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        "snapshot.storage.k8s.io".into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        "v1".into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "volumesnapshotclasses".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
