//! Cluster state access
//!
//! The engine, syncers and state calculator talk to the API server only
//! through [`ClusterStateClient`]. [`KubeClusterClient`] is the production
//! implementation; tests use [`InMemoryCluster`](super::memory::InMemoryCluster).

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::api::storage::v1::{CSIDriver, StorageClass};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::crd::{
    CSIIsilon, CSIPowerMax, CSIPowerMaxRevProxy, CSIPowerStore, CSIUnity, CSIVXFlexOS,
    VolumeSnapshotClass,
};
use crate::error::{Error, Result};

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "dell-csi-operator";

/// A typed object the operator reads or writes
pub trait ClusterObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const NAMESPACED: bool;

    /// Typed API handle; `namespace` is ignored for cluster-scoped kinds
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

macro_rules! namespaced_objects {
    ($($kind:ty),* $(,)?) => {$(
        impl ClusterObject for $kind {
            const NAMESPACED: bool = true;

            fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                Api::namespaced(client, namespace.unwrap_or("default"))
            }
        }
    )*};
}

macro_rules! cluster_objects {
    ($($kind:ty),* $(,)?) => {$(
        impl ClusterObject for $kind {
            const NAMESPACED: bool = false;

            fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
                Api::all(client)
            }
        }
    )*};
}

namespaced_objects!(
    ServiceAccount,
    Secret,
    ConfigMap,
    Service,
    Pod,
    StatefulSet,
    Deployment,
    DaemonSet,
    Role,
    RoleBinding,
    CSIPowerMax,
    CSIIsilon,
    CSIUnity,
    CSIVXFlexOS,
    CSIPowerStore,
    CSIPowerMaxRevProxy,
);

cluster_objects!(ClusterRole, ClusterRoleBinding, CSIDriver, StorageClass, VolumeSnapshotClass);

/// Render a label map as a selector string, `k1=v1,k2=v2`
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether `labels` carries every pair of `selector`
pub fn matches_labels(
    labels: Option<&BTreeMap<String, String>>,
    selector: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

/// Read/write access to cluster objects
///
/// `delete` treats a missing object as success. `update` is a full-object
/// replace; `update_status` writes only the status subresource.
#[async_trait]
pub trait ClusterStateClient: Send + Sync {
    async fn get<K: ClusterObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>;

    async fn list<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>>;

    async fn create<K: ClusterObject>(&self, obj: &K) -> Result<K>;

    async fn update<K: ClusterObject>(&self, obj: &K) -> Result<K>;

    async fn delete<K: ClusterObject>(&self, namespace: Option<&str>, name: &str) -> Result<()>;

    async fn update_status<K: ClusterObject>(&self, obj: &K) -> Result<K>;
}

/// [`ClusterStateClient`] backed by the API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ClusterStateClient for KubeClusterClient {
    async fn get<K: ClusterObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        let api = K::api(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let api = K::api(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if !labels.is_empty() {
            params = params.labels(&label_selector(labels));
        }
        Ok(api.list(&params).await?.items)
    }

    async fn create<K: ClusterObject>(&self, obj: &K) -> Result<K> {
        let api = K::api(self.client.clone(), obj.namespace().as_deref());
        Ok(api.create(&PostParams::default(), obj).await?)
    }

    async fn update<K: ClusterObject>(&self, obj: &K) -> Result<K> {
        let api = K::api(self.client.clone(), obj.namespace().as_deref());
        Ok(api
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await?)
    }

    async fn delete<K: ClusterObject>(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        let api = K::api(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn update_status<K: ClusterObject>(&self, obj: &K) -> Result<K> {
        let api = K::api(self.client.clone(), obj.namespace().as_deref());
        let body = serde_json::to_value(obj)?;
        let patch = json!({ "status": body.get("status").cloned().unwrap_or_default() });
        Ok(api
            .patch_status(
                &obj.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?)
    }
}
