//! Resource syncers
//!
//! Each `ensure_*` function converges one object (or one set of objects)
//! towards its desired form. Objects are created when missing and otherwise
//! replaced wholesale. ServiceAccounts are only ever created.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, PodSpec, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::api::storage::v1::{CSIDriver, StorageClass as K8sStorageClass};
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::client::{ClusterObject, ClusterStateClient};
use super::resources::{
    app_labels, build_cluster_role_binding, build_controller_cluster_role, build_csi_driver,
    build_daemonset, build_deployment, build_dummy_cluster_role, build_node_cluster_role,
    build_projected_cert_volume, build_service_account, build_snapshot_classes,
    build_statefulset, build_storage_classes, controller_volumes, dummy_owner_reference,
    node_volumes, pod_matches_template, DriverContext, RBAC_API_VERSION,
};
use crate::crd::VolumeSnapshotClass;
use crate::error::{Error, Result};

// ============================================================================
// Generic create-or-replace
// ============================================================================

/// Create `desired` when missing, otherwise replace the live object
///
/// The live resourceVersion is carried over so concurrent writers conflict
/// instead of silently overwriting each other.
pub async fn create_or_update<C, K>(client: &C, desired: &K) -> Result<K>
where
    C: ClusterStateClient,
    K: ClusterObject,
{
    let namespace = desired.namespace();
    let name = desired.name_any();
    match client.get::<K>(namespace.as_deref(), &name).await? {
        None => {
            info!("Creating {} {}", K::kind(&()), name);
            client.create(desired).await
        }
        Some(found) => replace(client, &found, desired).await,
    }
}

/// Replace `found` with `desired`, keeping the live resourceVersion
async fn replace<C, K>(client: &C, found: &K, desired: &K) -> Result<K>
where
    C: ClusterStateClient,
    K: ClusterObject,
{
    debug!("Updating {} {}", K::kind(&()), desired.name_any());
    let mut desired = desired.clone();
    desired.meta_mut().resource_version = found.meta().resource_version.clone();
    client.update(&desired).await
}

// ============================================================================
// RBAC, ServiceAccount, CSIDriver
// ============================================================================

/// Converge a ClusterRole and return the live object (with its uid)
pub async fn ensure_cluster_role<C: ClusterStateClient>(
    client: &C,
    role: &ClusterRole,
) -> Result<ClusterRole> {
    create_or_update(client, role).await
}

pub async fn ensure_cluster_role_binding<C: ClusterStateClient>(
    client: &C,
    binding: &ClusterRoleBinding,
) -> Result<()> {
    create_or_update(client, binding).await.map(|_| ())
}

/// Create the ServiceAccount when missing; an existing one is left alone
pub async fn ensure_service_account<C: ClusterStateClient>(
    client: &C,
    sa: &ServiceAccount,
) -> Result<()> {
    let name = sa.name_any();
    if client
        .get::<ServiceAccount>(sa.namespace().as_deref(), &name)
        .await?
        .is_none()
    {
        info!("Creating a new ServiceAccount {}", name);
        client.create(sa).await?;
    }
    Ok(())
}

/// Create the CSIDriver when missing
///
/// An existing CSIDriver is only rewritten to adopt the dummy owner when it
/// is still owned by something other than a ClusterRole; failures there are
/// logged and ignored.
pub async fn ensure_csi_driver<C: ClusterStateClient>(client: &C, desired: &CSIDriver) -> Result<()> {
    let name = desired.name_any();
    let Some(mut found) = client.get::<CSIDriver>(None, &name).await? else {
        info!("Creating a new CSIDriver {}", name);
        client.create(desired).await?;
        return Ok(());
    };
    let stale_owner = found
        .owner_references()
        .iter()
        .any(|r| r.api_version != RBAC_API_VERSION);
    if stale_owner {
        info!("Updating owner references of CSIDriver {}", name);
        found.metadata.owner_references = desired.metadata.owner_references.clone();
        if let Err(e) = client.update(&found).await {
            error!("Failed to update CSIDriver {}: {}", name, e);
        }
    }
    Ok(())
}

// ============================================================================
// Controller workloads
// ============================================================================

/// Delete live pods whose containers drifted from the template
async fn refresh_pods<C: ClusterStateClient>(client: &C, template: &PodSpec, pods: Vec<Pod>) {
    for pod in pods {
        let matches = pod
            .spec
            .as_ref()
            .map(|spec| pod_matches_template(template, spec))
            .unwrap_or(true);
        if matches {
            continue;
        }
        info!(
            "Controller pod spec doesn't match the template. Deleting pod {} to force an update",
            pod.name_any()
        );
        if let Err(e) = client
            .delete::<Pod>(pod.namespace().as_deref(), &pod.name_any())
            .await
        {
            error!("Failed to delete pod {}: {}. Continuing", pod.name_any(), e);
        }
    }
}

async fn wait_for_rollout(ready: Option<i32>, replicas: Option<i32>, delay: Duration) {
    if ready.unwrap_or(0) != replicas.unwrap_or(0) {
        info!("Waiting {:?} before checking the status of controller pods", delay);
        tokio::time::sleep(delay).await;
    }
}

/// Converge the controller StatefulSet and restart pods that run a stale spec
#[instrument(skip(client, desired), fields(name = %desired.name_any()))]
pub async fn ensure_statefulset<C: ClusterStateClient>(
    client: &C,
    desired: &StatefulSet,
    refresh_delay: Duration,
) -> Result<()> {
    let namespace = desired.namespace();
    let name = desired.name_any();
    let Some(live) = client.get::<StatefulSet>(namespace.as_deref(), &name).await? else {
        info!("Creating a new StatefulSet {}", name);
        client.create(desired).await?;
        return Ok(());
    };

    let updated = replace(client, &live, desired).await?;
    let status = updated.status.as_ref();
    wait_for_rollout(
        status.and_then(|s| s.ready_replicas),
        status.map(|s| s.replicas),
        refresh_delay,
    )
    .await;

    let Some(found) = client
        .get::<StatefulSet>(namespace.as_deref(), &name)
        .await?
    else {
        error!("Failed to find the StatefulSet {} after update", name);
        return Err(Error::SyncError(format!("statefulset {} disappeared", name)));
    };
    let Some(template) = found.spec.as_ref().and_then(|s| s.template.spec.clone()) else {
        return Ok(());
    };
    let replicas = found.status.as_ref().map(|s| s.replicas).unwrap_or(0);
    let mut pods = Vec::new();
    for i in (0..replicas).rev() {
        let pod_name = format!("{}-{}", name, i);
        match client.get::<Pod>(namespace.as_deref(), &pod_name).await {
            Ok(Some(pod)) => pods.push(pod),
            Ok(None) => debug!("Controller pod {} not found", pod_name),
            Err(e) => warn!("Failed to get controller pod {}: {}", pod_name, e),
        }
    }
    refresh_pods(client, &template, pods).await;
    Ok(())
}

/// Converge the HA controller Deployment and restart pods that run a stale spec
#[instrument(skip(client, desired), fields(name = %desired.name_any()))]
pub async fn ensure_deployment<C: ClusterStateClient>(
    client: &C,
    desired: &Deployment,
    refresh_delay: Duration,
) -> Result<()> {
    let namespace = desired.namespace();
    let name = desired.name_any();
    let Some(live) = client.get::<Deployment>(namespace.as_deref(), &name).await? else {
        info!("Creating a new Deployment {}", name);
        client.create(desired).await?;
        return Ok(());
    };

    let updated = replace(client, &live, desired).await?;
    let status = updated.status.as_ref();
    wait_for_rollout(
        status.and_then(|s| s.ready_replicas),
        status.and_then(|s| s.replicas),
        refresh_delay,
    )
    .await;

    let Some(found) = client.get::<Deployment>(namespace.as_deref(), &name).await? else {
        error!("Failed to find the Deployment {} after update", name);
        return Err(Error::SyncError(format!("deployment {} disappeared", name)));
    };
    let Some(template) = found.spec.as_ref().and_then(|s| s.template.spec.clone()) else {
        return Ok(());
    };
    let pods = client
        .list::<Pod>(namespace.as_deref(), &app_labels(&name))
        .await?;
    refresh_pods(client, &template, pods).await;
    Ok(())
}

pub async fn ensure_daemonset<C: ClusterStateClient>(client: &C, desired: &DaemonSet) -> Result<()> {
    create_or_update(client, desired).await.map(|_| ())
}

// ============================================================================
// StorageClass / VolumeSnapshotClass sets
// ============================================================================

/// Whether a live class was created for this driver instance
fn owned_by<K: ClusterObject>(obj: &K, dummy_name: &str) -> bool {
    obj.owner_references().iter().any(|r| r.name == dummy_name)
}

/// Converge a set of cluster-scoped classes
///
/// Every desired class is created or replaced; live classes of the same
/// provisioner owned by `dummy_name` that are no longer desired are deleted
/// best effort. Create/update errors are collected, not short-circuited.
async fn ensure_class_set<C, K>(
    client: &C,
    desired: &[K],
    dummy_name: &str,
    same_provisioner: impl Fn(&K) -> bool,
) -> Vec<Error>
where
    C: ClusterStateClient,
    K: ClusterObject,
{
    let wanted: BTreeSet<String> = desired.iter().map(|c| c.name_any()).collect();
    let stale: Vec<String> = match client.list::<K>(None, &BTreeMap::new()).await {
        Ok(live) => live
            .iter()
            .filter(|c| same_provisioner(*c) && owned_by(*c, dummy_name))
            .map(|c| c.name_any())
            .filter(|n| !wanted.contains(n))
            .collect(),
        Err(e) => {
            warn!("Failed to list {}: {}", K::plural(&()), e);
            Vec::new()
        }
    };

    let mut errors = Vec::new();
    for class in desired {
        if let Err(e) = create_or_update(client, class).await {
            error!("Failed to sync {} {}: {}", K::kind(&()), class.name_any(), e);
            errors.push(e);
        }
    }
    for name in stale {
        info!("Deleting stale {} {}", K::kind(&()), name);
        if let Err(e) = client.delete::<K>(None, &name).await {
            warn!("Failed to delete {} {}: {}", K::kind(&()), name, e);
        }
    }
    errors
}

pub async fn ensure_storage_classes<C: ClusterStateClient>(
    client: &C,
    desired: &[K8sStorageClass],
    provisioner: &str,
    dummy_name: &str,
) -> Vec<Error> {
    ensure_class_set(client, desired, dummy_name, |sc: &K8sStorageClass| {
        sc.provisioner == provisioner
    })
    .await
}

pub async fn ensure_snapshot_classes<C: ClusterStateClient>(
    client: &C,
    desired: &[VolumeSnapshotClass],
    driver_name: &str,
    dummy_name: &str,
) -> Vec<Error> {
    ensure_class_set(client, desired, dummy_name, |vsc: &VolumeSnapshotClass| {
        vsc.driver == driver_name
    })
    .await
}

// ============================================================================
// Driver orchestration
// ============================================================================

/// Converge every object of one driver installation
///
/// Any error aborts the sync; the engine decides how to retry.
#[instrument(skip(client, ctx), fields(name = %ctx.name, namespace = %ctx.namespace))]
pub async fn sync_driver<C: ClusterStateClient>(
    client: &C,
    ctx: &DriverContext<'_>,
    refresh_delay: Duration,
) -> Result<()> {
    let dummy = ensure_cluster_role(client, &build_dummy_cluster_role(ctx)).await?;
    let dummy_owner = dummy_owner_reference(&dummy);

    ensure_cluster_role(client, &build_controller_cluster_role(ctx, &dummy_owner)).await?;
    ensure_service_account(client, &build_service_account(ctx, &ctx.controller_name())).await?;
    ensure_cluster_role_binding(
        client,
        &build_cluster_role_binding(ctx, "controller", &dummy_owner),
    )
    .await?;

    if ctx.create_node_service_account() {
        ensure_service_account(client, &build_service_account(ctx, &ctx.daemonset_name())).await?;
        ensure_cluster_role(client, &build_node_cluster_role(ctx, &dummy_owner)).await?;
        ensure_cluster_role_binding(client, &build_cluster_role_binding(ctx, "node", &dummy_owner))
            .await?;
    }

    ensure_csi_driver(client, &build_csi_driver(ctx, &dummy_owner)).await?;

    let projected = if ctx.driver_type.mounts_projected_certs() {
        match client
            .list::<Secret>(Some(&ctx.namespace), &BTreeMap::new())
            .await
        {
            Ok(secrets) => Some(build_projected_cert_volume(ctx.driver_type, &secrets)),
            Err(e) => {
                error!("Failed to list secrets: {}", e);
                None
            }
        }
    } else {
        None
    };

    let volumes = controller_volumes(ctx, projected.as_ref());
    if ctx.config.is_controller_ha() {
        ensure_deployment(client, &build_deployment(ctx, volumes), refresh_delay).await?;
        let name = ctx.controller_name();
        if client
            .get::<StatefulSet>(Some(&ctx.namespace), &name)
            .await
            .ok()
            .flatten()
            .is_some()
        {
            info!("Deleting StatefulSet {} replaced by a Deployment", name);
            if let Err(e) = client.delete::<StatefulSet>(Some(&ctx.namespace), &name).await {
                error!("Delete statefulset failed: {}", e);
            }
        }
    } else {
        ensure_statefulset(client, &build_statefulset(ctx, volumes), refresh_delay).await?;
    }

    let daemonset = build_daemonset(ctx, node_volumes(ctx, projected.as_ref()))?;
    ensure_daemonset(client, &daemonset).await?;

    let dummy_name = dummy.name_any();
    let driver_name = ctx.driver_name();
    let mut errors = ensure_storage_classes(
        client,
        &build_storage_classes(ctx, &dummy_owner),
        &driver_name,
        &dummy_name,
    )
    .await;
    errors.extend(
        ensure_snapshot_classes(
            client,
            &build_snapshot_classes(ctx, &dummy_owner),
            &driver_name,
            &dummy_name,
        )
        .await,
    );
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(Error::SyncError(messages.join("; ")));
    }
    Ok(())
}
