//! Observed-state calculation
//!
//! Reads the controller workload and node DaemonSet of a driver (or the
//! Deployment of the reverse proxy) and partitions their pods into
//! available / ready / starting / stopped.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};
use tracing::debug;

use super::client::{ClusterObject, ClusterStateClient};
use crate::crd::{DriverInstance, PodStatus};
use crate::error::{Error, Result};

/// Result of one state calculation
#[derive(Debug, Default)]
pub struct StateReport {
    /// Every desired replica of every workload is available
    pub running: bool,
    pub controller: PodStatus,
    pub node: PodStatus,
    /// Composite of the per-workload errors; the pod status is still usable
    pub error: Option<Error>,
}

/// Classify pods by phase
///
/// A running pod is available once every container reports running, and
/// ready before that.
pub fn classify_pods(pods: &[Pod]) -> PodStatus {
    let mut status = PodStatus::default();
    for pod in pods {
        let name = pod.name_any();
        let pod_status = pod.status.as_ref();
        match pod_status.and_then(|s| s.phase.as_deref()) {
            Some("Running") => {
                let all_running = pod_status
                    .and_then(|s| s.container_statuses.as_ref())
                    .map(|statuses| {
                        statuses
                            .iter()
                            .all(|c| c.state.as_ref().and_then(|s| s.running.as_ref()).is_some())
                    })
                    .unwrap_or(true);
                if all_running {
                    status.available.push(name);
                } else {
                    status.ready.push(name);
                }
            }
            Some("Pending") | Some("Unknown") => status.starting.push(name),
            Some("Failed") => status.stopped.push(name),
            _ => {}
        }
    }
    status
}

fn not_found<K: ClusterObject>(name: &str) -> Error {
    Error::StatusError(format!(
        "{}.{} \"{}\" not found",
        K::plural(&()),
        K::group(&()),
        name
    ))
}

/// Desired count and pod partition of one workload
///
/// A workload with nothing desired or nothing ready is reported as a whole
/// under `stopped`, without listing its pods.
async fn workload_status<C: ClusterStateClient>(
    client: &C,
    namespace: &str,
    name: &str,
    selector_key: &str,
    desired: i32,
    ready: i32,
) -> Result<(i32, PodStatus)> {
    if desired == 0 || ready == 0 {
        return Ok((
            desired,
            PodStatus {
                stopped: vec![name.to_string()],
                ..Default::default()
            },
        ));
    }
    let selector = BTreeMap::from([(selector_key.to_string(), name.to_string())]);
    let pods = client.list::<Pod>(Some(namespace), &selector).await?;
    Ok((desired, classify_pods(&pods)))
}

async fn controller_status<C: ClusterStateClient>(
    client: &C,
    namespace: &str,
    name: &str,
    controller_ha: bool,
) -> Result<(i32, PodStatus)> {
    let (desired, ready) = if controller_ha {
        let deployment = client
            .get::<Deployment>(Some(namespace), name)
            .await?
            .ok_or_else(|| not_found::<Deployment>(name))?;
        (
            deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
            deployment.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
        )
    } else {
        let statefulset = client
            .get::<StatefulSet>(Some(namespace), name)
            .await?
            .ok_or_else(|| not_found::<StatefulSet>(name))?;
        (
            statefulset.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
            statefulset.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
        )
    };
    workload_status(client, namespace, name, "app", desired, ready).await
}

async fn daemonset_status<C: ClusterStateClient>(
    client: &C,
    namespace: &str,
    name: &str,
) -> Result<(i32, PodStatus)> {
    let daemonset = client
        .get::<DaemonSet>(Some(namespace), name)
        .await?
        .ok_or_else(|| not_found::<DaemonSet>(name))?;
    let status = daemonset.status.unwrap_or_default();
    workload_status(
        client,
        namespace,
        name,
        "app",
        status.desired_number_scheduled,
        status.number_ready,
    )
    .await
}

fn fully_available(desired: i32, status: &PodStatus) -> bool {
    desired != 0 && usize::try_from(desired).ok() == Some(status.available.len())
}

/// Calculate the observed state of a driver installation
pub async fn calculate_state<C, K>(client: &C, instance: &K, controller_ha: bool) -> StateReport
where
    C: ClusterStateClient,
    K: DriverInstance,
{
    let namespace = instance.namespace().unwrap_or_default();
    let controller = controller_status(client, &namespace, &instance.controller_name(), controller_ha).await;
    let node = daemonset_status(client, &namespace, &instance.daemonset_name()).await;

    let mut report = StateReport::default();
    let mut controller_desired = 0;
    let mut node_desired = 0;
    let controller_err = match controller {
        Ok((desired, status)) => {
            controller_desired = desired;
            report.controller = status;
            None
        }
        Err(e) => Some(e),
    };
    let node_err = match node {
        Ok((desired, status)) => {
            node_desired = desired;
            report.node = status;
            None
        }
        Err(e) => Some(e),
    };
    report.running = fully_available(controller_desired, &report.controller)
        && fully_available(node_desired, &report.node);
    report.error = match (controller_err, node_err) {
        (Some(c), Some(n)) => Some(Error::StatusError(format!(
            "statefulseterror: {}, daemonseterror: {}",
            c, n
        ))),
        (Some(e), None) | (None, Some(e)) => Some(e),
        (None, None) => None,
    };
    debug!(
        "Calculated state of {}: running={} controller={:?} node={:?}",
        instance.name_any(),
        report.running,
        report.controller,
        report.node
    );
    report
}

async fn deployment_status<C: ClusterStateClient>(
    client: &C,
    namespace: &str,
    name: &str,
) -> Result<(i32, PodStatus)> {
    let deployment = client
        .get::<Deployment>(Some(namespace), name)
        .await?
        .ok_or_else(|| not_found::<Deployment>(name))?;
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    let ready = deployment.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
    workload_status(client, namespace, name, "name", desired, ready).await
}

/// Calculate the observed state of the reverse proxy Deployment
///
/// Proxy pods are selected by `name={deployment}`.
pub async fn calculate_proxy_state<C: ClusterStateClient>(
    client: &C,
    namespace: &str,
    deployment_name: &str,
) -> (bool, PodStatus, Option<Error>) {
    match deployment_status(client, namespace, deployment_name).await {
        Ok((desired, status)) => (fully_available(desired, &status), status, None),
        Err(e) => (false, PodStatus::default(), Some(e)),
    }
}
