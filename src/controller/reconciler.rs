//! Reconciliation engine for the Dell CSI driver kinds
//!
//! One [`DriverReconciler`] runs per enabled driver kind. Each reconcile
//! resolves the driver config, initializes and validates the spec, converges
//! the cluster objects and records the observed state, following the
//! lifecycle rules in [`super::state`].

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::rbac::v1::ClusterRole;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Resource, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::client::{ClusterObject, ClusterStateClient, KubeClusterClient};
use super::driver_hooks::{initialize_driver_spec, validate_driver_spec};
use super::finalizers::{add_finalizer, is_being_deleted, remove_finalizer};
#[cfg(feature = "metrics")]
use super::metrics;
use super::resources::{dummy_cluster_role_name, DriverContext};
use super::spec_init::{annotate_config_version, initialize_spec};
use super::state::{
    decide_path, failure_decision, set_last_status_update, settled_state, spec_hash,
    success_requeue, FailureDecision, Path, Requeue, DEFAULT_RETRY_INTERVAL,
};
use super::status::{calculate_state, StateReport};
use super::sync::sync_driver;
use super::validation::validate_spec;
use crate::config::{DriverConfigProvider, OperatorConfig, ResolvedDriverConfig};
use crate::crd::{ConditionType, DriverInstance, DriverState, DriverStatus};
use crate::error::{Error, Result};

/// Requeue delay for errors that are unlikely to clear on their own
const NON_RETRIABLE_REQUEUE: Duration = Duration::from_secs(60);

fn apply_report(status: &mut DriverStatus, report: StateReport) -> Option<Error> {
    status.controller_status = report.controller;
    status.node_status = report.node;
    report.error
}

/// Reconciler for one driver kind
pub struct DriverReconciler<K, C> {
    client: C,
    provider: Arc<dyn DriverConfigProvider>,
    settings: OperatorConfig,
    attempts: AtomicU32,
    _kind: PhantomData<fn() -> K>,
}

impl<K, C> DriverReconciler<K, C>
where
    K: DriverInstance + ClusterObject,
    C: ClusterStateClient,
{
    pub fn new(client: C, provider: Arc<dyn DriverConfigProvider>, settings: OperatorConfig) -> Self {
        Self {
            client,
            provider,
            settings,
            attempts: AtomicU32::new(0),
            _kind: PhantomData,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Number of reconciles started so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    fn resolve_config(&self, instance: &K) -> Result<ResolvedDriverConfig> {
        self.provider.resolve(
            K::DRIVER_TYPE,
            &instance.driver().config_version,
            &self.settings.kube_version,
        )
    }

    /// Reconcile one instance
    #[instrument(skip(self), fields(kind = %K::DRIVER_TYPE))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Requeue> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        info!(attempt, "Reconciling {} {}/{}", K::kind(&()), namespace, name);

        let Some(mut instance) = self.client.get::<K>(Some(namespace), name).await? else {
            debug!("{}/{} no longer exists", namespace, name);
            return Ok(Requeue::Never);
        };
        if is_being_deleted(&instance) {
            return self.finalize(instance).await;
        }
        if add_finalizer(&mut instance) {
            instance = self.client.update(&instance).await.map_err(|e| {
                error!("Failed to update CR with finalizer: {}", e);
                e
            })?;
        }

        let config = match self.resolve_config(&instance) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to initialize driver config: {}", e);
                // Without a config the controller is looked up as a Deployment
                return self.handle_validation_error(&mut instance, true, e).await;
            }
        };
        let controller_ha = config.is_controller_ha();

        let old_status = instance.driver_status().cloned().unwrap_or_default();
        if old_status.driver_hash == 0 || instance.driver().config_version.is_empty() {
            let config_version = instance.driver().config_version.clone();
            let mut annotations = instance.annotations().clone();
            match annotate_config_version(&mut annotations, &config_version) {
                Err(e) => return self.handle_validation_error(&mut instance, controller_ha, e).await,
                Ok(true) => {
                    info!(
                        "Installing {} with config version {}. Updating annotations",
                        name, config_version
                    );
                    instance.meta_mut().annotations = Some(annotations);
                    if let Err(e) = self.client.update(&instance).await {
                        warn!("Failed to record the config version annotation: {}", e);
                    }
                    return Ok(Requeue::Immediately);
                }
                Ok(false) => {}
            }
        }

        let mut new_status = old_status.clone();
        info!("Driver was previously in ({}) state", old_status.state);
        let expected_hash = spec_hash(&instance.spec_json()?);
        let changed = expected_hash != old_status.driver_hash;
        if changed {
            info!(
                "Driver spec has changed ({} vs {})",
                old_status.driver_hash, expected_hash
            );
            new_status.driver_hash = expected_hash;
        }
        let force_update = instance.driver().force_update;
        let path = decide_path(old_status.state, changed, force_update);
        match path {
            Path::Stop => {
                info!(
                    "CR is in ({}) state. Reconcile request won't be requeued",
                    old_status.state
                );
                return Ok(Requeue::Never);
            }
            Path::Resync => new_status.state = DriverState::Updating,
            Path::CheckStateOnly => {
                debug!("Recalculating driver state only as there is no change in driver spec")
            }
        }

        let initialized = initialize_spec(&mut instance, &config).and_then(|common| {
            initialize_driver_spec(&mut instance).map(|driver| common || driver)
        });
        let spec_updated = match initialized {
            Ok(updated) => updated,
            Err(e) => {
                error!("Failed to initialize spec: {}", e);
                return self.handle_validation_error(&mut instance, controller_ha, e).await;
            }
        };

        if path == Path::CheckStateOnly {
            return self
                .handle_success(&mut instance, controller_ha, new_status, &old_status)
                .await;
        }

        let mut is_updated = spec_updated || changed;
        if force_update {
            info!("Force update requested");
            instance.driver_mut().force_update = false;
            is_updated = true;
        }
        if is_updated {
            let status = instance.driver_status().cloned();
            instance = self.client.update(&instance).await?;
            if let Some(status) = status {
                instance.set_driver_status(status);
            }
            new_status.last_update = set_last_status_update(
                &old_status.last_update,
                Some(ConditionType::Updating),
                "",
                Utc::now(),
            );
            self.write_status(&mut instance, &new_status, &old_status)
                .await?;
        }

        let validated = match validate_spec(
            &self.client,
            &instance,
            &config,
            self.settings.strict_check,
        )
        .await
        {
            Ok(()) => validate_driver_spec(&self.client, &instance).await,
            Err(e) => Err(e),
        };
        if let Err(e) = validated {
            return self.handle_validation_error(&mut instance, controller_ha, e).await;
        }

        new_status.state = DriverState::Updating;
        let synced = {
            let ctx = DriverContext::new(&instance, &config, self.settings.is_openshift);
            sync_driver(&self.client, &ctx, self.settings.pod_refresh_delay).await
        };
        match synced {
            Ok(()) => self.handle_synced(&mut instance, controller_ha, new_status, &old_status).await,
            Err(e) => self.handle_sync_error(&mut instance, controller_ha, new_status, &old_status, e).await,
        }
    }

    async fn handle_synced(
        &self,
        instance: &mut K,
        controller_ha: bool,
        mut new_status: DriverStatus,
        old_status: &DriverStatus,
    ) -> Result<Requeue> {
        let report = calculate_state(&self.client, instance, controller_ha).await;
        let running = report.running;
        let message = apply_report(&mut new_status, report)
            .map(|e| e.to_string())
            .unwrap_or_default();
        new_status.state = if running {
            DriverState::Running
        } else {
            DriverState::Succeeded
        };
        new_status.last_update = set_last_status_update(
            &old_status.last_update,
            ConditionType::from_state(new_status.state),
            &message,
            Utc::now(),
        );
        self.write_status(instance, &new_status, old_status).await?;
        info!("Driver synced, state {}", new_status.state);
        if running {
            Ok(Requeue::Never)
        } else {
            Ok(Requeue::After(DEFAULT_RETRY_INTERVAL))
        }
    }

    async fn handle_sync_error(
        &self,
        instance: &mut K,
        controller_ha: bool,
        mut new_status: DriverStatus,
        old_status: &DriverStatus,
        sync_error: Error,
    ) -> Result<Requeue> {
        error!("Failed to sync driver: {}", sync_error);
        let report = calculate_state(&self.client, instance, controller_ha).await;
        apply_report(&mut new_status, report);
        let message = sync_error.to_string();
        let now = Utc::now();
        new_status.last_update = set_last_status_update(
            &old_status.last_update,
            Some(ConditionType::Error),
            &message,
            now,
        );

        match failure_decision(&old_status.last_update, now) {
            FailureDecision::Escalate => {
                warn!("Driver kept failing past the retry limit. Marking it Failed");
                new_status.state = DriverState::Failed;
                new_status.last_update = set_last_status_update(
                    &old_status.last_update,
                    Some(ConditionType::Failed),
                    &message,
                    now,
                );
                if let Err(e) = self.write_status(instance, &new_status, old_status).await {
                    warn!("Failed to update CR status: {}", e);
                }
                Ok(Requeue::Never)
            }
            FailureDecision::Retry(interval) => {
                // Rewriting an Error condition would restart its clock
                if old_status.last_update.condition != Some(ConditionType::Error) {
                    if let Err(e) = self.write_status(instance, &new_status, old_status).await {
                        warn!("Failed to update CR status: {}", e);
                    }
                }
                info!("Retry interval: {:?}", interval);
                Ok(Requeue::After(interval))
            }
        }
    }

    async fn handle_success(
        &self,
        instance: &mut K,
        controller_ha: bool,
        mut new_status: DriverStatus,
        old_status: &DriverStatus,
    ) -> Result<Requeue> {
        let report = calculate_state(&self.client, instance, controller_ha).await;
        let running = report.running;
        let calc_error = apply_report(&mut new_status, report);
        new_status.state = settled_state(running, calc_error.is_some());
        let message = calc_error.map(|e| e.to_string()).unwrap_or_default();
        let now = Utc::now();
        new_status.last_update = set_last_status_update(
            &old_status.last_update,
            ConditionType::from_state(new_status.state),
            &message,
            now,
        );
        let (requeue, interval) =
            success_requeue(old_status.state, &old_status.last_update, new_status.state, now);
        if let Err(e) = self.write_status(instance, &new_status, old_status).await {
            error!("failed to update the status: {}", e);
            return Ok(Requeue::After(interval));
        }
        debug!("State check finished: {} -> {}", old_status.state, new_status.state);
        Ok(requeue)
    }

    async fn handle_validation_error(
        &self,
        instance: &mut K,
        controller_ha: bool,
        validation_error: Error,
    ) -> Result<Requeue> {
        error!("Validation error: {}", validation_error);
        let old_status = instance.driver_status().cloned().unwrap_or_default();
        let mut new_status = old_status.clone();
        let report = calculate_state(&self.client, instance, controller_ha).await;
        apply_report(&mut new_status, report);
        new_status.last_update = set_last_status_update(
            &old_status.last_update,
            Some(ConditionType::InvalidConfig),
            &validation_error.to_string(),
            Utc::now(),
        );
        new_status.state = DriverState::InvalidConfig;
        if let Err(e) = self.write_status(instance, &new_status, &old_status).await {
            warn!("Failed to update CR status: {}", e);
        }
        Ok(Requeue::Never)
    }

    /// Persist `new` when it differs from `old`
    async fn write_status(
        &self,
        instance: &mut K,
        new: &DriverStatus,
        old: &DriverStatus,
    ) -> Result<()> {
        if new == old {
            debug!("No change to status. No updates will be applied to CR status");
            return Ok(());
        }
        info!(
            state = %new.state,
            driver_hash = new.driver_hash,
            "Updating CR status: {}",
            new.last_update.error_message
        );
        instance.set_driver_status(new.clone());
        *instance = self.client.update_status(instance).await.map_err(|e| {
            error!("Failed to update CR status: {}", e);
            e
        })?;
        #[cfg(feature = "metrics")]
        metrics::set_resource_state(
            &K::kind(&()),
            &instance.namespace().unwrap_or_default(),
            &instance.name_any(),
            new.state,
        );
        Ok(())
    }

    /// Release the instance once its dummy ClusterRole is gone
    async fn finalize(&self, mut instance: K) -> Result<Requeue> {
        let namespace = instance.namespace().unwrap_or_default();
        let dummy = dummy_cluster_role_name(&instance.name_any(), &namespace);
        match self.client.get::<ClusterRole>(None, &dummy).await? {
            Some(_) => {
                self.client.delete::<ClusterRole>(None, &dummy).await?;
                info!("Deleted the dummy ClusterRole {}", dummy);
            }
            None => {
                let invalid = instance
                    .driver_status()
                    .map(|s| s.state == DriverState::InvalidConfig)
                    .unwrap_or(false);
                match self.resolve_config(&instance) {
                    Ok(config) if !invalid => {
                        // Re-sync so every cluster-scoped object points at a fresh dummy role
                        {
                            let ctx =
                                DriverContext::new(&instance, &config, self.settings.is_openshift);
                            sync_driver(&self.client, &ctx, self.settings.pod_refresh_delay)
                                .await
                                .map_err(|e| {
                                    error!("Failed to sync driver: {}", e);
                                    e
                                })?;
                        }
                        self.client.delete::<ClusterRole>(None, &dummy).await?;
                        info!("Deleted the dummy ClusterRole {}", dummy);
                    }
                    _ => warn!(
                        "Objects with invalid OwnerReference may be left behind in the cluster. Delete them manually"
                    ),
                }
            }
        }
        if remove_finalizer(&mut instance) {
            self.client.update(&instance).await?;
            info!("Successfully removed the finalizer");
        }
        Ok(Requeue::Never)
    }
}

/// Start the controller for one driver kind
pub async fn run_controller<K>(
    client: Client,
    provider: Arc<dyn DriverConfigProvider>,
    settings: OperatorConfig,
) -> Result<()>
where
    K: DriverInstance + ClusterObject,
{
    let kind = K::kind(&()).to_string();
    let instances: Api<K> = Api::all(client.clone());
    info!("Starting {} controller", kind);

    match instances.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("{} CRD is available", kind),
        Err(e) => {
            error!("{} CRD not found. Please install the CRD first: {:?}", kind, e);
            return Err(Error::ConfigError(format!("{} CRD not installed", kind)));
        }
    }

    let reconciler = Arc::new(DriverReconciler::<K, _>::new(
        KubeClusterClient::new(client.clone()),
        provider,
        settings,
    ));
    Controller::new(instances, Config::default())
        .owns::<Deployment>(Api::all(client.clone()), Config::default())
        .owns::<StatefulSet>(Api::all(client.clone()), Config::default())
        .owns::<DaemonSet>(Api::all(client.clone()), Config::default())
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, reconciler)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(obj, reconciler), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile<K>(
    obj: Arc<K>,
    reconciler: Arc<DriverReconciler<K, KubeClusterClient>>,
) -> Result<Action>
where
    K: DriverInstance + ClusterObject,
{
    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();
    let namespace = obj.namespace().unwrap_or_default();
    let result = reconciler.reconcile(&namespace, &obj.name_any()).await;
    #[cfg(feature = "metrics")]
    metrics::observe_reconcile_duration_seconds(
        K::DRIVER_TYPE.as_str(),
        started.elapsed().as_secs_f64(),
    );
    result.map(Action::from)
}

/// Error policy determines how to handle reconciliation errors
fn error_policy<K>(
    obj: Arc<K>,
    error: &Error,
    _reconciler: Arc<DriverReconciler<K, KubeClusterClient>>,
) -> Action
where
    K: DriverInstance + ClusterObject,
{
    error!("Reconciliation error for {}: {:?}", obj.name_any(), error);
    #[cfg(feature = "metrics")]
    metrics::inc_reconcile_error(K::DRIVER_TYPE.as_str(), error.kind());

    if error.is_retriable() {
        Action::requeue(DEFAULT_RETRY_INTERVAL)
    } else {
        Action::requeue(NON_RETRIABLE_REQUEUE)
    }
}
