//! PowerMax reverse proxy reconciler
//!
//! Same lifecycle as the driver engine, without finalizers, forced updates
//! or spec initialization. A proxy is one Deployment fronted by a Service
//! and configured through a ConfigMap rendered from the spec.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, PodSpec,
    PodTemplateSpec, Secret, SecretVolumeSource, Service, ServiceAccount, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use reqwest::Url;
use tracing::{debug, error, info, instrument, warn};

use super::client::{ClusterStateClient, KubeClusterClient};
#[cfg(feature = "metrics")]
use super::metrics;
use super::resources::{owner_reference, DEFAULT_PULL_POLICY};
use super::state::{
    decide_path, failure_decision, set_last_status_update, settled_state, spec_hash,
    success_requeue, FailureDecision, Path, Requeue, DEFAULT_RETRY_INTERVAL,
};
use super::status::calculate_proxy_state;
use super::sync::{create_or_update, ensure_service_account};
use crate::crd::{
    CSIPowerMaxRevProxy, CSIPowerMaxRevProxyStatus, ConditionType, DriverState,
    ManagementServerConfig, RevProxyConfig,
};
use crate::error::{Error, Result};

pub const REVERSE_PROXY_NAME: &str = "powermax-reverseproxy";
pub const CONFIG_MAP_NAME: &str = "powermax-reverseproxy-config";
pub const DEFAULT_MODE: &str = "Linked";
pub const STAND_ALONE_MODE: &str = "StandAlone";
pub const DEFAULT_PORT: i32 = 2222;
pub const CONFIG_FILE_NAME: &str = "config.yaml";

const CONTAINER_NAME: &str = "csireverseproxy";
const CONFIG_MAP_VOLUME: &str = "configmap-volume";
const CONFIG_MAP_MOUNT_PATH: &str = "/etc/config/configmap";
const TLS_SECRET_VOLUME: &str = "tls-secret";
const TLS_SECRET_MOUNT_PATH: &str = "/app/tls";
const CERT_VOLUME: &str = "cert-dir";
const CERT_MOUNT_PATH: &str = "/app/certs";

#[cfg(feature = "metrics")]
const CONTROLLER_NAME: &str = "csipowermaxrevproxy";

fn proxy_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("name".to_string(), REVERSE_PROXY_NAME.to_string())])
}

fn proxy_meta(proxy: &CSIPowerMaxRevProxy, name: &str, labels: bool) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: proxy.namespace(),
        labels: labels.then(proxy_labels),
        owner_references: Some(vec![owner_reference(proxy)]),
        ..Default::default()
    }
}

fn proxy_port(config: &RevProxyConfig) -> i32 {
    if config.port == 0 {
        DEFAULT_PORT
    } else {
        config.port
    }
}

// ============================================================================
// Validation
// ============================================================================

async fn check_secret_exists<C: ClusterStateClient>(
    client: &C,
    namespace: &str,
    name: &str,
) -> Result<()> {
    match client.get::<Secret>(Some(namespace), name).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(Error::ValidationError(format!(
            "failed to find secret: [{}]",
            name
        ))),
        Err(e) => {
            warn!(
                "Failed to query for secret {}. Warning - the proxy pod may not start: {}",
                name, e
            );
            Ok(())
        }
    }
}

fn parse_url(url: &str, context: &str) -> Result<()> {
    Url::parse(url)
        .map(|_| ())
        .map_err(|e| Error::ValidationError(format!("{}. Error: {}", context, e)))
}

async fn check_endpoint_cert<C: ClusterStateClient>(
    client: &C,
    namespace: &str,
    server: &ManagementServerConfig,
    missing_message: &str,
) -> Result<()> {
    if server.skip_certificate_validation {
        return Ok(());
    }
    if server.cert_secret.is_empty() {
        return Err(Error::ValidationError(missing_message.to_string()));
    }
    check_secret_exists(client, namespace, &server.cert_secret).await
}

async fn validate_linked<C: ClusterStateClient>(
    client: &C,
    namespace: &str,
    config: &RevProxyConfig,
) -> Result<()> {
    let link = config
        .link_config
        .as_ref()
        .ok_or_else(|| Error::ValidationError("link config can't be nil".to_string()))?;

    parse_url(&link.primary.url, "linkConfig primary URL is not of the proper format")?;
    check_endpoint_cert(
        client,
        namespace,
        &link.primary,
        "link config Primary: SkipCertificateValidation is set to false and cert secret has not been specified",
    )
    .await?;

    if !link.backup.url.is_empty() {
        parse_url(&link.backup.url, "linkConfig backup URL is not of the proper format")?;
        check_endpoint_cert(
            client,
            namespace,
            &link.backup,
            "link config Backup: SkipCertificateValidation is set to false and cert secret has not been specified",
        )
        .await?;
    }
    Ok(())
}

async fn validate_stand_alone<C: ClusterStateClient>(
    client: &C,
    namespace: &str,
    config: &RevProxyConfig,
) -> Result<()> {
    let stand_alone = config
        .stand_alone_config
        .as_ref()
        .ok_or_else(|| Error::ValidationError("stand-alone config can't be nil".to_string()))?;
    if stand_alone.management_servers.is_empty() {
        return Err(Error::ValidationError(
            "no management server(s) specified".to_string(),
        ));
    }
    if stand_alone.storage_arrays.is_empty() {
        return Err(Error::ValidationError(
            "no storage array config(s) specified".to_string(),
        ));
    }

    for server in &stand_alone.management_servers {
        parse_url(
            &server.url,
            "one of the management server's URL is not in proper format",
        )?;
        check_endpoint_cert(
            client,
            namespace,
            server,
            "one of the management server's SkipCertificateValidation is set to false and cert secret has not been specified",
        )
        .await?;
        if !server.array_credential_secret.is_empty() {
            check_secret_exists(client, namespace, &server.array_credential_secret).await?;
        }
    }

    for array in &stand_alone.storage_arrays {
        if array.storage_array_id.is_empty() {
            return Err(Error::ValidationError(
                "array-id empty for one of the array configs".to_string(),
            ));
        }
        if array.primary_url.is_empty() {
            return Err(Error::ValidationError(
                "invalid primary URL for one of the array configs".to_string(),
            ));
        }
        parse_url(
            &array.primary_url,
            "invalid primary URL for one of the array configs",
        )?;
        if !array.backup_url.is_empty() {
            parse_url(
                &array.backup_url,
                "invalid backup URL for one of the array configs",
            )?;
        }
        if array.proxy_credential_secrets.is_empty() {
            return Err(Error::ValidationError(
                "no proxy credential(s) speficied for authentication".to_string(),
            ));
        }
        for secret in &array.proxy_credential_secrets {
            check_secret_exists(client, namespace, secret).await?;
        }
    }
    Ok(())
}

/// Validate a proxy spec against the secrets present in its namespace
pub async fn validate_proxy_spec<C: ClusterStateClient>(
    client: &C,
    proxy: &CSIPowerMaxRevProxy,
) -> Result<()> {
    let namespace = proxy.namespace().unwrap_or_default();
    check_secret_exists(client, &namespace, &proxy.spec.tls_secret).await?;
    let config = &proxy.spec.rev_proxy;
    match config.mode.as_str() {
        "" | DEFAULT_MODE => validate_linked(client, &namespace, config).await,
        STAND_ALONE_MODE => validate_stand_alone(client, &namespace, config).await,
        _ => Err(Error::ValidationError("unknown mode specified".to_string())),
    }
}

// ============================================================================
// Builders
// ============================================================================

/// ConfigMap carrying the proxy config, with mode and port defaulted
pub fn build_proxy_config_map(proxy: &CSIPowerMaxRevProxy) -> Result<ConfigMap> {
    let mut config = proxy.spec.rev_proxy.clone();
    if config.mode.is_empty() {
        config.mode = DEFAULT_MODE.to_string();
    }
    config.port = proxy_port(&config);
    let rendered = serde_yaml::to_string(&config)?;
    Ok(ConfigMap {
        metadata: proxy_meta(proxy, CONFIG_MAP_NAME, true),
        data: Some(BTreeMap::from([(CONFIG_FILE_NAME.to_string(), rendered)])),
        ..Default::default()
    })
}

pub fn build_proxy_service(proxy: &CSIPowerMaxRevProxy) -> Service {
    Service {
        metadata: proxy_meta(proxy, REVERSE_PROXY_NAME, true),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(proxy_labels()),
            ports: Some(vec![ServicePort {
                port: proxy_port(&proxy.spec.rev_proxy),
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(DEFAULT_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn build_proxy_service_account(proxy: &CSIPowerMaxRevProxy) -> ServiceAccount {
    ServiceAccount {
        metadata: proxy_meta(proxy, REVERSE_PROXY_NAME, false),
        ..Default::default()
    }
}

/// Role letting the proxy read secrets in its namespace
pub fn build_proxy_role(proxy: &CSIPowerMaxRevProxy) -> Role {
    Role {
        metadata: proxy_meta(proxy, REVERSE_PROXY_NAME, false),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["secrets".to_string()]),
            verbs: vec!["list".to_string(), "watch".to_string(), "get".to_string()],
            ..Default::default()
        }]),
    }
}

pub fn build_proxy_role_binding(proxy: &CSIPowerMaxRevProxy) -> RoleBinding {
    RoleBinding {
        metadata: proxy_meta(proxy, REVERSE_PROXY_NAME, false),
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: REVERSE_PROXY_NAME.to_string(),
            namespace: proxy.namespace(),
            ..Default::default()
        }]),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: REVERSE_PROXY_NAME.to_string(),
        },
    }
}

fn proxy_envs(namespace: &str) -> Vec<EnvVar> {
    [
        ("X_CSI_REVPROXY_CONFIG_DIR", CONFIG_MAP_MOUNT_PATH),
        ("X_CSI_REVPROXY_CONFIG_FILE_NAME", CONFIG_FILE_NAME),
        ("X_CSI_REVRPOXY_IN_CLUSTER", "true"),
        ("X_CSI_REVPROXY_TLS_CERT_DIR", TLS_SECRET_MOUNT_PATH),
        ("X_CSI_REVPROXY_WATCH_NAMESPACE", namespace),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    })
    .collect()
}

fn proxy_volumes(proxy: &CSIPowerMaxRevProxy) -> Vec<Volume> {
    vec![
        Volume {
            name: CONFIG_MAP_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(CONFIG_MAP_NAME.to_string()),
                optional: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: TLS_SECRET_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(proxy.spec.tls_secret.clone()),
                optional: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: CERT_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    ]
}

fn proxy_volume_mounts() -> Vec<VolumeMount> {
    [
        (CONFIG_MAP_VOLUME, CONFIG_MAP_MOUNT_PATH),
        (TLS_SECRET_VOLUME, TLS_SECRET_MOUNT_PATH),
        (CERT_VOLUME, CERT_MOUNT_PATH),
    ]
    .into_iter()
    .map(|(name, path)| VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    })
    .collect()
}

pub fn build_proxy_deployment(proxy: &CSIPowerMaxRevProxy) -> Deployment {
    let namespace = proxy.namespace().unwrap_or_default();
    let pull_policy = if proxy.spec.image_pull_policy.is_empty() {
        DEFAULT_PULL_POLICY.to_string()
    } else {
        proxy.spec.image_pull_policy.clone()
    };
    Deployment {
        metadata: proxy_meta(proxy, REVERSE_PROXY_NAME, false),
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(proxy_labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(proxy_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(REVERSE_PROXY_NAME.to_string()),
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(proxy.spec.image.clone()),
                        image_pull_policy: Some(pull_policy),
                        env: Some(proxy_envs(&namespace)),
                        volume_mounts: Some(proxy_volume_mounts()),
                        ..Default::default()
                    }],
                    volumes: Some(proxy_volumes(proxy)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Converge every object of a proxy installation, stopping at the first failure
#[instrument(skip(client, proxy), fields(name = %proxy.name_any(), namespace = proxy.namespace()))]
pub async fn sync_proxy<C: ClusterStateClient>(client: &C, proxy: &CSIPowerMaxRevProxy) -> Result<()> {
    create_or_update(client, &build_proxy_config_map(proxy)?).await?;
    create_or_update(client, &build_proxy_service(proxy)).await?;
    ensure_service_account(client, &build_proxy_service_account(proxy)).await?;
    create_or_update(client, &build_proxy_role(proxy)).await?;
    create_or_update(client, &build_proxy_role_binding(proxy)).await?;
    create_or_update(client, &build_proxy_deployment(proxy)).await?;
    info!("Synced reverse proxy objects");
    Ok(())
}

// ============================================================================
// Engine
// ============================================================================

/// Reconciler for `CSIPowerMaxRevProxy`
pub struct ProxyReconciler<C> {
    client: C,
    attempts: AtomicU32,
}

impl<C: ClusterStateClient> ProxyReconciler<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    #[instrument(skip(self))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Requeue> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        info!(attempt, "Reconciling CSIPowerMaxRevProxy {}/{}", namespace, name);

        let Some(mut proxy) = self
            .client
            .get::<CSIPowerMaxRevProxy>(Some(namespace), name)
            .await?
        else {
            return Ok(Requeue::Never);
        };
        let old_status = proxy.status.clone().unwrap_or_default();
        let mut new_status = old_status.clone();
        info!("Proxy was previously in ({}) state", old_status.state);

        let expected_hash = spec_hash(&serde_json::to_vec(&proxy.spec)?);
        let changed = expected_hash != old_status.proxy_hash;
        if changed {
            info!(
                "Proxy spec has changed ({} vs {})",
                old_status.proxy_hash, expected_hash
            );
            new_status.proxy_hash = expected_hash;
        }

        match decide_path(old_status.state, changed, false) {
            Path::Stop => {
                info!(
                    "CR is in ({}) state. Reconcile request won't be requeued",
                    old_status.state
                );
                return Ok(Requeue::Never);
            }
            Path::CheckStateOnly => {
                return self
                    .handle_success(&mut proxy, new_status, &old_status)
                    .await
            }
            Path::Resync => new_status.state = DriverState::Updating,
        }

        if changed {
            new_status.last_update = set_last_status_update(
                &old_status.last_update,
                Some(ConditionType::Updating),
                "",
                Utc::now(),
            );
            self.write_status(&mut proxy, &new_status, &old_status)
                .await?;
        }

        if let Err(e) = validate_proxy_spec(&self.client, &proxy).await {
            return self.handle_validation_error(&mut proxy, e).await;
        }

        match sync_proxy(&self.client, &proxy).await {
            Ok(()) => {
                let (running, pods, calc_error) =
                    calculate_proxy_state(&self.client, namespace, REVERSE_PROXY_NAME).await;
                new_status.proxy_status = pods;
                new_status.state = if running {
                    DriverState::Running
                } else {
                    DriverState::Succeeded
                };
                new_status.last_update = set_last_status_update(
                    &old_status.last_update,
                    ConditionType::from_state(new_status.state),
                    &calc_error.map(|e| e.to_string()).unwrap_or_default(),
                    Utc::now(),
                );
                self.write_status(&mut proxy, &new_status, &old_status)
                    .await?;
                if running {
                    Ok(Requeue::Never)
                } else {
                    Ok(Requeue::After(DEFAULT_RETRY_INTERVAL))
                }
            }
            Err(sync_error) => {
                error!("Failed to sync proxy: {}", sync_error);
                let (_, pods, _) =
                    calculate_proxy_state(&self.client, namespace, REVERSE_PROXY_NAME).await;
                new_status.proxy_status = pods;
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
                        new_status.state = DriverState::Failed;
                        new_status.last_update = set_last_status_update(
                            &old_status.last_update,
                            Some(ConditionType::Failed),
                            &message,
                            now,
                        );
                        if let Err(e) = self.write_status(&mut proxy, &new_status, &old_status).await {
                            warn!("Failed to update CR status: {}", e);
                        }
                        Ok(Requeue::Never)
                    }
                    FailureDecision::Retry(interval) => {
                        if old_status.last_update.condition != Some(ConditionType::Error) {
                            if let Err(e) =
                                self.write_status(&mut proxy, &new_status, &old_status).await
                            {
                                warn!("Failed to update CR status: {}", e);
                            }
                        }
                        info!("Retry interval: {:?}", interval);
                        Ok(Requeue::After(interval))
                    }
                }
            }
        }
    }

    async fn handle_success(
        &self,
        proxy: &mut CSIPowerMaxRevProxy,
        mut new_status: CSIPowerMaxRevProxyStatus,
        old_status: &CSIPowerMaxRevProxyStatus,
    ) -> Result<Requeue> {
        let namespace = proxy.namespace().unwrap_or_default();
        let (running, pods, calc_error) =
            calculate_proxy_state(&self.client, &namespace, REVERSE_PROXY_NAME).await;
        new_status.proxy_status = pods;
        new_status.state = settled_state(running, calc_error.is_some());
        let now = Utc::now();
        new_status.last_update = set_last_status_update(
            &old_status.last_update,
            ConditionType::from_state(new_status.state),
            &calc_error.map(|e| e.to_string()).unwrap_or_default(),
            now,
        );
        let (requeue, interval) =
            success_requeue(old_status.state, &old_status.last_update, new_status.state, now);
        if let Err(e) = self.write_status(proxy, &new_status, old_status).await {
            error!("failed to update the status: {}", e);
            return Ok(Requeue::After(interval));
        }
        Ok(requeue)
    }

    async fn handle_validation_error(
        &self,
        proxy: &mut CSIPowerMaxRevProxy,
        validation_error: Error,
    ) -> Result<Requeue> {
        error!("Validation error: {}", validation_error);
        let old_status = proxy.status.clone().unwrap_or_default();
        let mut new_status = old_status.clone();
        let namespace = proxy.namespace().unwrap_or_default();
        let (_, pods, _) = calculate_proxy_state(&self.client, &namespace, REVERSE_PROXY_NAME).await;
        new_status.proxy_status = pods;
        new_status.last_update = set_last_status_update(
            &old_status.last_update,
            Some(ConditionType::InvalidConfig),
            &validation_error.to_string(),
            Utc::now(),
        );
        new_status.state = DriverState::InvalidConfig;
        if let Err(e) = self.write_status(proxy, &new_status, &old_status).await {
            warn!("Failed to update CR status: {}", e);
        }
        Ok(Requeue::Never)
    }

    async fn write_status(
        &self,
        proxy: &mut CSIPowerMaxRevProxy,
        new: &CSIPowerMaxRevProxyStatus,
        old: &CSIPowerMaxRevProxyStatus,
    ) -> Result<()> {
        if new == old {
            debug!("No change to status. No updates will be applied to CR status");
            return Ok(());
        }
        info!(
            state = %new.state,
            proxy_hash = new.proxy_hash,
            "Updating CR status: {}",
            new.last_update.error_message
        );
        proxy.status = Some(new.clone());
        *proxy = self.client.update_status(proxy).await?;
        #[cfg(feature = "metrics")]
        metrics::set_resource_state(
            "CSIPowerMaxRevProxy",
            &proxy.namespace().unwrap_or_default(),
            &proxy.name_any(),
            new.state,
        );
        Ok(())
    }
}

/// Start the reverse proxy controller
pub async fn run_proxy_controller(client: Client) -> Result<()> {
    let proxies: Api<CSIPowerMaxRevProxy> = Api::all(client.clone());
    info!("Starting CSIPowerMaxRevProxy controller");
    if let Err(e) = proxies.list(&ListParams::default().limit(1)).await {
        error!("CSIPowerMaxRevProxy CRD not found: {:?}", e);
        return Err(Error::ConfigError(
            "CSIPowerMaxRevProxy CRD not installed".to_string(),
        ));
    }

    let reconciler = Arc::new(ProxyReconciler::new(KubeClusterClient::new(client.clone())));
    Controller::new(proxies, Config::default())
        .owns::<Deployment>(Api::all(client), Config::default())
        .shutdown_on_signal()
        .run(reconcile_proxy, proxy_error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;
    Ok(())
}

async fn reconcile_proxy(
    obj: Arc<CSIPowerMaxRevProxy>,
    reconciler: Arc<ProxyReconciler<KubeClusterClient>>,
) -> Result<Action> {
    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();
    let namespace = obj.namespace().unwrap_or_default();
    let result = reconciler.reconcile(&namespace, &obj.name_any()).await;
    #[cfg(feature = "metrics")]
    metrics::observe_reconcile_duration_seconds(CONTROLLER_NAME, started.elapsed().as_secs_f64());
    result.map(Action::from)
}

fn proxy_error_policy(
    obj: Arc<CSIPowerMaxRevProxy>,
    error: &Error,
    _reconciler: Arc<ProxyReconciler<KubeClusterClient>>,
) -> Action {
    error!("Reconciliation error for {}: {:?}", obj.name_any(), error);
    #[cfg(feature = "metrics")]
    metrics::inc_reconcile_error(CONTROLLER_NAME, error.kind());
    if error.is_retriable() {
        Action::requeue(DEFAULT_RETRY_INTERVAL)
    } else {
        Action::requeue(Duration::from_secs(60))
    }
}
