//! Kubernetes resource builders for Dell CSI drivers
//!
//! This module renders the objects a driver installation consists of
//! (RBAC, ServiceAccounts, CSIDriver, controller StatefulSet/Deployment,
//! node DaemonSet, StorageClasses and VolumeSnapshotClasses) from the
//! custom resource spec layered over the resolved driver config.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy, Deployment, DeploymentSpec,
    RollingUpdateDaemonSet, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, Container, EnvVar, KeyToPath, PodAffinityTerm, PodAntiAffinity,
    PodSpec, PodTemplateSpec, ProjectedVolumeSource, Secret, SecretProjection,
    SecretVolumeSource, SecurityContext, ServiceAccount, Toleration, Volume, VolumeMount,
    VolumeProjection,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::api::storage::v1::{
    CSIDriver, CSIDriverSpec, StorageClass as K8sStorageClass,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta, OwnerReference,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use super::merge::{
    env_value, merge_args, merge_envs, merge_tolerations, merge_volumes, patch_secret_refs,
};
use crate::config::driver_config::{InitContainerParams, SidecarParams};
use crate::config::{ContainerKind, ResolvedDriverConfig};
use crate::crd::{images, Driver, DriverInstance, DriverType, VolumeSnapshotClass};
use crate::error::{Error, Result};

pub const REVISION_HISTORY_LIMIT: i32 = 10;
pub const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 30;
pub const MAX_UNAVAILABLE: i32 = 1;
pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";
pub const DEFAULT_FS_GROUP_POLICY: &str = "ReadWriteOnceWithFSType";
pub const DEFAULT_NODE_DNS_POLICY: &str = "ClusterFirstWithHostNet";
const VALID_DNS_POLICIES: [&str; 4] = ["ClusterFirst", "ClusterFirstWithHostNet", "None", "Default"];

pub const RBAC_API_VERSION: &str = "rbac.authorization.k8s.io/v1";
const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";
const ISCSI_CHAP_ENV: &str = "X_CSI_POWERMAX_ISCSI_ENABLE_CHAP";
const ISCSI_CHAP_PASSWORD_ENV: &str = "X_CSI_POWERMAX_ISCSI_CHAP_PASSWORD";

/// Create an OwnerReference for garbage collection
pub fn owner_reference<K: Resource<DynamicType = ()>>(obj: &K) -> OwnerReference {
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: obj.name_any(),
        uid: obj.meta().uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Owner reference to the dummy ClusterRole anchoring cluster-scoped objects
pub fn dummy_owner_reference(role: &ClusterRole) -> OwnerReference {
    OwnerReference {
        api_version: RBAC_API_VERSION.to_string(),
        kind: "ClusterRole".to_string(),
        name: role.name_any(),
        uid: role.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn app_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}

/// Name of the ClusterRole that owns the cluster-scoped objects of an instance
pub fn dummy_cluster_role_name(name: &str, namespace: &str) -> String {
    format!("{}-{}-dummy", name, namespace)
}

/// Everything a builder needs to know about one driver installation
pub struct DriverContext<'a> {
    pub name: String,
    pub namespace: String,
    pub driver_type: DriverType,
    pub driver: &'a Driver,
    pub config: &'a ResolvedDriverConfig,
    pub owner: OwnerReference,
    pub is_openshift: bool,
}

impl<'a> DriverContext<'a> {
    pub fn new<K: DriverInstance>(
        instance: &'a K,
        config: &'a ResolvedDriverConfig,
        is_openshift: bool,
    ) -> Self {
        Self {
            name: instance.name_any(),
            namespace: instance.namespace().unwrap_or_else(|| "default".to_string()),
            driver_type: K::DRIVER_TYPE,
            driver: instance.driver(),
            config,
            owner: owner_reference(instance),
            is_openshift,
        }
    }

    pub fn controller_name(&self) -> String {
        self.driver_type.controller_name()
    }

    pub fn daemonset_name(&self) -> String {
        self.driver_type.daemonset_name()
    }

    pub fn dummy_cluster_role_name(&self) -> String {
        dummy_cluster_role_name(&self.name, &self.namespace)
    }

    fn supports_custom_driver_name(&self) -> bool {
        self.driver_type.driver_name_env().is_some() && self.config.config_version != "v1"
    }

    /// Driver-name env rewritten to its namespaced form
    fn custom_env_vars(&self, envs: &[EnvVar]) -> Vec<EnvVar> {
        let Some(env_name) = self.driver_type.driver_name_env() else {
            return Vec::new();
        };
        if !self.supports_custom_driver_name() {
            return Vec::new();
        }
        let Some(env) = envs.iter().find(|e| e.name == env_name) else {
            return Vec::new();
        };
        let default = self.driver_type.default_driver_name();
        let value = env.value.clone().unwrap_or_default();
        let driver_name = if value != default {
            format!("{}.{}.dellemc.com", self.namespace, value)
        } else {
            default
        };
        vec![EnvVar {
            name: env_name.to_string(),
            value: Some(driver_name),
            value_from: None,
        }]
    }

    fn container_envs(&self, kind: ContainerKind) -> Vec<EnvVar> {
        let overrides = match kind {
            ContainerKind::Controller => &self.driver.controller.envs,
            ContainerKind::Node => &self.driver.node.envs,
        };
        let mut envs = merge_envs(&self.config.driver.envs(kind), &self.driver.common.envs);
        envs = merge_envs(&envs, overrides);
        if !self.driver.auth_secret.is_empty() {
            patch_secret_refs(
                &mut envs,
                &[
                    self.driver_type.user_env_name(),
                    self.driver_type.password_env_name(),
                ],
                &self.driver.auth_secret,
            );
        }
        let custom = self.custom_env_vars(&envs);
        merge_envs(&envs, &custom)
    }

    /// Config envs, then common, then controller overrides
    pub fn controller_envs(&self) -> Vec<EnvVar> {
        self.container_envs(ContainerKind::Controller)
    }

    /// Config envs, then common, then node overrides
    ///
    /// PowerMax drops the CHAP password unless CHAP is enabled.
    pub fn node_envs(&self) -> Vec<EnvVar> {
        let mut envs = self.container_envs(ContainerKind::Node);
        if self.driver_type == DriverType::PowerMax && self.config.config_version != "v1" {
            if let Some(chap) = envs.iter().find(|e| e.name == ISCSI_CHAP_ENV) {
                let value = chap.value.clone().unwrap_or_default();
                if value.is_empty() || value.eq_ignore_ascii_case("false") {
                    envs.retain(|e| e.name != ISCSI_CHAP_PASSWORD_ENV);
                }
            }
        }
        envs
    }

    /// Custom driver name, when one is requested
    pub fn custom_driver_name(&self) -> Option<String> {
        let env_name = self.driver_type.driver_name_env()?;
        if !self.supports_custom_driver_name() {
            return None;
        }
        let envs = self.controller_envs();
        let value = env_value(&envs, env_name)?;
        (value != self.driver_type.default_driver_name()).then(|| value.to_string())
    }

    /// Name the driver registers as: custom or default
    pub fn driver_name(&self) -> String {
        self.custom_driver_name()
            .unwrap_or_else(|| self.driver_type.default_driver_name())
    }

    fn rbac_name(&self, component: &str) -> String {
        if self.custom_driver_name().is_some() {
            format!("{}-{}-{}", self.namespace, self.name, component)
        } else {
            format!("{}-{}", self.name, component)
        }
    }

    pub fn is_limited_node_rbac(&self) -> bool {
        self.driver_type
            .is_limited_node_rbac(&self.driver.config_version)
    }

    /// The node ServiceAccount exists unless node RBAC is limited off OpenShift
    pub fn create_node_service_account(&self) -> bool {
        !self.is_limited_node_rbac() || self.is_openshift
    }

    fn args(&self, kind: ContainerKind) -> Vec<String> {
        let overrides = match kind {
            ContainerKind::Controller => &self.driver.controller.args,
            ContainerKind::Node => &self.driver.node.args,
        };
        let args = merge_args(&self.config.driver.driver_args, &self.driver.common.args);
        merge_args(&args, overrides)
    }

    pub fn controller_args(&self) -> Vec<String> {
        self.args(ContainerKind::Controller)
    }

    pub fn node_args(&self) -> Vec<String> {
        self.args(ContainerKind::Node)
    }

    pub fn tolerations(&self, kind: ContainerKind) -> Vec<Toleration> {
        let overrides = match kind {
            ContainerKind::Controller => &self.driver.controller.tolerations,
            ContainerKind::Node => &self.driver.node.tolerations,
        };
        let tolerations =
            merge_tolerations(self.config.driver.tolerations(kind), &self.driver.common.tolerations);
        merge_tolerations(&tolerations, overrides)
    }

    pub fn node_selector(&self, kind: ContainerKind) -> Option<BTreeMap<String, String>> {
        let own = match kind {
            ContainerKind::Controller => &self.driver.controller.node_selector,
            ContainerKind::Node => &self.driver.node.node_selector,
        };
        own.clone().or_else(|| self.driver.common.node_selector.clone())
    }

    /// Args/envs/mounts of every sidecar in the spec, config values first
    pub fn sidecar_params(&self) -> BTreeMap<String, SidecarParams> {
        self.driver
            .side_cars
            .iter()
            .map(|sidecar| {
                let defaults = self.config.driver.sidecar(&sidecar.name);
                let params = SidecarParams {
                    name: sidecar.name.clone(),
                    optional: defaults.map(|d| d.optional).unwrap_or_default(),
                    args: merge_args(
                        defaults.map(|d| d.args.as_slice()).unwrap_or_default(),
                        &sidecar.args,
                    ),
                    envs: merge_envs(
                        defaults.map(|d| d.envs.as_slice()).unwrap_or_default(),
                        &sidecar.envs,
                    ),
                    volume_mounts: defaults.map(|d| d.volume_mounts.clone()).unwrap_or_default(),
                };
                (sidecar.name.clone(), params)
            })
            .collect()
    }

    /// Parameters of the spec's init containers that run on `kind`
    pub fn init_container_params(&self, kind: ContainerKind) -> BTreeMap<String, InitContainerParams> {
        let allowed = self.config.driver.init_containers_for(kind);
        self.driver
            .init_containers
            .iter()
            .filter_map(|init| {
                let defaults = allowed.iter().find(|p| p.name == init.name)?;
                Some((
                    init.name.clone(),
                    InitContainerParams {
                        name: init.name.clone(),
                        optional: defaults.optional,
                        set_for_controller: defaults.set_for_controller,
                        set_for_node: defaults.set_for_node,
                        args: merge_args(&defaults.args, &init.args),
                        envs: merge_envs(&defaults.envs, &init.envs),
                        volume_mounts: defaults.volume_mounts.clone(),
                    },
                ))
            })
            .collect()
    }

    /// Args of the `common` pseudo sidecar, shared by every controller container
    pub fn common_sidecar_args(&self) -> Vec<String> {
        self.driver
            .side_cars
            .iter()
            .find(|s| s.name == images::COMMON)
            .map(|s| s.args.clone())
            .unwrap_or_default()
    }
}

// ============================================================================
// RBAC
// ============================================================================

pub fn build_dummy_cluster_role(ctx: &DriverContext<'_>) -> ClusterRole {
    let name = ctx.dummy_cluster_role_name();
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: Some(BTreeMap::from([("name".to_string(), name)])),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(groups.iter().map(|s| s.to_string()).collect()),
        resources: Some(resources.iter().map(|s| s.to_string()).collect()),
        verbs: verbs.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn privileged_scc_rule() -> PolicyRule {
    PolicyRule {
        resource_names: Some(vec!["privileged".to_string()]),
        ..rule(&["security.openshift.io"], &["securitycontextconstraints"], &["use"])
    }
}

pub fn build_controller_cluster_role(ctx: &DriverContext<'_>, dummy: &OwnerReference) -> ClusterRole {
    let mut rules = vec![
        rule(&[""], &["events"], &["list", "watch", "create", "update", "patch"]),
        rule(&[""], &["nodes"], &["get", "list", "watch"]),
        rule(
            &[""],
            &["persistentvolumes"],
            &["get", "list", "watch", "create", "delete", "update", "patch"],
        ),
        rule(
            &[""],
            &["persistentvolumeclaims"],
            &["get", "list", "create", "watch", "update"],
        ),
        rule(&[""], &["pods"], &["get", "list", "watch"]),
        rule(&["storage.k8s.io"], &["storageclasses"], &["get", "list", "watch"]),
        rule(
            &["storage.k8s.io"],
            &["volumeattachments"],
            &["get", "list", "watch", "update", "patch"],
        ),
        rule(&["storage.k8s.io"], &["volumeattachments/status"], &["patch"]),
        rule(&["storage.k8s.io"], &["csinodes"], &["get", "list", "watch", "update"]),
        rule(&[""], &["secrets"], &["get", "list"]),
        rule(
            &["snapshot.storage.k8s.io"],
            &["volumesnapshotclasses"],
            &["get", "list", "watch"],
        ),
        rule(
            &["snapshot.storage.k8s.io"],
            &["volumesnapshotcontents"],
            &["create", "get", "list", "watch", "update", "delete", "patch"],
        ),
        rule(
            &["snapshot.storage.k8s.io"],
            &["volumesnapshots/status"],
            &["watch", "update", "get", "list"],
        ),
        rule(
            &["snapshot.storage.k8s.io"],
            &["volumesnapshotcontents/status"],
            &["update", "patch"],
        ),
        rule(
            &["snapshot.storage.k8s.io"],
            &["volumesnapshots"],
            &["get", "list", "watch", "update"],
        ),
        rule(
            &["apiextensions.k8s.io"],
            &["customresourcedefinitions"],
            &["create", "list", "watch", "delete"],
        ),
        rule(&[""], &["persistentvolumeclaims/status"], &["update", "patch"]),
    ];
    if ctx.config.is_controller_ha() {
        rules.push(rule(
            &["coordination.k8s.io"],
            &["leases"],
            &["create", "get", "list", "watch", "delete", "update"],
        ));
    }
    if ctx.driver_type == DriverType::PowerStore {
        rules.push(rule(
            &["storage.k8s.io"],
            &["csistoragecapacities"],
            &["get", "list", "watch", "create", "update", "patch", "delete"],
        ));
        rules.push(rule(&["apps"], &["replicasets"], &["get"]));
    }
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(ctx.rbac_name("controller")),
            owner_references: Some(vec![dummy.clone()]),
            ..Default::default()
        },
        rules: Some(rules),
        ..Default::default()
    }
}

/// Node ClusterRole; limited node RBAC only grants the privileged SCC
pub fn build_node_cluster_role(ctx: &DriverContext<'_>, dummy: &OwnerReference) -> ClusterRole {
    let rules = if ctx.is_limited_node_rbac() {
        vec![privileged_scc_rule()]
    } else {
        vec![
            rule(&[""], &["events"], &["list", "watch", "create", "update", "patch"]),
            rule(
                &[""],
                &["nodes"],
                &["get", "list", "watch", "create", "update", "patch"],
            ),
            rule(
                &[""],
                &["persistentvolumes"],
                &["get", "list", "watch", "create", "delete", "update"],
            ),
            rule(&[""], &["persistentvolumeclaims"], &["get", "list", "watch", "update"]),
            rule(&["storage.k8s.io"], &["storageclasses"], &["get", "list", "watch"]),
            rule(
                &["storage.k8s.io"],
                &["volumeattachments"],
                &["get", "list", "watch", "update"],
            ),
            privileged_scc_rule(),
        ]
    };
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(ctx.rbac_name("node")),
            owner_references: Some(vec![dummy.clone()]),
            ..Default::default()
        },
        rules: Some(rules),
        ..Default::default()
    }
}

/// Binding of `{type}-{component}` to the `{component}` ClusterRole
pub fn build_cluster_role_binding(
    ctx: &DriverContext<'_>,
    component: &str,
    dummy: &OwnerReference,
) -> ClusterRoleBinding {
    let name = ctx.rbac_name(component);
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            owner_references: Some(vec![dummy.clone()]),
            ..Default::default()
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: format!("{}-{}", ctx.driver_type, component),
            namespace: Some(ctx.namespace.clone()),
            ..Default::default()
        }]),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name,
        },
    }
}

// ============================================================================
// ServiceAccount
// ============================================================================

pub fn build_service_account(ctx: &DriverContext<'_>, name: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ctx.namespace.clone()),
            owner_references: Some(vec![ctx.owner.clone()]),
            ..Default::default()
        },
        ..Default::default()
    }
}

// ============================================================================
// CSIDriver
// ============================================================================

pub fn build_csi_driver(ctx: &DriverContext<'_>, dummy: &OwnerReference) -> CSIDriver {
    let mut modes = vec!["Persistent".to_string()];
    if ctx.config.driver.enable_ephemeral_volumes {
        modes.push("Ephemeral".to_string());
    }
    let fs_group_policy = ctx.driver_type.supports_fs_group_policy().then(|| {
        if ctx.driver.fs_group_policy.is_empty() {
            DEFAULT_FS_GROUP_POLICY.to_string()
        } else {
            ctx.driver.fs_group_policy.clone()
        }
    });
    CSIDriver {
        metadata: ObjectMeta {
            name: Some(ctx.driver_type.default_driver_name()),
            owner_references: Some(vec![dummy.clone()]),
            ..Default::default()
        },
        spec: CSIDriverSpec {
            attach_required: Some(true),
            pod_info_on_mount: Some(true),
            volume_lifecycle_modes: Some(modes),
            fs_group_policy,
            ..Default::default()
        },
    }
}

// ============================================================================
// Volumes
// ============================================================================

/// Secret volume carrying a user supplied TLS certificate
pub fn build_tls_cert_volume(ctx: &DriverContext<'_>, secret_name: &str) -> Volume {
    Volume {
        name: ctx.driver_type.cert_volume_name().to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            optional: Some(true),
            default_mode: Some(420),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Projected volume of the `{type}-certs-N` secrets, N = 0, 1, ... until one is missing
pub fn build_projected_cert_volume(driver_type: DriverType, secrets: &[Secret]) -> Volume {
    let mut sources = Vec::new();
    for i in 0.. {
        let secret_name = format!("{}-certs-{}", driver_type, i);
        let Some(secret) = secrets.iter().find(|s| s.name_any() == secret_name) else {
            break;
        };
        let cert_key = format!("cert-{}", i);
        let has_key = secret
            .data
            .as_ref()
            .map(|d| d.contains_key(&cert_key))
            .unwrap_or(false);
        if has_key {
            sources.push(VolumeProjection {
                secret: Some(SecretProjection {
                    name: Some(secret_name),
                    items: Some(vec![KeyToPath {
                        key: cert_key.clone(),
                        path: cert_key,
                        mode: None,
                    }]),
                    optional: None,
                }),
                ..Default::default()
            });
        } else {
            tracing::error!(
                "cert Secret [{}] doesn't have key [{}] in the data field",
                secret_name,
                cert_key
            );
        }
    }
    Volume {
        name: driver_type.cert_volume_name().to_string(),
        projected: Some(ProjectedVolumeSource {
            sources: Some(sources),
            default_mode: None,
        }),
        ..Default::default()
    }
}

/// Controller pod volumes: config volumes, projected certs, then the TLS secret
pub fn controller_volumes(ctx: &DriverContext<'_>, projected: Option<&Volume>) -> Vec<Volume> {
    let mut volumes = ctx.config.driver.volumes(ContainerKind::Controller).to_vec();
    if let Some(certs) = projected {
        volumes = merge_volumes(&volumes, std::slice::from_ref(certs));
    }
    if !ctx.driver.tls_cert_secret.is_empty() {
        let tls = build_tls_cert_volume(ctx, &ctx.driver.tls_cert_secret);
        volumes = merge_volumes(&volumes, &[tls]);
    }
    volumes
}

pub fn node_volumes(ctx: &DriverContext<'_>, projected: Option<&Volume>) -> Vec<Volume> {
    let volumes = ctx.config.driver.volumes(ContainerKind::Node);
    match projected {
        Some(certs) => merge_volumes(volumes, std::slice::from_ref(certs)),
        None => volumes.to_vec(),
    }
}

// ============================================================================
// Containers
// ============================================================================

/// One container of a driver pod
pub fn build_container(
    name: &str,
    image: &str,
    pull_policy: &str,
    args: Vec<String>,
    envs: Vec<EnvVar>,
    volume_mounts: Vec<VolumeMount>,
    security_context: Option<SecurityContext>,
) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some(pull_policy.to_string()),
        args: Some(args),
        env: Some(envs),
        volume_mounts: Some(volume_mounts),
        termination_message_path: Some("/dev/termination-log".to_string()),
        termination_message_policy: Some("File".to_string()),
        security_context: Some(security_context.unwrap_or_default()),
        ..Default::default()
    }
}

fn privileged_security_context() -> SecurityContext {
    SecurityContext {
        capabilities: Some(Capabilities {
            add: Some(vec!["SYS_ADMIN".to_string()]),
            drop: None,
        }),
        privileged: Some(true),
        ..Default::default()
    }
}

fn driver_container(
    ctx: &DriverContext<'_>,
    args: Vec<String>,
    envs: Vec<EnvVar>,
    kind: ContainerKind,
    security_context: Option<SecurityContext>,
) -> Container {
    build_container(
        images::DRIVER,
        &ctx.driver.common.image,
        &ctx.driver.common.image_pull_policy,
        args,
        envs,
        ctx.config.driver.volume_mounts(kind).to_vec(),
        security_context,
    )
}

fn sidecar_container(
    name: &str,
    image: &str,
    pull_policy: &str,
    params: Option<&SidecarParams>,
    extra_args: &[String],
) -> Container {
    let mut args = params.map(|p| p.args.clone()).unwrap_or_default();
    args.extend(extra_args.iter().cloned());
    build_container(
        name,
        image,
        pull_policy,
        args,
        params.map(|p| p.envs.clone()).unwrap_or_default(),
        params.map(|p| p.volume_mounts.clone()).unwrap_or_default(),
        None,
    )
}

fn controller_pod_spec(
    ctx: &DriverContext<'_>,
    containers: Vec<Container>,
    volumes: Vec<Volume>,
) -> PodSpec {
    let tolerations = ctx.tolerations(ContainerKind::Controller);
    PodSpec {
        containers,
        dns_policy: Some("ClusterFirst".to_string()),
        service_account_name: Some(ctx.controller_name()),
        restart_policy: Some("Always".to_string()),
        scheduler_name: Some("default-scheduler".to_string()),
        termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
        volumes: Some(volumes),
        tolerations: (!tolerations.is_empty()).then_some(tolerations),
        node_selector: ctx.node_selector(ContainerKind::Controller),
        ..Default::default()
    }
}

// ============================================================================
// Controller StatefulSet
// ============================================================================

/// Controller StatefulSet: every sidecar except the registrar
pub fn build_statefulset(ctx: &DriverContext<'_>, volumes: Vec<Volume>) -> StatefulSet {
    let name = ctx.controller_name();
    let labels = app_labels(&name);
    let sidecars = ctx.sidecar_params();

    let mut containers = vec![driver_container(
        ctx,
        ctx.controller_args(),
        ctx.controller_envs(),
        ContainerKind::Controller,
        None,
    )];
    for sidecar in ctx
        .driver
        .side_cars
        .iter()
        .filter(|s| s.name != images::REGISTRAR)
    {
        containers.push(sidecar_container(
            &sidecar.name,
            &sidecar.image,
            &sidecar.image_pull_policy,
            sidecars.get(&sidecar.name),
            &[],
        ));
    }

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(ctx.namespace.clone()),
            owner_references: Some(vec![ctx.owner.clone()]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(ctx.driver.replicas),
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            pod_management_policy: Some("OrderedReady".to_string()),
            service_name: name,
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: None,
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(controller_pod_spec(ctx, containers, volumes)),
            },
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// Controller Deployment (HA)
// ============================================================================

/// HA controller Deployment with leader election and hostname anti-affinity
pub fn build_deployment(ctx: &DriverContext<'_>, volumes: Vec<Volume>) -> Deployment {
    let name = ctx.controller_name();
    let labels = app_labels(&name);
    let sidecars = ctx.sidecar_params();
    let common_args = ctx.common_sidecar_args();

    let mut args = ctx.controller_args();
    args.push("--leader-election".to_string());
    args.extend(common_args.iter().cloned());

    let mut containers = vec![driver_container(
        ctx,
        args,
        ctx.controller_envs(),
        ContainerKind::Controller,
        None,
    )];
    for sidecar in ctx.driver.side_cars.iter().filter(|s| {
        s.name != images::REGISTRAR && s.name != images::SDC_MONITOR && s.name != images::COMMON
    }) {
        containers.push(sidecar_container(
            &sidecar.name,
            &sidecar.image,
            &sidecar.image_pull_policy,
            sidecars.get(&sidecar.name),
            &common_args,
        ));
    }

    let mut pod_spec = controller_pod_spec(ctx, containers, volumes);
    pod_spec.affinity = Some(Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                label_selector: Some(LabelSelector {
                    match_expressions: Some(vec![LabelSelectorRequirement {
                        key: "app".to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![name.clone()]),
                    }]),
                    ..Default::default()
                }),
                topology_key: "kubernetes.io/hostname".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    });

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(ctx.namespace.clone()),
            owner_references: Some(vec![ctx.owner.clone()]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(ctx.driver.replicas),
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// Node DaemonSet
// ============================================================================

/// Node DaemonSet: privileged driver, registrar/sdc-monitor sidecars, node init containers
pub fn build_daemonset(ctx: &DriverContext<'_>, volumes: Vec<Volume>) -> Result<DaemonSet> {
    let name = ctx.daemonset_name();
    let dns_policy = if ctx.driver.dns_policy.is_empty() {
        DEFAULT_NODE_DNS_POLICY.to_string()
    } else {
        ctx.driver.dns_policy.clone()
    };
    if !VALID_DNS_POLICIES.contains(&dns_policy.as_str()) {
        return Err(Error::SyncError("invalid DNS Policy provided".to_string()));
    }
    let labels = app_labels(&name);
    let service_account = if ctx.create_node_service_account() {
        name.clone()
    } else {
        "default".to_string()
    };
    let sidecars = ctx.sidecar_params();
    let init_params = ctx.init_container_params(ContainerKind::Node);

    let mut containers = vec![driver_container(
        ctx,
        ctx.node_args(),
        ctx.node_envs(),
        ContainerKind::Node,
        Some(privileged_security_context()),
    )];
    for sidecar in ctx
        .driver
        .side_cars
        .iter()
        .filter(|s| s.name == images::REGISTRAR || s.name == images::SDC_MONITOR)
    {
        containers.push(sidecar_container(
            &sidecar.name,
            &sidecar.image,
            &sidecar.image_pull_policy,
            sidecars.get(&sidecar.name),
            &[],
        ));
    }

    let init_containers: Vec<Container> = ctx
        .driver
        .init_containers
        .iter()
        .map(|init| {
            let params = init_params.get(&init.name);
            build_container(
                &init.name,
                &init.image,
                &init.image_pull_policy,
                params.map(|p| p.args.clone()).unwrap_or_default(),
                params.map(|p| p.envs.clone()).unwrap_or_default(),
                params.map(|p| p.volume_mounts.clone()).unwrap_or_default(),
                Some(privileged_security_context()),
            )
        })
        .collect();

    let tolerations = ctx.tolerations(ContainerKind::Node);
    Ok(DaemonSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(ctx.namespace.clone()),
            owner_references: Some(vec![ctx.owner.clone()]),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            update_strategy: Some(DaemonSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDaemonSet {
                    max_unavailable: Some(IntOrString::Int(MAX_UNAVAILABLE)),
                    ..Default::default()
                }),
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    init_containers: Some(init_containers),
                    containers,
                    dns_policy: Some(dns_policy),
                    host_network: Some(true),
                    service_account_name: Some(service_account),
                    restart_policy: Some("Always".to_string()),
                    scheduler_name: Some("default-scheduler".to_string()),
                    termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
                    volumes: Some(volumes),
                    tolerations: (!tolerations.is_empty()).then_some(tolerations),
                    node_selector: ctx.node_selector(ContainerKind::Node),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

// ============================================================================
// StorageClass / VolumeSnapshotClass
// ============================================================================

/// StorageClasses declared in the spec, named `{crName}-{scName}`
pub fn build_storage_classes(ctx: &DriverContext<'_>, dummy: &OwnerReference) -> Vec<K8sStorageClass> {
    let provisioner = ctx.driver_name();
    let owner = OwnerReference {
        block_owner_deletion: Some(false),
        ..dummy.clone()
    };
    ctx.driver
        .storage_class
        .iter()
        .map(|sc| {
            let annotations = sc.default_sc.then(|| {
                BTreeMap::from([(DEFAULT_CLASS_ANNOTATION.to_string(), "true".to_string())])
            });
            let reclaim_policy = match sc.reclaim_policy.as_str() {
                "Retain" | "Recycle" => sc.reclaim_policy.clone(),
                _ => "Delete".to_string(),
            };
            let binding_mode = match sc.volume_binding_mode.as_str() {
                "Immediate" | "WaitForFirstConsumer" => Some(sc.volume_binding_mode.clone()),
                _ => None,
            };
            K8sStorageClass {
                metadata: ObjectMeta {
                    name: Some(format!("{}-{}", ctx.name, sc.name)),
                    annotations,
                    owner_references: Some(vec![owner.clone()]),
                    ..Default::default()
                },
                provisioner: provisioner.clone(),
                parameters: (!sc.parameters.is_empty()).then(|| sc.parameters.clone()),
                reclaim_policy: Some(reclaim_policy),
                volume_binding_mode: binding_mode,
                allow_volume_expansion: sc.allow_volume_expansion,
                allowed_topologies: sc.allowed_topologies.clone(),
                mount_options: None,
            }
        })
        .collect()
}

pub fn build_snapshot_classes(
    ctx: &DriverContext<'_>,
    dummy: &OwnerReference,
) -> Vec<VolumeSnapshotClass> {
    let driver_name = ctx.driver_name();
    ctx.driver
        .snapshot_class
        .iter()
        .map(|class| {
            let mut vsc = VolumeSnapshotClass::new(
                ObjectMeta {
                    name: Some(format!("{}-{}", ctx.name, class.name)),
                    owner_references: Some(vec![dummy.clone()]),
                    ..Default::default()
                },
                driver_name.clone(),
            );
            vsc.parameters = (!class.parameters.is_empty()).then(|| class.parameters.clone());
            vsc
        })
        .collect()
}

/// Whether a live pod still runs what the template asks for
///
/// Only env, image and pull policy of same-named containers are compared.
pub fn pod_matches_template(template: &PodSpec, pod: &PodSpec) -> bool {
    template.containers.iter().all(|wanted| {
        pod.containers
            .iter()
            .filter(|c| c.name == wanted.name)
            .all(|live| {
                live.env.as_deref().unwrap_or_default() == wanted.env.as_deref().unwrap_or_default()
                    && live.image == wanted.image
                    && live.image_pull_policy == wanted.image_pull_policy
            })
    })
}
