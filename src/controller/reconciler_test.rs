//! Tests for the driver reconciliation engine
//!
//! These tests verify:
//! - a fresh install adds the finalizer and config annotation, then syncs
//! - a running installation settles with no further writes
//! - invalid specs and unresolvable configs land in InvalidConfig
//! - a missing mandatory env var blocks the install
//! - repeated sync failures keep their first error time, back off, escalate
//!   to Failed, and forceUpdate recovers
//! - deletion removes the dummy ClusterRole and releases the finalizer

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use k8s_openapi::api::apps::v1::{
        DaemonSet, DaemonSetStatus, Deployment, DeploymentSpec, DeploymentStatus, StatefulSet,
        StatefulSetStatus,
    };
    use k8s_openapi::api::core::v1::{Pod, PodStatus as K8sPodStatus, Secret};
    use k8s_openapi::api::rbac::v1::ClusterRole;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use k8s_openapi::ByteString;
    use kube::ResourceExt;

    use super::super::finalizers::{has_finalizer, DRIVER_FINALIZER};
    use super::super::memory::{InMemoryCluster, Verb};
    use super::super::reconciler::*;
    use super::super::spec_init::CONFIG_VERSION_ANNOTATION;
    use super::super::state::{Requeue, DEFAULT_RETRY_INTERVAL};
    use crate::config::driver_config::{DriverConfig, DriverEnv, EnvDataType, SidecarParams};
    use crate::config::{DriverConfigProvider, OperatorConfig, ResolvedDriverConfig};
    use crate::crd::{
        images, CSIUnity, ConditionType, ContainerTemplate, Driver, DriverInstance, DriverState,
        DriverStatus, DriverType, LastUpdate,
    };
    use crate::error::{Error, Result};

    const NS: &str = "unity";
    const NAME: &str = "unity";
    const DUMMY: &str = "unity-unity-dummy";

    struct FixedProvider(Option<ResolvedDriverConfig>);

    impl DriverConfigProvider for FixedProvider {
        fn resolve(
            &self,
            driver_type: DriverType,
            config_version: &str,
            _kube_version: &str,
        ) -> Result<ResolvedDriverConfig> {
            self.0.clone().ok_or_else(|| {
                Error::ConfigError(format!(
                    "no driver config for {} {}",
                    driver_type, config_version
                ))
            })
        }
    }

    fn plain_config() -> ResolvedDriverConfig {
        ResolvedDriverConfig {
            config_version: "v3".to_string(),
            kube_version: "v120".to_string(),
            driver_version: "unity_v3_v120".to_string(),
            ..Default::default()
        }
    }

    fn sidecar_config() -> ResolvedDriverConfig {
        ResolvedDriverConfig {
            image_tags: BTreeMap::from([(
                images::PROVISIONER.to_string(),
                "quay.io/k8scsi/csi-provisioner:v2.0.2".to_string(),
            )]),
            driver: DriverConfig {
                sidecar_params: vec![SidecarParams {
                    name: images::PROVISIONER.to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..plain_config()
        }
    }

    fn reconciler(
        config: Option<ResolvedDriverConfig>,
    ) -> DriverReconciler<CSIUnity, InMemoryCluster> {
        let settings = OperatorConfig {
            pod_refresh_delay: Duration::ZERO,
            ..Default::default()
        };
        DriverReconciler::new(
            InMemoryCluster::new(),
            Arc::new(FixedProvider(config)),
            settings,
        )
    }

    fn unity(image: &str) -> CSIUnity {
        let mut obj = CSIUnity::from_driver(
            NAME,
            Driver {
                config_version: "v3".to_string(),
                replicas: 1,
                common: ContainerTemplate {
                    image: image.to_string(),
                    image_pull_policy: "IfNotPresent".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        obj.metadata.namespace = Some(NS.to_string());
        obj
    }

    /// An instance that went through install before
    fn installed(status: DriverStatus) -> CSIUnity {
        let mut obj = unity("dellemc/csi-unity:v1.4.0");
        obj.metadata.finalizers = Some(vec![DRIVER_FINALIZER.to_string()]);
        obj.metadata.annotations = Some(BTreeMap::from([(
            CONFIG_VERSION_ANNOTATION.to_string(),
            "v3".to_string(),
        )]));
        obj.set_driver_status(status);
        obj
    }

    fn unity_creds() -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("unity-creds".to_string()),
                namespace: Some(NS.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "config".to_string(),
                ByteString(
                    b"storageArrayList:\n  - {arrayId: A, username: u, password: p, restGateway: g}\n"
                        .to_vec(),
                ),
            )])),
            ..Default::default()
        }
    }

    fn running_pod(name: &str, app: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NS.to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), app.to_string())])),
                ..Default::default()
            },
            status: Some(K8sPodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Mark the controller and node workloads as fully rolled out
    fn roll_out(cluster: &InMemoryCluster) {
        let mut sts = cluster
            .object::<StatefulSet>(Some(NS), "unity-controller")
            .unwrap();
        sts.status = Some(StatefulSetStatus {
            replicas: 1,
            ready_replicas: Some(1),
            ..Default::default()
        });
        cluster.insert(sts);

        let mut ds = cluster.object::<DaemonSet>(Some(NS), "unity-node").unwrap();
        ds.status = Some(DaemonSetStatus {
            desired_number_scheduled: 1,
            number_ready: 1,
            ..Default::default()
        });
        cluster.insert(ds);

        cluster.insert(running_pod("unity-controller-0", "unity-controller"));
        cluster.insert(running_pod("unity-node-abcde", "unity-node"));
    }

    fn stored(reconciler: &DriverReconciler<CSIUnity, InMemoryCluster>) -> CSIUnity {
        reconciler.client().object::<CSIUnity>(Some(NS), NAME).unwrap()
    }

    fn stored_status(reconciler: &DriverReconciler<CSIUnity, InMemoryCluster>) -> DriverStatus {
        stored(reconciler).driver_status().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_missing_instance_is_not_requeued() {
        let reconciler = reconciler(Some(plain_config()));
        assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Requeue::Never);
        assert!(reconciler.client().writes().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_install_reaches_running() {
        let reconciler = reconciler(Some(sidecar_config()));
        let cluster = reconciler.client();
        cluster.insert(unity("dellemc/csi-unity:v1.4.0"));
        cluster.insert(unity_creds());

        // Finalizer and config version annotation first
        assert_eq!(
            reconciler.reconcile(NS, NAME).await.unwrap(),
            Requeue::Immediately
        );
        let obj = stored(&reconciler);
        assert!(has_finalizer(&obj));
        assert_eq!(obj.annotations()[CONFIG_VERSION_ANNOTATION], "v3");
        assert!(cluster.objects::<StatefulSet>().is_empty());

        // Initialized spec is persisted and the installation created
        assert_eq!(
            reconciler.reconcile(NS, NAME).await.unwrap(),
            Requeue::After(DEFAULT_RETRY_INTERVAL)
        );
        let obj = stored(&reconciler);
        assert_eq!(obj.driver().side_cars[0].name, images::PROVISIONER);
        assert!(cluster.object::<ClusterRole>(None, DUMMY).is_some());
        assert!(cluster
            .object::<StatefulSet>(Some(NS), "unity-controller")
            .is_some());
        assert!(cluster.object::<DaemonSet>(Some(NS), "unity-node").is_some());
        let status = stored_status(&reconciler);
        assert_eq!(status.state, DriverState::Succeeded);
        assert_ne!(status.driver_hash, 0);

        // The initialized spec hashes differently, so it is synced once more
        assert_eq!(
            reconciler.reconcile(NS, NAME).await.unwrap(),
            Requeue::After(DEFAULT_RETRY_INTERVAL)
        );
        let synced_hash = stored_status(&reconciler).driver_hash;
        assert_ne!(synced_hash, status.driver_hash);

        // Unchanged spec only recalculates state
        cluster.clear_writes();
        assert_eq!(
            reconciler.reconcile(NS, NAME).await.unwrap(),
            Requeue::After(DEFAULT_RETRY_INTERVAL)
        );
        assert!(cluster.writes().is_empty());

        roll_out(cluster);
        assert_eq!(
            reconciler.reconcile(NS, NAME).await.unwrap(),
            Requeue::After(DEFAULT_RETRY_INTERVAL)
        );
        let status = stored_status(&reconciler);
        assert_eq!(status.state, DriverState::Running);
        assert_eq!(status.last_update.condition, Some(ConditionType::Running));
        assert_eq!(status.controller_status.available, vec!["unity-controller-0"]);
        assert_eq!(status.node_status.available, vec!["unity-node-abcde"]);
        assert_eq!(status.driver_hash, synced_hash);

        cluster.clear_writes();
        assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Requeue::Never);
        assert!(cluster.writes().is_empty());
        assert_eq!(reconciler.attempts(), 6);
    }

    #[tokio::test]
    async fn test_invalid_spec_is_reported_and_not_synced() {
        let reconciler = reconciler(Some(plain_config()));
        let cluster = reconciler.client();
        cluster.insert(unity(""));

        assert_eq!(
            reconciler.reconcile(NS, NAME).await.unwrap(),
            Requeue::Immediately
        );
        assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Requeue::Never);

        let status = stored_status(&reconciler);
        assert_eq!(status.state, DriverState::InvalidConfig);
        assert_eq!(
            status.last_update.condition,
            Some(ConditionType::InvalidConfig)
        );
        assert_eq!(
            status.last_update.error_message,
            "driver image not specified in spec"
        );
        assert!(cluster.objects::<StatefulSet>().is_empty());
        assert!(cluster.object::<ClusterRole>(None, DUMMY).is_none());
    }

    #[tokio::test]
    async fn test_missing_mandatory_env_is_invalid() {
        let config = ResolvedDriverConfig {
            driver: DriverConfig {
                driver_envs: vec![DriverEnv {
                    name: "X_CSI_UNITY_ENDPOINT".to_string(),
                    mandatory: true,
                    env_type: EnvDataType::String,
                    set_for_controller: true,
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..plain_config()
        };
        let reconciler = reconciler(Some(config));
        let cluster = reconciler.client();
        cluster.insert(unity("dellemc/csi-unity:v1.4.0"));
        cluster.insert(unity_creds());

        assert_eq!(
            reconciler.reconcile(NS, NAME).await.unwrap(),
            Requeue::Immediately
        );
        assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Requeue::Never);

        let status = stored_status(&reconciler);
        assert_eq!(status.state, DriverState::InvalidConfig);
        assert_eq!(
            status.last_update.error_message,
            "mandatory Env - X_CSI_UNITY_ENDPOINT not specified in user spec"
        );
        assert!(cluster.objects::<StatefulSet>().is_empty());
        assert!(cluster.object::<ClusterRole>(None, DUMMY).is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_config_is_invalid() {
        let reconciler = reconciler(None);
        let cluster = reconciler.client();
        cluster.insert(unity("dellemc/csi-unity:v1.4.0"));
        // Without a driver config the controller is reported from its Deployment
        cluster.insert(Deployment {
            metadata: ObjectMeta {
                name: Some("unity-controller".to_string()),
                namespace: Some(NS.to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: Some(1),
                ..Default::default()
            }),
        });
        cluster.insert(running_pod("unity-controller-5d4f7", "unity-controller"));

        assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Requeue::Never);
        let obj = stored(&reconciler);
        assert!(has_finalizer(&obj));
        let status = obj.driver_status().cloned().unwrap();
        assert_eq!(status.state, DriverState::InvalidConfig);
        assert!(status
            .last_update
            .error_message
            .contains("no driver config for unity v3"));
        assert_eq!(status.controller_status.available, vec!["unity-controller-5d4f7"]);
    }

    #[tokio::test]
    async fn test_repeated_failure_keeps_error_time_and_backs_off() {
        let reconciler = reconciler(Some(plain_config()));
        let cluster = reconciler.client();
        cluster.insert(unity_creds());
        cluster.insert(installed(DriverStatus {
            driver_hash: 1,
            state: DriverState::Succeeded,
            ..Default::default()
        }));
        cluster.fail_on::<StatefulSet>(Verb::Create, "quota exceeded");

        assert_eq!(
            reconciler.reconcile(NS, NAME).await.unwrap(),
            Requeue::After(DEFAULT_RETRY_INTERVAL)
        );
        let first = stored_status(&reconciler);
        assert_eq!(first.state, DriverState::Updating);
        assert_eq!(first.last_update.condition, Some(ConditionType::Error));
        assert!(first.last_update.time.is_some());

        // A second failure in the same condition leaves the status alone
        cluster.clear_writes();
        assert_eq!(
            reconciler.reconcile(NS, NAME).await.unwrap(),
            Requeue::After(DEFAULT_RETRY_INTERVAL)
        );
        assert!(cluster.writes_of::<CSIUnity>(Verb::UpdateStatus).is_empty());
        assert!(cluster.writes_of::<CSIUnity>(Verb::Update).is_empty());
        assert_eq!(stored_status(&reconciler), first);

        // Four minutes in Error: wait twice as long
        let mut obj = stored(&reconciler);
        let mut status = first.clone();
        status.last_update.time = Some(Utc::now() - chrono::Duration::minutes(4));
        obj.set_driver_status(status);
        cluster.insert(obj);
        assert_eq!(
            reconciler.reconcile(NS, NAME).await.unwrap(),
            Requeue::After(Duration::from_secs(480))
        );

        // Thirty minutes in Error: give up
        let mut obj = stored(&reconciler);
        let mut status = first.clone();
        status.last_update.time = Some(Utc::now() - chrono::Duration::minutes(30));
        obj.set_driver_status(status);
        cluster.insert(obj);
        assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Requeue::Never);
        let status = stored_status(&reconciler);
        assert_eq!(status.state, DriverState::Failed);
        assert_eq!(status.last_update.condition, Some(ConditionType::Failed));

        cluster.clear_writes();
        assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Requeue::Never);
        assert!(cluster.writes().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_sync_failure_escalates_until_forced() {
        let reconciler = reconciler(Some(plain_config()));
        let cluster = reconciler.client();
        cluster.insert(unity_creds());
        let failing_since = Utc::now() - chrono::Duration::minutes(31);
        cluster.insert(installed(DriverStatus {
            driver_hash: 1,
            state: DriverState::Updating,
            last_update: LastUpdate {
                condition: Some(ConditionType::Error),
                time: Some(failing_since),
                error_message: "statefulset create failed".to_string(),
            },
            ..Default::default()
        }));
        cluster.fail_on::<StatefulSet>(Verb::Create, "quota exceeded");

        assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Requeue::Never);
        let status = stored_status(&reconciler);
        assert_eq!(status.state, DriverState::Failed);
        assert_eq!(status.last_update.condition, Some(ConditionType::Failed));
        assert!(status.last_update.error_message.contains("quota exceeded"));

        // Failed with an unchanged spec stays put
        cluster.clear_writes();
        assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Requeue::Never);
        assert!(cluster.writes().is_empty());

        cluster.clear_failures();
        let mut obj = stored(&reconciler);
        obj.driver_mut().force_update = true;
        cluster.insert(obj);
        assert_eq!(
            reconciler.reconcile(NS, NAME).await.unwrap(),
            Requeue::After(DEFAULT_RETRY_INTERVAL)
        );
        let obj = stored(&reconciler);
        assert!(!obj.driver().force_update);
        assert_eq!(
            obj.driver_status().map(|s| s.state),
            Some(DriverState::Succeeded)
        );
        assert!(cluster
            .object::<StatefulSet>(Some(NS), "unity-controller")
            .is_some());
    }

    #[tokio::test]
    async fn test_first_sync_failure_retries() {
        let reconciler = reconciler(Some(plain_config()));
        let cluster = reconciler.client();
        cluster.insert(unity_creds());
        cluster.insert(installed(DriverStatus {
            driver_hash: 1,
            state: DriverState::Succeeded,
            ..Default::default()
        }));
        cluster.fail_on::<StatefulSet>(Verb::Create, "quota exceeded");

        assert_eq!(
            reconciler.reconcile(NS, NAME).await.unwrap(),
            Requeue::After(DEFAULT_RETRY_INTERVAL)
        );
        let status = stored_status(&reconciler);
        assert_eq!(status.state, DriverState::Updating);
        assert_eq!(status.last_update.condition, Some(ConditionType::Error));
    }

    fn deleting(status: DriverStatus) -> CSIUnity {
        let mut obj = installed(status);
        obj.metadata.deletion_timestamp = Some(Time(Utc::now()));
        obj
    }

    fn dummy_role() -> ClusterRole {
        ClusterRole {
            metadata: ObjectMeta {
                name: Some(DUMMY.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_deletion_removes_dummy_role_and_finalizer() {
        let reconciler = reconciler(Some(plain_config()));
        let cluster = reconciler.client();
        cluster.insert(dummy_role());
        cluster.insert(deleting(DriverStatus {
            state: DriverState::Running,
            ..Default::default()
        }));

        assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Requeue::Never);
        assert!(cluster.object::<ClusterRole>(None, DUMMY).is_none());
        assert!(!has_finalizer(&stored(&reconciler)));
        assert!(cluster.objects::<StatefulSet>().is_empty());
    }

    #[tokio::test]
    async fn test_deletion_without_dummy_resyncs_first() {
        let reconciler = reconciler(Some(plain_config()));
        let cluster = reconciler.client();
        cluster.insert(deleting(DriverStatus {
            state: DriverState::Running,
            ..Default::default()
        }));

        assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Requeue::Never);
        assert_eq!(cluster.writes_of::<ClusterRole>(Verb::Create).len(), 3);
        assert_eq!(cluster.writes_of::<ClusterRole>(Verb::Delete).len(), 1);
        assert!(cluster.object::<ClusterRole>(None, DUMMY).is_none());
        assert!(!has_finalizer(&stored(&reconciler)));
    }

    #[tokio::test]
    async fn test_deletion_of_invalid_instance_skips_resync() {
        let reconciler = reconciler(Some(plain_config()));
        let cluster = reconciler.client();
        cluster.insert(deleting(DriverStatus {
            state: DriverState::InvalidConfig,
            ..Default::default()
        }));

        assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Requeue::Never);
        assert!(cluster.writes_of::<ClusterRole>(Verb::Create).is_empty());
        assert!(!has_finalizer(&stored(&reconciler)));
    }
}
