//! Unit tests for the Dell CSI custom resources
//!
//! Tests the per-driver naming table, the wire format of the driver and
//! reverse-proxy kinds, and the generated CustomResourceDefinitions.

#[cfg(test)]
mod driver_type_table {
    use std::str::FromStr;

    use crate::crd::DriverType;

    #[test]
    fn test_names_follow_driver_type() {
        let unity = DriverType::Unity;
        assert_eq!(unity.controller_name(), "unity-controller");
        assert_eq!(unity.daemonset_name(), "unity-node");
        assert_eq!(unity.default_driver_name(), "csi-unity.dellemc.com");
        assert_eq!(
            DriverType::VxFlexOs.default_driver_name(),
            "csi-vxflexos.dellemc.com"
        );
    }

    #[test]
    fn test_credential_and_certificate_envs() {
        assert_eq!(DriverType::Isilon.user_env_name(), "X_CSI_ISI_USER");
        assert_eq!(DriverType::Isilon.password_env_name(), "X_CSI_ISI_PASSWORD");
        assert_eq!(
            DriverType::PowerMax.cert_validation_env(),
            "X_CSI_POWERMAX_SKIP_CERTIFICATE_VALIDATION"
        );
        assert_eq!(DriverType::Unity.cert_validation_env(), "X_CSI_UNITY_INSECURE");
        assert_eq!(
            DriverType::PowerMax.driver_name_env(),
            Some("X_CSI_POWERMAX_DRIVER_NAME")
        );
        assert_eq!(DriverType::Unity.driver_name_env(), None);
    }

    #[test]
    fn test_rbac_scope_and_cert_mounts() {
        assert!(!DriverType::PowerMax.is_limited_node_rbac("v1"));
        assert!(DriverType::PowerMax.is_limited_node_rbac("v4"));
        assert!(DriverType::PowerStore.is_limited_node_rbac("v1"));
        assert!(!DriverType::Unity.is_limited_node_rbac("v3"));

        let mounting: Vec<DriverType> = DriverType::ALL
            .into_iter()
            .filter(|d| d.mounts_projected_certs())
            .collect();
        assert_eq!(mounting, vec![DriverType::Isilon, DriverType::Unity]);
        assert!(DriverType::Isilon.supports_fs_group_policy());
        assert!(!DriverType::Unity.supports_fs_group_policy());
    }

    #[test]
    fn test_parse_driver_type() {
        assert_eq!(DriverType::from_str(" vxflexos ").unwrap(), DriverType::VxFlexOs);
        for driver in DriverType::ALL {
            assert_eq!(DriverType::from_str(&driver.to_string()).unwrap(), driver);
        }
        let err = DriverType::from_str("ecs").unwrap_err();
        assert!(err.to_string().contains("unknown driver type: ecs"));
    }
}

#[cfg(test)]
mod wire_format {
    use kube::Resource;
    use serde_json::json;

    use crate::crd::{
        CSIPowerMaxRevProxy, CSIUnity, ConditionType, DriverInstance, DriverState,
        VolumeSnapshotClass, GROUP,
    };

    const UNITY_YAML: &str = r#"
apiVersion: storage.dell.com/v1
kind: CSIUnity
metadata:
  name: unity
  namespace: unity
spec:
  driver:
    configVersion: v3
    replicas: 2
    forceUpdate: true
    common:
      image: "dellemc/csi-unity:v1.4.0"
      imagePullPolicy: IfNotPresent
      envs:
        - name: X_CSI_UNITY_DEBUG
          value: "true"
    sideCars:
      - name: provisioner
        args: ["--volume-name-prefix=csiunity"]
    storageClass:
      - name: fc
        default: true
        reclaimPolicy: Delete
        allowVolumeExpansion: true
        parameters:
          arrayId: APM00000001
          protocol: FC
    snapshotClass:
      - name: snap
        parameters:
          retentionDuration: "2:2:23:45"
status:
  state: Running
  driverHash: 12345
  lastUpdate:
    condition: Running
    time: "2026-01-01T00:00:00Z"
  controllerStatus:
    available: ["unity-controller-0"]
"#;

    #[test]
    fn test_driver_instance_from_yaml() {
        let obj: CSIUnity = serde_yaml::from_str(UNITY_YAML).unwrap();
        let driver = obj.driver();
        assert_eq!(driver.config_version, "v3");
        assert_eq!(driver.replicas, 2);
        assert!(driver.force_update);
        assert_eq!(driver.common.envs[0].name, "X_CSI_UNITY_DEBUG");
        assert_eq!(driver.side_cars[0].args, vec!["--volume-name-prefix=csiunity"]);
        let sc = &driver.storage_class[0];
        assert!(sc.default_sc);
        assert_eq!(sc.allow_volume_expansion, Some(true));
        assert_eq!(sc.parameters["protocol"], "FC");
        assert_eq!(driver.snapshot_class[0].name, "snap");

        let status = obj.driver_status().unwrap();
        assert_eq!(status.state, DriverState::Running);
        assert_eq!(status.driver_hash, 12345);
        assert_eq!(status.last_update.condition, Some(ConditionType::Running));
        assert!(status.last_update.time.is_some());
        assert_eq!(status.controller_status.available, vec!["unity-controller-0"]);
        assert!(status.node_status.available.is_empty());
    }

    #[test]
    fn test_empty_fields_are_omitted() {
        let obj: CSIUnity = serde_yaml::from_str(UNITY_YAML).unwrap();
        let mut driver = obj.driver().clone();
        driver.force_update = false;
        driver.storage_class.clear();
        let value = serde_json::to_value(&driver).unwrap();
        assert!(value.get("forceUpdate").is_none());
        assert!(value.get("storageClass").is_none());
        assert!(value.get("authSecret").is_none());
        assert_eq!(value["configVersion"], "v3");
    }

    #[test]
    fn test_states_serialize_like_the_api() {
        assert_eq!(serde_json::to_value(DriverState::NoState).unwrap(), json!(""));
        assert_eq!(
            serde_json::from_value::<DriverState>(json!("InvalidConfig")).unwrap(),
            DriverState::InvalidConfig
        );
        assert_eq!(DriverState::NoState.to_string(), "");
        assert_eq!(DriverState::Succeeded.to_string(), "Succeeded");

        assert_eq!(ConditionType::from_state(DriverState::NoState), None);
        assert_eq!(
            ConditionType::from_state(DriverState::Failed),
            Some(ConditionType::Failed)
        );
    }

    #[test]
    fn test_rev_proxy_from_yaml() {
        let yaml = r#"
apiVersion: storage.dell.com/v1
kind: CSIPowerMaxRevProxy
metadata:
  name: powermax-reverseproxy
  namespace: powermax
spec:
  image: dellemc/csipowermax-reverseproxy:v1.3.0
  tlsSecret: csirevproxy-tls-secret
  config:
    mode: StandAlone
    port: 2222
    standAloneConfig:
      storageArrays:
        - storageArrayId: "000000000001"
          primaryURL: https://primary-1.unisphe.re:8443
          proxyCredentialSecrets: [proxy-secret-11]
      managementServers:
        - url: https://primary-1.unisphe.re:8443
          arrayCredentialSecret: primary-1-secret-1
          skipCertificateValidation: true
          limits:
            maxActiveRead: 5
"#;
        let proxy: CSIPowerMaxRevProxy = serde_yaml::from_str(yaml).unwrap();
        let config = &proxy.spec.rev_proxy;
        assert_eq!(config.mode, "StandAlone");
        assert_eq!(config.port, 2222);
        assert!(config.link_config.is_none());
        let stand_alone = config.stand_alone_config.as_ref().unwrap();
        assert_eq!(
            stand_alone.storage_arrays[0].primary_url,
            "https://primary-1.unisphe.re:8443"
        );
        assert!(stand_alone.storage_arrays[0].backup_url.is_empty());
        let server = &stand_alone.management_servers[0];
        assert!(server.skip_certificate_validation);
        assert_eq!(server.limits.max_active_read, 5);
        assert!(proxy.status.is_none());

        let value = serde_json::to_value(&proxy.spec).unwrap();
        assert!(value["config"]["standAloneConfig"]["managementServers"][0]["limits"]
            .get("maxActiveWrite")
            .is_none());
    }

    #[test]
    fn test_api_groups() {
        assert_eq!(CSIUnity::group(&()), GROUP);
        assert_eq!(CSIPowerMaxRevProxy::group(&()), GROUP);
        assert_eq!(CSIUnity::plural(&()), "csiunities");
        assert_eq!(VolumeSnapshotClass::api_version(&()), "snapshot.storage.k8s.io/v1");
    }

    #[test]
    fn test_volume_snapshot_class_defaults() {
        let vsc: VolumeSnapshotClass = serde_json::from_value(json!({
            "metadata": {"name": "unity-snap"},
            "driver": "csi-unity.dellemc.com",
            "deletionPolicy": "Retain"
        }))
        .unwrap();
        assert_eq!(vsc.kind, "VolumeSnapshotClass");
        assert_eq!(vsc.api_version, "snapshot.storage.k8s.io/v1");
        assert_eq!(vsc.deletion_policy, "Retain");
        assert!(vsc.parameters.is_none());
    }
}

#[cfg(test)]
mod generated_definitions {
    use kube::CustomResourceExt;

    use crate::crd::{
        CSIIsilon, CSIPowerMax, CSIPowerMaxRevProxy, CSIPowerStore, CSIUnity, CSIVXFlexOS,
    };

    #[test]
    fn test_definitions_are_namespaced_v1() {
        let crds = [
            CSIPowerMax::crd(),
            CSIIsilon::crd(),
            CSIUnity::crd(),
            CSIVXFlexOS::crd(),
            CSIPowerStore::crd(),
            CSIPowerMaxRevProxy::crd(),
        ];
        let names: Vec<String> = crds
            .iter()
            .map(|c| c.metadata.name.clone().unwrap_or_default())
            .collect();
        assert_eq!(
            names,
            vec![
                "csipowermaxes.storage.dell.com",
                "csiisilons.storage.dell.com",
                "csiunities.storage.dell.com",
                "csivxflexoses.storage.dell.com",
                "csipowerstores.storage.dell.com",
                "csipowermaxrevproxies.storage.dell.com",
            ]
        );
        for crd in &crds {
            assert_eq!(crd.spec.scope, "Namespaced");
            assert_eq!(crd.spec.versions[0].name, "v1");
            assert!(crd.spec.versions[0]
                .subresources
                .as_ref()
                .and_then(|s| s.status.as_ref())
                .is_some());
        }
    }

    #[test]
    fn test_short_names_and_columns() {
        let crd = CSIUnity::crd();
        assert_eq!(
            crd.spec.names.short_names.as_deref(),
            Some(&["unity".to_string()][..])
        );
        let columns = crd.spec.versions[0]
            .additional_printer_columns
            .clone()
            .unwrap_or_default();
        let column_names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(column_names, vec!["CreationTime", "DriverVersion", "State"]);
    }
}
