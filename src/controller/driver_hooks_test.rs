//! Tests for driver-specific hooks
//!
//! These tests verify:
//! - PowerMax default topologies on first install and version limits
//! - Unity credential secret parsing and storage class parameters
//! - VxFlexOS MDM normalization and HOST_PID validation

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{EnvVar, Secret, TopologySelectorTerm};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;

    use super::super::driver_hooks::*;
    use super::super::memory::InMemoryCluster;
    use crate::crd::{
        images, CSIPowerMax, CSIUnity, CSIVXFlexOS, ContainerTemplate, Driver, DriverInstance,
        DriverStatus, StorageClass,
    };

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        }
    }

    fn storage_class(name: &str, params: &[(&str, &str)], binding_mode: &str) -> StorageClass {
        StorageClass {
            name: name.to_string(),
            parameters: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            volume_binding_mode: binding_mode.to_string(),
            ..Default::default()
        }
    }

    fn namespaced<K: DriverInstance>(name: &str, driver: Driver) -> K {
        let mut obj = K::from_driver(name, driver);
        obj.meta_mut().namespace = Some("powermax".to_string());
        obj
    }

    #[test]
    fn test_powermax_topologies_follow_driver_name() {
        let mut driver = Driver {
            config_version: "v4".to_string(),
            storage_class: vec![
                storage_class("bronze", &[("SYMID", "000000000001")], "WaitForFirstConsumer"),
                storage_class("silver", &[("SYMID", "000000000002")], "Immediate"),
                storage_class("gold", &[], "WaitForFirstConsumer"),
            ],
            ..Default::default()
        };
        assert!(default_powermax_topologies(&mut driver, "powermax"));
        let terms = driver.storage_class[0].allowed_topologies.clone().unwrap();
        let requirement = &terms[0].match_label_expressions.as_ref().unwrap()[0];
        assert_eq!(requirement.key, "csi-powermax.dellemc.com/000000000001");
        assert_eq!(requirement.values, vec!["csi-powermax.dellemc.com"]);
        assert!(driver.storage_class[1].allowed_topologies.is_none());
        assert!(driver.storage_class[2].allowed_topologies.is_none());

        // Already defaulted
        assert!(!default_powermax_topologies(&mut driver, "powermax"));

        let mut custom = Driver {
            common: ContainerTemplate {
                envs: vec![env("X_CSI_POWERMAX_DRIVER_NAME", "pmax")],
                ..Default::default()
            },
            storage_class: vec![storage_class(
                "bronze",
                &[("SYMID", "000000000001")],
                "WaitForFirstConsumer",
            )],
            ..Default::default()
        };
        assert!(default_powermax_topologies(&mut custom, "storage"));
        let terms = custom.storage_class[0].allowed_topologies.clone().unwrap();
        let requirement = &terms[0].match_label_expressions.as_ref().unwrap()[0];
        assert_eq!(requirement.key, "storage.pmax.dellemc.com/000000000001");
    }

    #[test]
    fn test_powermax_topologies_only_on_first_install() {
        let driver = Driver {
            config_version: "v4".to_string(),
            storage_class: vec![storage_class(
                "bronze",
                &[("SYMID", "000000000001")],
                "WaitForFirstConsumer",
            )],
            ..Default::default()
        };
        let mut installed: CSIPowerMax = namespaced("powermax", driver.clone());
        installed.set_driver_status(DriverStatus {
            driver_hash: 42,
            ..Default::default()
        });
        assert!(!initialize_driver_spec(&mut installed).unwrap());

        let mut fresh: CSIPowerMax = namespaced("powermax", driver);
        assert!(initialize_driver_spec(&mut fresh).unwrap());
    }

    #[tokio::test]
    async fn test_powermax_version_limits() {
        let cluster = InMemoryCluster::new();
        let mut driver = Driver {
            config_version: "v3".to_string(),
            storage_class: vec![storage_class("bronze", &[], "WaitForFirstConsumer")],
            ..Default::default()
        };
        let old: CSIPowerMax = namespaced("powermax", driver.clone());
        let err = validate_driver_spec(&cluster, &old).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "WaitForFirstConsumer is not a supported value for volumeBindingMode in driver config version: 3"
        );

        driver.storage_class[0].volume_binding_mode = "Immediate".to_string();
        driver.storage_class[0].allowed_topologies = Some(vec![TopologySelectorTerm::default()]);
        let old: CSIPowerMax = namespaced("powermax", driver.clone());
        let err = validate_driver_spec(&cluster, &old).await.unwrap_err();
        assert!(err.to_string().starts_with("topology is not supported"));

        driver.config_version = "v4".to_string();
        let current: CSIPowerMax = namespaced("powermax", driver);
        validate_driver_spec(&cluster, &current).await.unwrap();
    }

    #[test]
    fn test_check_unity_arrays() {
        let valid = r#"
storageArrayList:
  - arrayId: "APM00000001"
    username: "admin"
    password: "secret"
    restGateway: "https://10.0.0.1"
    isDefaultArray: true
  - arrayId: "APM00000002"
    username: "admin"
    password: "secret"
    endpoint: "https://10.0.0.2"
"#;
        check_unity_arrays(valid).unwrap();

        let json = r#"{"storageArrayList":[{"arrayId":"A","username":"u","password":"p","endpoint":"https://e","isDefault":true}]}"#;
        check_unity_arrays(json).unwrap();

        let err = check_unity_arrays("").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Arrays details are not provided in unity-creds secret"
        );

        let missing_password = r#"
storageArrayList:
  - arrayId: "A"
    username: "u"
    restGateway: "https://g"
"#;
        assert_eq!(
            check_unity_arrays(missing_password).unwrap_err().to_string(),
            "invalid value for Password at index [0]"
        );

        let duplicate = r#"
storageArrayList:
  - {arrayId: "A", username: "u", password: "p", restGateway: "g"}
  - {arrayId: "A", username: "u", password: "p", restGateway: "g"}
"#;
        assert!(check_unity_arrays(duplicate)
            .unwrap_err()
            .to_string()
            .contains("Duplicate ArrayID [A]"));

        let two_defaults = r#"
storageArrayList:
  - {arrayId: "A", username: "u", password: "p", restGateway: "g", isDefaultArray: true}
  - {arrayId: "B", username: "u", password: "p", restGateway: "g", isDefaultArray: true}
"#;
        assert!(check_unity_arrays(two_defaults)
            .unwrap_err()
            .to_string()
            .contains("'isDefaultArray' parameter located in multiple places ArrayID: B"));
    }

    fn unity_creds(config: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("unity-creds".to_string()),
                namespace: Some("unity".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "config".to_string(),
                ByteString(config.as_bytes().to_vec()),
            )])),
            ..Default::default()
        }
    }

    fn unity(driver: Driver) -> CSIUnity {
        let mut obj = CSIUnity::from_driver("unity", driver);
        obj.metadata.namespace = Some("unity".to_string());
        obj
    }

    #[tokio::test]
    async fn test_unity_requires_creds_secret() {
        let cluster = InMemoryCluster::new();
        let obj = unity(Driver {
            config_version: "v3".to_string(),
            ..Default::default()
        });
        let err = validate_driver_spec(&cluster, &obj).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "reading secret [unity-creds] error [secret not found]"
        );

        cluster.insert(unity_creds(
            "storageArrayList:\n  - {arrayId: A, username: u, password: p, restGateway: g}\n",
        ));
        validate_driver_spec(&cluster, &obj).await.unwrap();
    }

    #[tokio::test]
    async fn test_unity_storage_class_parameters() {
        let cluster = InMemoryCluster::new();
        cluster.insert(unity_creds(
            "storageArrayList:\n  - {arrayId: A, username: u, password: p, restGateway: g}\n",
        ));

        let v2 = unity(Driver {
            config_version: "v2".to_string(),
            storage_class: vec![storage_class("fc", &[("storagePool", "pool_1")], "")],
            ..Default::default()
        });
        assert_eq!(
            validate_driver_spec(&cluster, &v2).await.unwrap_err().to_string(),
            "arrayId paramter is mandatory in StorageClass [fc]"
        );

        let tiering = unity(Driver {
            config_version: "v3".to_string(),
            storage_class: vec![storage_class("fc", &[("tieringPolicy", "3")], "")],
            ..Default::default()
        });
        assert!(validate_driver_spec(&cluster, &tiering)
            .await
            .unwrap_err()
            .to_string()
            .starts_with("tieringPolicy should be numeric"));
    }

    #[test]
    fn test_normalize_mdm_list() {
        assert_eq!(
            normalize_mdm_list("10.0.0.1, 10.0.0.2").as_deref(),
            Some("10.0.0.1,10.0.0.2")
        );
        assert!(normalize_mdm_list("10.0.0.1,mdm.example.com").is_none());
        assert!(normalize_mdm_list("").is_none());
    }

    fn vxflexos(init_mdm: &str, monitor_envs: Vec<EnvVar>) -> CSIVXFlexOS {
        let mut obj = CSIVXFlexOS::from_driver(
            "vxflexos",
            Driver {
                config_version: "v3".to_string(),
                init_containers: vec![ContainerTemplate {
                    name: images::SDC.to_string(),
                    envs: vec![env("MDM", init_mdm)],
                    ..Default::default()
                }],
                side_cars: vec![ContainerTemplate {
                    name: images::SDC_MONITOR.to_string(),
                    envs: monitor_envs,
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        obj.metadata.namespace = Some("vxflexos".to_string());
        obj
    }

    fn monitor_mdm(obj: &CSIVXFlexOS) -> Option<String> {
        obj.driver().side_cars[0]
            .envs
            .iter()
            .find(|e| e.name == "MDM")
            .and_then(|e| e.value.clone())
    }

    #[test]
    fn test_vxflexos_mdm_copied_to_sdc_monitor() {
        let mut obj = vxflexos("10.0.0.1, 10.0.0.2", Vec::new());
        assert!(initialize_driver_spec(&mut obj).unwrap());
        assert_eq!(
            obj.driver().init_containers[0].envs[0].value.as_deref(),
            Some("10.0.0.1,10.0.0.2")
        );
        assert_eq!(monitor_mdm(&obj).as_deref(), Some("10.0.0.1,10.0.0.2"));
        assert!(!initialize_driver_spec(&mut obj).unwrap());

        let mut stale = vxflexos("10.0.0.3", vec![env("MDM", "10.0.0.1")]);
        assert!(initialize_driver_spec(&mut stale).unwrap());
        assert_eq!(monitor_mdm(&stale).as_deref(), Some("10.0.0.3"));

        let mut invalid = vxflexos("mdm-host", Vec::new());
        assert!(initialize_driver_spec(&mut invalid)
            .unwrap_err()
            .to_string()
            .starts_with("Invalid MDM value"));
    }

    #[tokio::test]
    async fn test_vxflexos_host_pid() {
        let cluster = InMemoryCluster::new();
        let ok = vxflexos("10.0.0.1", vec![env("HOST_PID", "1")]);
        validate_driver_spec(&cluster, &ok).await.unwrap();

        let bad = vxflexos("10.0.0.1", vec![env("HOST_PID", "2")]);
        assert_eq!(
            validate_driver_spec(&cluster, &bad).await.unwrap_err().to_string(),
            "Invalid HOST_PID value, it should be 0 or 1"
        );
    }
}
