//! Tests for spec initialization
//!
//! These tests verify:
//! - the config-version annotation is required and idempotent
//! - sidecar images default from the image tags and are annotated
//! - user images are kept, except during an upgrade
//! - mandatory sidecars are appended
//! - storage class attributes default from the driver config

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::super::spec_init::*;
    use crate::config::driver_config::{
        DriverConfig, InitContainerParams, SidecarParams, StorageClassAttr,
    };
    use crate::config::ResolvedDriverConfig;
    use crate::crd::{
        images, CSIUnity, ContainerTemplate, Driver, DriverInstance, DriverStatus, LastUpdate,
        StorageClass,
    };

    fn config(config_version: &str) -> ResolvedDriverConfig {
        ResolvedDriverConfig {
            config_version: config_version.to_string(),
            kube_version: "v120".to_string(),
            driver_version: format!("unity_{}_v120", config_version),
            image_tags: BTreeMap::from([
                (
                    images::PROVISIONER.to_string(),
                    "quay.io/k8scsi/csi-provisioner:v2.0.2".to_string(),
                ),
                (
                    images::ATTACHER.to_string(),
                    "quay.io/k8scsi/csi-attacher:v3.0.0 ".to_string(),
                ),
                (
                    images::REGISTRAR.to_string(),
                    "quay.io/k8scsi/csi-node-driver-registrar:v2.0.1".to_string(),
                ),
                ("sdc".to_string(), "dellemc/sdc:3.5".to_string()),
            ]),
            driver: DriverConfig {
                sidecar_params: vec![
                    SidecarParams {
                        name: images::PROVISIONER.to_string(),
                        ..Default::default()
                    },
                    SidecarParams {
                        name: images::ATTACHER.to_string(),
                        optional: true,
                        ..Default::default()
                    },
                    SidecarParams {
                        name: images::REGISTRAR.to_string(),
                        ..Default::default()
                    },
                ],
                init_container_params: vec![InitContainerParams {
                    name: "sdc".to_string(),
                    set_for_node: true,
                    ..Default::default()
                }],
                storage_class_attrs: vec![
                    StorageClassAttr {
                        name: "allowVolumeExpansion".to_string(),
                        value: serde_json::json!(true),
                    },
                    StorageClassAttr {
                        name: "volumeBindingMode".to_string(),
                        value: serde_json::json!("WaitForFirstConsumer"),
                    },
                ],
                ..Default::default()
            },
        }
    }

    fn sidecar(name: &str, image: &str) -> ContainerTemplate {
        ContainerTemplate {
            name: name.to_string(),
            image: image.to_string(),
            ..Default::default()
        }
    }

    fn unity(driver: Driver) -> CSIUnity {
        CSIUnity::from_driver("unity", driver)
    }

    fn base_driver() -> Driver {
        Driver {
            config_version: "v3".to_string(),
            replicas: 1,
            common: ContainerTemplate {
                image: "dellemc/csi-unity:v1.4.0".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn annotation<'a>(obj: &'a CSIUnity, key: &str) -> Option<&'a str> {
        obj.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    #[test]
    fn test_annotate_config_version() {
        let mut annotations = BTreeMap::new();
        assert!(annotate_config_version(&mut annotations, "").is_err());
        assert!(annotate_config_version(&mut annotations, "v3").unwrap());
        assert!(!annotate_config_version(&mut annotations, "v3").unwrap());
        assert!(annotate_config_version(&mut annotations, "v4").unwrap());
        assert_eq!(annotations[CONFIG_VERSION_ANNOTATION], "v4");
    }

    #[test]
    fn test_empty_sidecar_images_default_and_mandatory_sidecars_added() {
        let mut driver = base_driver();
        driver.side_cars = vec![sidecar(images::ATTACHER, "")];
        let mut obj = unity(driver);

        assert!(initialize_spec(&mut obj, &config("v3")).unwrap());
        let sidecars = &obj.driver().side_cars;
        let names: Vec<&str> = sidecars.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![images::ATTACHER, images::PROVISIONER, images::REGISTRAR]
        );
        assert_eq!(sidecars[0].image, "quay.io/k8scsi/csi-attacher:v3.0.0");
        assert_eq!(sidecars[0].image_pull_policy, "IfNotPresent");
        assert_eq!(
            annotation(&obj, "storage.dell.com/attacher.Image.IsDefault"),
            Some("true")
        );
        assert_eq!(annotation(&obj, CONFIG_VERSION_ANNOTATION), Some("v3"));
    }

    #[test]
    fn test_user_image_kept_without_upgrade() {
        let mut driver = base_driver();
        driver.side_cars = vec![sidecar(images::PROVISIONER, "my/provisioner:dev")];
        let mut obj = unity(driver);
        obj.metadata.annotations = Some(BTreeMap::from([(
            CONFIG_VERSION_ANNOTATION.to_string(),
            "v3".to_string(),
        )]));

        initialize_spec(&mut obj, &config("v3")).unwrap();
        assert_eq!(obj.driver().side_cars[0].image, "my/provisioner:dev");
        assert_eq!(
            annotation(&obj, "storage.dell.com/provisioner.Image.IsDefault"),
            Some("false")
        );
        assert_eq!(
            annotation(&obj, "storage.dell.com/provisioner.Image"),
            Some("my/provisioner:dev")
        );
    }

    #[test]
    fn test_upgrade_resets_user_images() {
        let mut driver = base_driver();
        driver.side_cars = vec![sidecar(images::PROVISIONER, "my/provisioner:dev")];
        let mut obj = unity(driver);
        obj.metadata.annotations = Some(BTreeMap::from([(
            CONFIG_VERSION_ANNOTATION.to_string(),
            "v2".to_string(),
        )]));

        assert!(initialize_spec(&mut obj, &config("v3")).unwrap());
        assert_eq!(
            obj.driver().side_cars[0].image,
            "quay.io/k8scsi/csi-provisioner:v2.0.2"
        );
        // The annotation follows the spec's config version
        assert_eq!(annotation(&obj, CONFIG_VERSION_ANNOTATION), Some("v3"));
    }

    #[test]
    fn test_second_initialization_is_stable() {
        let mut obj = unity(base_driver());
        let config = config("v3");
        initialize_spec(&mut obj, &config).unwrap();
        let first = obj.clone();
        assert!(!initialize_spec(&mut obj, &config).unwrap());
        assert_eq!(obj, first);
    }

    #[test]
    fn test_init_containers_and_storage_classes() {
        let mut driver = base_driver();
        driver.init_containers = vec![sidecar("sdc", "")];
        driver.storage_class = vec![
            StorageClass {
                name: "fc".to_string(),
                ..Default::default()
            },
            StorageClass {
                name: "nfs".to_string(),
                allow_volume_expansion: Some(false),
                volume_binding_mode: "Immediate".to_string(),
                ..Default::default()
            },
        ];
        let mut obj = unity(driver);

        initialize_spec(&mut obj, &config("v3")).unwrap();
        let driver = obj.driver();
        assert_eq!(driver.init_containers[0].image, "dellemc/sdc:3.5");
        assert_eq!(driver.init_containers[0].image_pull_policy, "IfNotPresent");
        assert_eq!(driver.storage_class[0].allow_volume_expansion, Some(true));
        assert_eq!(driver.storage_class[0].volume_binding_mode, "WaitForFirstConsumer");
        assert_eq!(driver.storage_class[1].allow_volume_expansion, Some(false));
        assert_eq!(driver.storage_class[1].volume_binding_mode, "Immediate");
    }

    #[test]
    fn test_missing_image_tag_is_an_error() {
        let mut driver = base_driver();
        driver.init_containers = vec![sidecar("unknown-init", "")];
        let mut obj = unity(driver);
        let err = initialize_spec(&mut obj, &config("v3")).unwrap_err();
        assert!(err.to_string().contains("failed to find image tag for: unknown-init"));
    }

    #[test]
    fn test_clears_previous_error_message() {
        let mut obj = unity(base_driver());
        obj.set_driver_status(DriverStatus {
            last_update: LastUpdate {
                error_message: "old failure".to_string(),
                ..Default::default()
            },
            ..Default::default()
        });
        initialize_spec(&mut obj, &config("v3")).unwrap();
        assert!(obj.driver_status().unwrap().last_update.error_message.is_empty());
    }
}
