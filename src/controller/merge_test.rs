//! Tests for list merging
//!
//! These tests verify the merge precedence rules:
//! - override entries replace defaults in place
//! - override-only entries are appended in order
//! - merging with an empty side is the identity
//! - secret reference patching

#[cfg(test)]
mod tests {
    use super::super::merge::*;
    use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, SecretKeySelector, Toleration};

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        }
    }

    fn secret_env(name: &str, key: &str, secret: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    key: key.to_string(),
                    name: Some(secret.to_string()),
                    optional: None,
                }),
                ..Default::default()
            }),
        }
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_override_replaces_in_place_and_appends() {
        let defaults = vec![env("A", "1"), env("B", "2"), env("C", "3")];
        let overrides = vec![env("D", "4"), env("B", "20")];

        let merged = merge_envs(&defaults, &overrides);
        let flat: Vec<(String, String)> = merged
            .iter()
            .map(|e| (e.name.clone(), e.value.clone().unwrap()))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("A".into(), "1".into()),
                ("B".into(), "20".into()),
                ("C".into(), "3".into()),
                ("D".into(), "4".into()),
            ]
        );
    }

    #[test]
    fn test_identity_cases() {
        let defaults = vec![env("A", "1"), env("B", "2")];
        assert_eq!(merge_envs(&defaults, &[]), defaults);
        assert_eq!(merge_envs(&[], &defaults), defaults);
    }

    #[test]
    fn test_override_keys_are_deduplicated() {
        let overrides = vec![env("A", "1"), env("A", "2")];
        let merged = merge_envs(&[], &overrides);
        assert_eq!(merged, vec![env("A", "2")]);
    }

    #[test]
    fn test_args_keyed_by_name_before_equals() {
        let defaults = args(&["--v=5", "--timeout=120s", "--leader-election"]);
        let overrides = args(&["--timeout=180s", "--extra"]);
        assert_eq!(
            merge_args(&defaults, &overrides),
            args(&["--v=5", "--timeout=180s", "--leader-election", "--extra"])
        );
    }

    #[test]
    fn test_tolerations_merge_by_equality() {
        let master = Toleration {
            key: Some("node-role.kubernetes.io/master".into()),
            operator: Some("Exists".into()),
            effect: Some("NoSchedule".into()),
            ..Default::default()
        };
        let custom = Toleration {
            key: Some("dedicated".into()),
            value: Some("storage".into()),
            ..Default::default()
        };
        let merged = merge_tolerations(&[master.clone()], &[master.clone(), custom.clone()]);
        assert_eq!(merged, vec![master, custom]);
    }

    #[test]
    fn test_patch_secret_refs() {
        let mut envs = vec![
            secret_env("USER", "username", "powermax-creds"),
            secret_env("PASS", "password", "powermax-creds"),
            secret_env("OTHER", "token", "other"),
            env("PLAIN", "x"),
        ];
        patch_secret_refs(&mut envs, &["USER", "PASS", "PLAIN"], "my-creds");

        let name_of = |e: &EnvVar| {
            e.value_from
                .as_ref()
                .and_then(|v| v.secret_key_ref.as_ref())
                .and_then(|s| s.name.clone())
        };
        assert_eq!(name_of(&envs[0]).as_deref(), Some("my-creds"));
        assert_eq!(name_of(&envs[1]).as_deref(), Some("my-creds"));
        assert_eq!(name_of(&envs[2]).as_deref(), Some("other"));
        assert_eq!(envs[3].value.as_deref(), Some("x"));
    }

    #[test]
    fn test_set_env() {
        let mut envs = vec![env("A", "1")];
        set_env(&mut envs, "A", "2");
        set_env(&mut envs, "B", "3");
        assert_eq!(env_value(&envs, "A"), Some("2"));
        assert_eq!(env_value(&envs, "B"), Some("3"));
        assert_eq!(envs.len(), 2);
    }
}
