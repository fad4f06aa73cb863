//! Layering of user values over driver defaults
//!
//! Every merge follows one rule: an entry of the new list replaces the
//! source entry with the same key in place, and new-only entries are
//! appended in encounter order.

use k8s_openapi::api::core::v1::{EnvVar, Toleration, Volume, VolumeMount};

/// Merge `new` over `source`, matching entries with `same`
pub fn merge_by<T: Clone>(source: &[T], new: &[T], same: impl Fn(&T, &T) -> bool) -> Vec<T> {
    let mut merged: Vec<T> = source.to_vec();
    for item in new {
        match merged.iter_mut().find(|m| same(m, item)) {
            Some(existing) => *existing = item.clone(),
            None => merged.push(item.clone()),
        }
    }
    merged
}

pub fn merge_envs(source: &[EnvVar], new: &[EnvVar]) -> Vec<EnvVar> {
    merge_by(source, new, |a, b| a.name == b.name)
}

pub fn merge_volumes(source: &[Volume], new: &[Volume]) -> Vec<Volume> {
    merge_by(source, new, |a, b| a.name == b.name)
}

pub fn merge_volume_mounts(source: &[VolumeMount], new: &[VolumeMount]) -> Vec<VolumeMount> {
    merge_by(source, new, |a, b| a.name == b.name)
}

pub fn merge_tolerations(source: &[Toleration], new: &[Toleration]) -> Vec<Toleration> {
    merge_by(source, new, |a, b| a == b)
}

/// Argument name, the part before `=`
fn arg_name(arg: &str) -> &str {
    arg.split('=').next().unwrap_or(arg)
}

pub fn merge_args(source: &[String], new: &[String]) -> Vec<String> {
    merge_by(source, new, |a, b| arg_name(a) == arg_name(b))
}

/// Point the secret references of the named env vars at `secret_name`
///
/// Only env vars that already carry a `secretKeyRef` are touched.
pub fn patch_secret_refs(envs: &mut [EnvVar], env_names: &[&str], secret_name: &str) {
    for env in envs.iter_mut().filter(|e| env_names.contains(&e.name.as_str())) {
        if let Some(secret_ref) = env
            .value_from
            .as_mut()
            .and_then(|source| source.secret_key_ref.as_mut())
        {
            secret_ref.name = Some(secret_name.to_string());
        }
    }
}

/// Value of a plain env var
pub fn env_value<'a>(envs: &'a [EnvVar], name: &str) -> Option<&'a str> {
    envs.iter()
        .find(|e| e.name == name)
        .and_then(|e| e.value.as_deref())
}

/// Set a plain env var, appending it when missing
pub fn set_env(envs: &mut Vec<EnvVar>, name: &str, value: &str) {
    match envs.iter_mut().find(|e| e.name == name) {
        Some(env) => {
            env.value = Some(value.to_string());
            env.value_from = None;
        }
        None => envs.push(EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        }),
    }
}
