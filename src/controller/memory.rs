//! In-memory cluster
//!
//! A [`ClusterStateClient`] that keeps objects as JSON in a map, assigns
//! uids and resource versions like the API server, and records every write.
//! Failures can be injected per verb and kind.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use kube::core::ErrorResponse;
use kube::{Resource, ResourceExt};
use serde_json::Value;

use super::client::{matches_labels, ClusterObject, ClusterStateClient};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Update,
    UpdateStatus,
    Delete,
}

/// One recorded write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Write {
    pub verb: Verb,
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug)]
struct Failure {
    verb: Verb,
    kind: String,
    message: String,
}

type ObjectKey = (String, String, String);

#[derive(Default)]
struct Store {
    objects: BTreeMap<ObjectKey, Value>,
    writes: Vec<Write>,
    failures: Vec<Failure>,
    next_uid: u64,
}

#[derive(Default)]
pub struct InMemoryCluster {
    store: Mutex<Store>,
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn key_for<K: ClusterObject>(namespace: Option<&str>, name: &str) -> ObjectKey {
    let namespace = if K::NAMESPACED {
        namespace.unwrap_or("default").to_string()
    } else {
        String::new()
    };
    (K::kind(&()).to_string(), namespace, name.to_string())
}

fn key_of<K: ClusterObject>(obj: &K) -> ObjectKey {
    key_for::<K>(obj.namespace().as_deref(), &obj.name_any())
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an object as-is, status included, without recording a write
    pub fn insert<K: ClusterObject>(&self, obj: K) {
        let mut store = self.lock();
        let mut obj = obj;
        if obj.meta().uid.is_none() {
            store.next_uid += 1;
            obj.meta_mut().uid = Some(format!("uid-{}", store.next_uid));
        }
        if K::NAMESPACED && obj.meta().namespace.is_none() {
            obj.meta_mut().namespace = Some("default".to_string());
        }
        if let Ok(value) = serde_json::to_value(&obj) {
            store.objects.insert(key_of(&obj), value);
        }
    }

    /// Current copy of an object
    pub fn object<K: ClusterObject>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        self.lock()
            .objects
            .get(&key_for::<K>(namespace, name))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Every stored object of a kind
    pub fn objects<K: ClusterObject>(&self) -> Vec<K> {
        let kind = K::kind(&()).to_string();
        self.lock()
            .objects
            .iter()
            .filter(|((k, _, _), _)| *k == kind)
            .filter_map(|(_, v)| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    pub fn writes(&self) -> Vec<Write> {
        self.lock().writes.clone()
    }

    /// Recorded writes of one verb against one kind
    pub fn writes_of<K: ClusterObject>(&self, verb: Verb) -> Vec<Write> {
        let kind = K::kind(&()).to_string();
        self.lock()
            .writes
            .iter()
            .filter(|w| w.verb == verb && w.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Make every `verb` against kind `K` fail with a 500 until cleared
    pub fn fail_on<K: ClusterObject>(&self, verb: Verb, message: &str) {
        self.lock().failures.push(Failure {
            verb,
            kind: K::kind(&()).to_string(),
            message: message.to_string(),
        });
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    fn check_failure(store: &Store, verb: Verb, kind: &str) -> Result<()> {
        match store
            .failures
            .iter()
            .find(|f| f.verb == verb && f.kind == kind)
        {
            Some(f) => Err(api_error(500, "InternalError", f.message.clone())),
            None => Ok(()),
        }
    }

    fn record(store: &mut Store, verb: Verb, key: &ObjectKey) {
        store.writes.push(Write {
            verb,
            kind: key.0.clone(),
            name: key.2.clone(),
        });
    }
}

fn bump_resource_version(value: &mut Value) {
    let next = value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert("resourceVersion".to_string(), Value::String(next.to_string()));
    }
}

fn set_metadata_field(value: &mut Value, field: &str, v: Value) {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert(field.to_string(), v);
    }
}

#[async_trait]
impl ClusterStateClient for InMemoryCluster {
    async fn get<K: ClusterObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        let store = self.lock();
        match store.objects.get(&key_for::<K>(namespace, name)) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    async fn list<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let store = self.lock();
        let mut items = Vec::new();
        for ((k, ns, _), value) in &store.objects {
            if *k != kind {
                continue;
            }
            if K::NAMESPACED {
                if let Some(wanted) = namespace {
                    if ns != wanted {
                        continue;
                    }
                }
            }
            let obj: K = serde_json::from_value(value.clone())?;
            if matches_labels(obj.meta().labels.as_ref(), labels) {
                items.push(obj);
            }
        }
        Ok(items)
    }

    async fn create<K: ClusterObject>(&self, obj: &K) -> Result<K> {
        let key = key_of(obj);
        let mut store = self.lock();
        Self::check_failure(&store, Verb::Create, &key.0)?;
        if store.objects.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} \"{}\" already exists", key.0, key.2),
            ));
        }
        let mut value = serde_json::to_value(obj)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("status");
        }
        store.next_uid += 1;
        let uid = format!("uid-{}", store.next_uid);
        set_metadata_field(&mut value, "uid", Value::String(uid));
        if K::NAMESPACED {
            set_metadata_field(&mut value, "namespace", Value::String(key.1.clone()));
        }
        bump_resource_version(&mut value);
        Self::record(&mut store, Verb::Create, &key);
        store.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn update<K: ClusterObject>(&self, obj: &K) -> Result<K> {
        let key = key_of(obj);
        let mut store = self.lock();
        Self::check_failure(&store, Verb::Update, &key.0)?;
        let existing = store.objects.get(&key).cloned().ok_or_else(|| {
            api_error(404, "NotFound", format!("{} \"{}\" not found", key.0, key.2))
        })?;
        let mut value = serde_json::to_value(obj)?;
        if let Some(map) = value.as_object_mut() {
            match existing.get("status") {
                Some(status) => {
                    map.insert("status".to_string(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        if let Some(uid) = existing.pointer("/metadata/uid").cloned() {
            set_metadata_field(&mut value, "uid", uid);
        }
        if let Some(rv) = existing.pointer("/metadata/resourceVersion").cloned() {
            set_metadata_field(&mut value, "resourceVersion", rv);
        }
        bump_resource_version(&mut value);
        Self::record(&mut store, Verb::Update, &key);
        store.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn delete<K: ClusterObject>(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        let key = key_for::<K>(namespace, name);
        let mut store = self.lock();
        Self::check_failure(&store, Verb::Delete, &key.0)?;
        if store.objects.remove(&key).is_some() {
            Self::record(&mut store, Verb::Delete, &key);
        }
        Ok(())
    }

    async fn update_status<K: ClusterObject>(&self, obj: &K) -> Result<K> {
        let key = key_of(obj);
        let mut store = self.lock();
        Self::check_failure(&store, Verb::UpdateStatus, &key.0)?;
        let mut existing = store.objects.get(&key).cloned().ok_or_else(|| {
            api_error(404, "NotFound", format!("{} \"{}\" not found", key.0, key.2))
        })?;
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        if let Some(map) = existing.as_object_mut() {
            map.insert("status".to_string(), status);
        }
        bump_resource_version(&mut existing);
        Self::record(&mut store, Verb::UpdateStatus, &key);
        store.objects.insert(key, existing.clone());
        Ok(serde_json::from_value(existing)?)
    }
}
