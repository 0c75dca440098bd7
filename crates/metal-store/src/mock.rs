//! In-memory object store for unit testing
//!
//! Behaves like a small API server: assigns uids and resource versions, bumps
//! `metadata.generation` on spec changes, rejects stale replaces, keeps status
//! behind its own subresource, blocks deletion on finalizers and cascades
//! deletion to owned objects. Every successful write is counted so tests can
//! assert that a reconcile pass wrote nothing.

use crate::common::{merge_patch, ListOptions};
use crate::error::StoreError;
use crate::store_trait::ObjectStore;
use chrono::{SecondsFormat, Utc};
use kube::core::ApiResource;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ObjectKey = (String, Option<String>, String);

#[derive(Debug, Default)]
struct MockState {
    objects: BTreeMap<ObjectKey, Value>,
    resource_version: u64,
    writes: u64,
}

/// Mock object store for testing
#[derive(Debug, Clone, Default)]
pub struct MockObjectStore {
    state: Arc<Mutex<MockState>>,
}

fn kind_key(resource: &ApiResource) -> String {
    format!("{}/{}", resource.api_version, resource.kind)
}

fn describe(resource: &ApiResource, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{} {}/{}", resource.kind, ns, name),
        None => format!("{} {}", resource.kind, name),
    }
}

fn metadata_mut(object: &mut Value) -> Result<&mut Map<String, Value>, StoreError> {
    let Value::Object(map) = object else {
        return Err(StoreError::Invalid("object is not a JSON map".to_string()));
    };
    let meta = map
        .entry("metadata".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    meta.as_object_mut()
        .ok_or_else(|| StoreError::Invalid("metadata is not a JSON map".to_string()))
}

fn meta_str<'a>(object: &'a Value, field: &str) -> Option<&'a str> {
    object.pointer(&format!("/metadata/{field}")).and_then(Value::as_str)
}

fn has_finalizers(object: &Value) -> bool {
    object
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

fn is_deleting(object: &Value) -> bool {
    object
        .pointer("/metadata/deletionTimestamp")
        .is_some_and(|t| !t.is_null())
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl MockState {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    /// Store a written object, dropping it when its deletion is unblocked
    fn commit(&mut self, key: ObjectKey, object: Value) {
        self.writes += 1;
        if is_deleting(&object) && !has_finalizers(&object) {
            let uid = meta_str(&object, "uid").map(str::to_string);
            self.objects.remove(&key);
            if let Some(uid) = uid {
                self.cascade(&uid);
            }
        } else {
            self.objects.insert(key, object);
        }
    }

    fn delete_key(&mut self, key: &ObjectKey) {
        let Some(mut object) = self.objects.get(key).cloned() else {
            return;
        };
        if has_finalizers(&object) {
            if is_deleting(&object) {
                return;
            }
            let rv = self.next_resource_version();
            if let Ok(meta) = metadata_mut(&mut object) {
                meta.insert("deletionTimestamp".to_string(), Value::String(now()));
                meta.insert("resourceVersion".to_string(), Value::String(rv));
            }
            self.objects.insert(key.clone(), object);
            return;
        }
        let uid = meta_str(&object, "uid").map(str::to_string);
        self.objects.remove(key);
        if let Some(uid) = uid {
            self.cascade(&uid);
        }
    }

    /// Delete every object owned by `owner_uid`
    fn cascade(&mut self, owner_uid: &str) {
        let owned: Vec<ObjectKey> = self
            .objects
            .iter()
            .filter(|(_, object)| {
                object
                    .pointer("/metadata/ownerReferences")
                    .and_then(Value::as_array)
                    .is_some_and(|refs| {
                        refs.iter()
                            .any(|r| r.get("uid").and_then(Value::as_str) == Some(owner_uid))
                    })
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in owned {
            self.delete_key(&key);
        }
    }

    /// Carry identity fields over from the stored object and bump versions
    fn prepare_update(&mut self, existing: &Value, updated: &mut Value) -> Result<(), StoreError> {
        let spec_changed = existing.get("spec") != updated.get("spec");
        let generation = existing
            .pointer("/metadata/generation")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let rv = self.next_resource_version();
        let meta = metadata_mut(updated)?;
        for field in ["uid", "creationTimestamp", "deletionTimestamp", "name", "namespace"] {
            match existing.pointer(&format!("/metadata/{field}")) {
                Some(value) => {
                    meta.insert(field.to_string(), value.clone());
                }
                None => {
                    meta.remove(field);
                }
            }
        }
        meta.insert("resourceVersion".to_string(), Value::String(rv));
        let generation = if spec_changed { generation + 1 } else { generation };
        meta.insert("generation".to_string(), Value::from(generation));
        Ok(())
    }
}

impl MockObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// Number of stored objects of a kind (all namespaces)
    pub fn count(&self, resource: &ApiResource) -> usize {
        let kind = kind_key(resource);
        self.lock()
            .objects
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MockObjectStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>, StoreError> {
        let key = (kind_key(resource), namespace.map(str::to_string), name.to_string());
        Ok(self.lock().objects.get(&key).cloned())
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<Vec<Value>, StoreError> {
        let kind = kind_key(resource);
        Ok(self
            .lock()
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && (namespace.is_none() || ns.as_deref() == namespace))
            .filter(|(_, object)| options.matches(object))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        mut object: Value,
    ) -> Result<Value, StoreError> {
        let mut state = self.lock();
        let kind = kind_key(resource);
        let namespace = namespace
            .map(str::to_string)
            .or_else(|| meta_str(&object, "namespace").map(str::to_string));

        let name = match meta_str(&object, "name") {
            Some(name) => name.to_string(),
            None => {
                let prefix = meta_str(&object, "generateName")
                    .ok_or_else(|| {
                        StoreError::Invalid(format!("{} needs name or generateName", resource.kind))
                    })?
                    .to_string();
                loop {
                    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(5).collect();
                    let candidate = format!("{prefix}{suffix}");
                    if !state
                        .objects
                        .contains_key(&(kind.clone(), namespace.clone(), candidate.clone()))
                    {
                        break candidate;
                    }
                }
            }
        };

        let key = (kind, namespace.clone(), name.clone());
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(describe(resource, namespace.as_deref(), &name)));
        }

        let rv = state.next_resource_version();
        if let Value::Object(map) = &mut object {
            map.remove("status");
            map.insert("apiVersion".to_string(), Value::String(resource.api_version.clone()));
            map.insert("kind".to_string(), Value::String(resource.kind.clone()));
        }
        let meta = metadata_mut(&mut object)?;
        meta.insert("name".to_string(), Value::String(name));
        if let Some(ns) = &namespace {
            meta.insert("namespace".to_string(), Value::String(ns.clone()));
        }
        meta.insert("uid".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
        meta.insert("resourceVersion".to_string(), Value::String(rv));
        meta.insert("generation".to_string(), Value::from(1));
        meta.insert("creationTimestamp".to_string(), Value::String(now()));
        meta.remove("deletionTimestamp");

        state.writes += 1;
        state.objects.insert(key, object.clone());
        Ok(object)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        mut object: Value,
    ) -> Result<Value, StoreError> {
        let mut state = self.lock();
        let key = (kind_key(resource), namespace.map(str::to_string), name.to_string());
        let existing = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(describe(resource, namespace, name)))?;

        if let Some(rv) = meta_str(&object, "resourceVersion") {
            if Some(rv) != meta_str(&existing, "resourceVersion") {
                return Err(StoreError::Conflict(format!(
                    "{} has been modified",
                    describe(resource, namespace, name)
                )));
            }
        }

        if let Value::Object(map) = &mut object {
            match existing.get("status") {
                Some(status) => map.insert("status".to_string(), status.clone()),
                None => map.remove("status"),
            };
            map.insert("apiVersion".to_string(), Value::String(resource.api_version.clone()));
            map.insert("kind".to_string(), Value::String(resource.kind.clone()));
        }
        state.prepare_update(&existing, &mut object)?;
        state.commit(key, object.clone());
        Ok(object)
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        mut patch: Value,
    ) -> Result<Value, StoreError> {
        let mut state = self.lock();
        let key = (kind_key(resource), namespace.map(str::to_string), name.to_string());
        let existing = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(describe(resource, namespace, name)))?;

        if let Value::Object(map) = &mut patch {
            map.remove("status");
        }
        let mut object = existing.clone();
        merge_patch(&mut object, &patch);
        state.prepare_update(&existing, &mut object)?;
        state.commit(key, object.clone());
        Ok(object)
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<Value, StoreError> {
        let mut state = self.lock();
        let key = (kind_key(resource), namespace.map(str::to_string), name.to_string());
        let mut object = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(describe(resource, namespace, name)))?;

        if let Some(status_patch) = patch.get("status") {
            if let Value::Object(map) = &mut object {
                let status = map
                    .entry("status".to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                merge_patch(status, status_patch);
            }
        }
        let rv = state.next_resource_version();
        metadata_mut(&mut object)?.insert("resourceVersion".to_string(), Value::String(rv));
        state.writes += 1;
        state.objects.insert(key, object.clone());
        Ok(object)
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let key = (kind_key(resource), namespace.map(str::to_string), name.to_string());
        if !state.objects.contains_key(&key) {
            return Err(StoreError::NotFound(describe(resource, namespace, name)));
        }
        state.writes += 1;
        state.delete_key(&key);
        Ok(())
    }
}
