//! Helpers shared by the reconcilers.
//!
//! Status writes go through [`patch_status_if_changed`], which turns the
//! difference between the status a pass started from and the status it ended
//! with into a JSON merge patch. A pass that changes nothing writes nothing,
//! which keeps a converged resource from re-triggering itself.

use crate::error::ControllerError;
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use metal_store::Store;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

/// Name of an object, or `MissingObjectKey`
pub fn name_of<K: Resource>(obj: &K) -> Result<&str, ControllerError> {
    obj.meta()
        .name
        .as_deref()
        .ok_or(ControllerError::MissingObjectKey("metadata.name"))
}

/// `namespace/name` for namespaced objects, `name` otherwise
pub fn object_key<K: Resource>(obj: &K) -> Result<String, ControllerError> {
    let name = name_of(obj)?;
    Ok(match obj.meta().namespace.as_deref() {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    })
}

/// Whether the object is marked for deletion
pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

/// Whether `finalizer` is present
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Add `finalizer` if missing; returns whether a write happened
pub async fn ensure_finalizer<K>(store: &Store<K>, obj: &K, finalizer: &str) -> Result<bool, ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    if has_finalizer(obj, finalizer) {
        return Ok(false);
    }
    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    store
        .patch(name_of(obj)?, &json!({ "metadata": { "finalizers": finalizers } }))
        .await?;
    debug!("Added finalizer {} to {}", finalizer, object_key(obj)?);
    Ok(true)
}

/// Remove `finalizer` if present
pub async fn remove_finalizer<K>(store: &Store<K>, obj: &K, finalizer: &str) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    if !has_finalizer(obj, finalizer) {
        return Ok(());
    }
    let finalizers: Vec<&String> = obj.finalizers().iter().filter(|f| *f != finalizer).collect();
    match store
        .patch(name_of(obj)?, &json!({ "metadata": { "finalizers": finalizers } }))
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Controller owner reference pointing at `owner`
pub fn controller_reference<K>(owner: &K) -> Result<OwnerReference, ControllerError>
where
    K: Resource<DynamicType = ()>,
{
    owner
        .controller_owner_ref(&())
        .ok_or(ControllerError::MissingObjectKey("metadata.uid"))
}

/// Whether `meta` names `owner` as its controller
pub fn is_controlled_by<K: Resource>(meta: &ObjectMeta, owner: &K) -> bool {
    let Some(uid) = owner.meta().uid.as_deref() else {
        return false;
    };
    meta.owner_references
        .iter()
        .flatten()
        .any(|r| r.controller == Some(true) && r.uid == uid)
}

/// RFC 7386 merge patch turning `current` into `desired`, `None` when equal
pub fn merge_diff(current: &Value, desired: &Value) -> Option<Value> {
    match (current, desired) {
        (Value::Object(current), Value::Object(desired)) => {
            let mut patch = Map::new();
            for (key, value) in desired {
                match current.get(key) {
                    Some(existing) => {
                        if let Some(inner) = merge_diff(existing, value) {
                            patch.insert(key.clone(), inner);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            for key in current.keys() {
                if !desired.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        _ if current == desired => None,
        _ => Some(desired.clone()),
    }
}

/// Write `after` as the object's status if it differs from `before`.
///
/// Returns whether a write happened.
pub async fn patch_status_if_changed<K, S>(
    store: &Store<K>,
    name: &str,
    before: Option<&S>,
    after: &S,
) -> Result<bool, ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
    S: Serialize,
{
    let before = match before {
        Some(status) => serde_json::to_value(status)?,
        None => Value::Object(Map::new()),
    };
    let after = serde_json::to_value(after)?;
    let Some(patch) = merge_diff(&before, &after) else {
        return Ok(false);
    };
    store.patch_status(name, &json!({ "status": patch })).await?;
    Ok(true)
}

/// Time since `since`, zero for timestamps in the future
pub fn elapsed_since(since: DateTime<Utc>) -> Duration {
    (Utc::now() - since).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
#[path = "reconcile_helpers_test.rs"]
mod reconcile_helpers_test;
