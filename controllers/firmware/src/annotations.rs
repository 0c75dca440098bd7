//! Operator annotations and event filtering.
//!
//! `operation` steers a single resource (`ignore`, `retry`, `force-reset`)
//! or a set's children (`ignore-child`, `ignore-child-and-self`).
//! `operation-propagated=ignore-child` marks an `ignore` that a parent set
//! wrote on a child, so it can be revoked without touching an `ignore` the
//! user put there directly.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};

/// Operation requested on a resource
pub const OPERATION_ANNOTATION: &str = "metal.ironcore.dev/operation";
/// Marker for operations written by a parent
pub const PROPAGATED_ANNOTATION: &str = "metal.ironcore.dev/operation-propagated";
/// Set on a claim while a maintenance waits for its server
pub const MAINTENANCE_NEEDED_ANNOTATION: &str = "metal.ironcore.dev/maintenance-needed";
/// Set on a claim by its owner to let a maintenance in
pub const MAINTENANCE_APPROVAL_ANNOTATION: &str = "metal.ironcore.dev/maintenance-approval";
/// Why a maintenance is requested (maintenance -> claim)
pub const MAINTENANCE_REASON_ANNOTATION: &str = "metal.ironcore.dev/maintenance-reason";

/// Skip the resource
pub const OPERATION_IGNORE: &str = "ignore";
/// Skip the children of a set
pub const OPERATION_IGNORE_CHILD: &str = "ignore-child";
/// Skip a set and its children
pub const OPERATION_IGNORE_CHILD_AND_SELF: &str = "ignore-child-and-self";
/// Leave `Failed` and try again
pub const OPERATION_RETRY: &str = "retry";
/// Alias of [`OPERATION_RETRY`]
pub const OPERATION_RETRY_FAILED: &str = "retry-failed";
/// Gracefully restart a BMC
pub const OPERATION_FORCE_RESET: &str = "force-reset";

fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations.as_ref()?.get(key).map(String::as_str)
}

/// Value of the operation annotation
pub fn operation(meta: &ObjectMeta) -> Option<&str> {
    annotation(meta, OPERATION_ANNOTATION)
}

/// Whether the resource itself must not be reconciled
pub fn should_ignore(meta: &ObjectMeta) -> bool {
    matches!(
        operation(meta),
        Some(OPERATION_IGNORE | OPERATION_IGNORE_CHILD_AND_SELF)
    )
}

/// Whether a set asks for its children to be ignored
pub fn ignores_children(meta: &ObjectMeta) -> bool {
    matches!(
        operation(meta),
        Some(OPERATION_IGNORE_CHILD | OPERATION_IGNORE_CHILD_AND_SELF)
    )
}

/// Whether a retry was requested
pub fn wants_retry(meta: &ObjectMeta) -> bool {
    matches!(operation(meta), Some(OPERATION_RETRY | OPERATION_RETRY_FAILED))
}

/// Whether a BMC reset was requested
pub fn wants_force_reset(meta: &ObjectMeta) -> bool {
    operation(meta) == Some(OPERATION_FORCE_RESET)
}

fn ignore_was_propagated(meta: &ObjectMeta) -> bool {
    annotation(meta, PROPAGATED_ANNOTATION) == Some(OPERATION_IGNORE_CHILD)
}

/// Merge patch removing the operation annotation
pub fn clear_operation_patch() -> Value {
    json!({ "metadata": { "annotations": { OPERATION_ANNOTATION: null } } })
}

/// Merge patch bringing a child's annotations in line with its parent's
/// ignore request, or `None` when the child is already consistent.
///
/// A user-set `ignore` (no propagated marker) is never added to or removed.
pub fn child_propagation_patch(parent: &ObjectMeta, child: &ObjectMeta) -> Option<Value> {
    let propagated = ignore_was_propagated(child);
    if ignores_children(parent) {
        if operation(child).is_some() {
            return None;
        }
        return Some(json!({
            "metadata": { "annotations": {
                OPERATION_ANNOTATION: OPERATION_IGNORE,
                PROPAGATED_ANNOTATION: OPERATION_IGNORE_CHILD,
            } }
        }));
    }
    if !propagated {
        return None;
    }
    let mut annotations = serde_json::Map::new();
    annotations.insert(PROPAGATED_ANNOTATION.to_string(), Value::Null);
    if operation(child) == Some(OPERATION_IGNORE) {
        annotations.insert(OPERATION_ANNOTATION.to_string(), Value::Null);
    }
    Some(json!({ "metadata": { "annotations": annotations } }))
}

/// Merge patch setting the maintenance handshake on a claim, or `None` when
/// the claim already carries it
pub fn claim_needs_maintenance_patch(claim: &ObjectMeta, reason: &str) -> Option<Value> {
    let needed = annotation(claim, MAINTENANCE_NEEDED_ANNOTATION) == Some("true");
    let same_reason = annotation(claim, MAINTENANCE_REASON_ANNOTATION).unwrap_or_default() == reason;
    if needed && same_reason {
        return None;
    }
    Some(json!({
        "metadata": { "annotations": {
            MAINTENANCE_NEEDED_ANNOTATION: "true",
            MAINTENANCE_REASON_ANNOTATION: reason,
        } }
    }))
}

/// Merge patch stripping the maintenance handshake from a claim, or `None`
/// when none of its annotations are present
pub fn claim_release_patch(claim: &ObjectMeta) -> Option<Value> {
    let keys = [
        MAINTENANCE_NEEDED_ANNOTATION,
        MAINTENANCE_APPROVAL_ANNOTATION,
        MAINTENANCE_REASON_ANNOTATION,
    ];
    if keys.iter().all(|key| annotation(claim, key).is_none()) {
        return None;
    }
    let annotations: serde_json::Map<String, Value> =
        keys.iter().map(|key| ((*key).to_string(), Value::Null)).collect();
    Some(json!({ "metadata": { "annotations": annotations } }))
}

/// Whether the claim owner approved a maintenance
pub fn maintenance_approved(claim: &ObjectMeta) -> bool {
    annotation(claim, MAINTENANCE_APPROVAL_ANNOTATION) == Some("true")
}

/// Reason annotation of a maintenance
pub fn maintenance_reason(meta: &ObjectMeta) -> &str {
    annotation(meta, MAINTENANCE_REASON_ANNOTATION).unwrap_or_default()
}

/// Objects a [`ChangeFilter`] tracks before it starts over
const CHANGE_FILTER_CAPACITY: usize = 4096;

/// Remembers the last relevant content of every object it has seen and
/// reports whether a new version differs in anything but annotations,
/// resourceVersion or managedFields.
///
/// Objects are forgotten once they carry a deletionTimestamp. Deletions that
/// skip it (no finalizer) are covered by clearing the map at capacity, which
/// costs one extra trigger per tracked object.
#[derive(Debug, Default)]
pub struct ChangeFilter {
    seen: Mutex<HashMap<String, u64>>,
}

impl ChangeFilter {
    /// Create an empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `object` is new or changed in a field that matters
    pub fn changed<K>(&self, object: &K) -> bool
    where
        K: Resource + Serialize,
    {
        let key = object
            .meta()
            .uid
            .clone()
            .or_else(|| object.meta().name.clone())
            .unwrap_or_default();
        if object.meta().deletion_timestamp.is_some() {
            self.seen.lock().unwrap_or_else(PoisonError::into_inner).remove(&key);
            return true;
        }
        let Ok(mut value) = serde_json::to_value(object) else {
            return true;
        };
        if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("annotations");
            meta.remove("resourceVersion");
            meta.remove("managedFields");
        }
        let mut hasher = DefaultHasher::new();
        value.to_string().hash(&mut hasher);
        let digest = hasher.finish();

        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.len() >= CHANGE_FILTER_CAPACITY && !seen.contains_key(&key) {
            seen.clear();
        }
        seen.insert(key, digest) != Some(digest)
    }

    /// Number of objects currently remembered
    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{BIOSSettings, BIOSSettingsSpec};
    use std::collections::BTreeMap;

    fn meta(pairs: &[(&str, &str)]) -> ObjectMeta {
        let annotations: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ObjectMeta {
            name: Some("obj".to_string()),
            annotations: Some(annotations),
            ..Default::default()
        }
    }

    #[test]
    fn test_ignore_variants() {
        assert!(should_ignore(&meta(&[(OPERATION_ANNOTATION, "ignore")])));
        assert!(should_ignore(&meta(&[(OPERATION_ANNOTATION, "ignore-child-and-self")])));
        assert!(!should_ignore(&meta(&[(OPERATION_ANNOTATION, "ignore-child")])));
        assert!(!should_ignore(&ObjectMeta::default()));

        assert!(ignores_children(&meta(&[(OPERATION_ANNOTATION, "ignore-child")])));
        assert!(!ignores_children(&meta(&[(OPERATION_ANNOTATION, "ignore")])));
    }

    #[test]
    fn test_retry_aliases() {
        assert!(wants_retry(&meta(&[(OPERATION_ANNOTATION, "retry")])));
        assert!(wants_retry(&meta(&[(OPERATION_ANNOTATION, "retry-failed")])));
        assert!(!wants_retry(&meta(&[(OPERATION_ANNOTATION, "ignore")])));
    }

    #[test]
    fn test_propagation_adds_marker_to_plain_child() {
        let parent = meta(&[(OPERATION_ANNOTATION, "ignore-child")]);
        let patch = child_propagation_patch(&parent, &ObjectMeta::default()).unwrap();
        assert_eq!(patch["metadata"]["annotations"][OPERATION_ANNOTATION], "ignore");
        assert_eq!(patch["metadata"]["annotations"][PROPAGATED_ANNOTATION], "ignore-child");

        let already = meta(&[
            (OPERATION_ANNOTATION, "ignore"),
            (PROPAGATED_ANNOTATION, "ignore-child"),
        ]);
        assert!(child_propagation_patch(&parent, &already).is_none());
    }

    #[test]
    fn test_propagation_revokes_only_propagated_ignore() {
        let parent = ObjectMeta::default();
        let propagated = meta(&[
            (OPERATION_ANNOTATION, "ignore"),
            (PROPAGATED_ANNOTATION, "ignore-child"),
        ]);
        let patch = child_propagation_patch(&parent, &propagated).unwrap();
        assert!(patch["metadata"]["annotations"][OPERATION_ANNOTATION].is_null());
        assert!(patch["metadata"]["annotations"][PROPAGATED_ANNOTATION].is_null());

        let user_ignored = meta(&[(OPERATION_ANNOTATION, "ignore")]);
        assert!(child_propagation_patch(&parent, &user_ignored).is_none());
    }

    #[test]
    fn test_claim_handshake_patches() {
        let claim = ObjectMeta::default();
        assert!(claim_needs_maintenance_patch(&claim, "bios update").is_some());
        assert!(claim_release_patch(&claim).is_none());

        let marked = meta(&[
            (MAINTENANCE_NEEDED_ANNOTATION, "true"),
            (MAINTENANCE_REASON_ANNOTATION, "bios update"),
        ]);
        assert!(claim_needs_maintenance_patch(&marked, "bios update").is_none());
        assert!(claim_needs_maintenance_patch(&marked, "bmc update").is_some());
        assert!(!maintenance_approved(&marked));

        let release = claim_release_patch(&marked).unwrap();
        let annotations = release["metadata"]["annotations"].as_object().unwrap();
        assert_eq!(annotations.len(), 3);
        assert!(annotations.values().all(Value::is_null));
    }

    #[test]
    fn test_change_filter_ignores_annotation_only_updates() {
        let filter = ChangeFilter::new();
        let mut settings = BIOSSettings::new(
            "bs",
            BIOSSettingsSpec {
                version: "1".to_string(),
                ..Default::default()
            },
        );
        settings.metadata.uid = Some("uid-1".to_string());
        assert!(filter.changed(&settings));
        assert!(!filter.changed(&settings));

        settings
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(OPERATION_ANNOTATION.to_string(), "ignore".to_string());
        settings.metadata.resource_version = Some("42".to_string());
        assert!(!filter.changed(&settings));

        settings.spec.version = "2".to_string();
        assert!(filter.changed(&settings));
    }

    #[test]
    fn test_change_filter_forgets_deleted_objects() {
        let filter = ChangeFilter::new();
        let mut settings = BIOSSettings::new("bs", BIOSSettingsSpec::default());
        settings.metadata.uid = Some("uid-1".to_string());
        assert!(filter.changed(&settings));
        assert_eq!(filter.tracked(), 1);

        settings.metadata = serde_json::from_value(json!({
            "name": "bs",
            "uid": "uid-1",
            "deletionTimestamp": "2026-01-01T00:00:00Z",
        }))
        .unwrap();
        assert!(filter.changed(&settings));
        assert_eq!(filter.tracked(), 0);
        assert!(filter.changed(&settings));
        assert_eq!(filter.tracked(), 0);
    }

    #[test]
    fn test_change_filter_stays_bounded() {
        let filter = ChangeFilter::new();
        for i in 0..=CHANGE_FILTER_CAPACITY {
            let mut settings = BIOSSettings::new(&format!("bs-{i}"), BIOSSettingsSpec::default());
            settings.metadata.uid = Some(format!("uid-{i}"));
            assert!(filter.changed(&settings));
        }
        assert!(filter.tracked() <= CHANGE_FILTER_CAPACITY);
    }
}
