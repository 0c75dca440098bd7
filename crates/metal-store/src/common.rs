//! Common utilities for object store backends
//!
//! List filtering lives here so the kube-backed and in-memory stores evaluate
//! field indexes the same way. Label selection belongs to the caller
//! (`crds::LabelSelector`).

use serde_json::Value;

/// Field equality used as an index lookup (e.g. `spec.serverRef.name`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelector {
    /// Dot-separated JSON path
    pub path: String,
    /// Expected string value
    pub value: String,
}

/// Filters for `list`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Field index lookup
    pub field: Option<FieldSelector>,
}

impl ListOptions {
    /// Restrict to objects whose `path` equals `value`
    #[must_use]
    pub fn field(mut self, path: &str, value: &str) -> Self {
        self.field = Some(FieldSelector {
            path: path.to_string(),
            value: value.to_string(),
        });
        self
    }

    /// Whether an object passes the field filter
    pub fn matches(&self, object: &Value) -> bool {
        match &self.field {
            Some(field) => field_matches(object, &field.path, &field.value),
            None => true,
        }
    }
}

/// Compare the string at a dot-separated path with `expected`
pub fn field_matches(object: &Value, path: &str, expected: &str) -> bool {
    let pointer = format!("/{}", path.replace('.', "/"));
    object.pointer(&pointer).and_then(Value::as_str) == Some(expected)
}

/// Apply an RFC 7386 JSON merge patch in place
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_patch_replaces_and_removes() {
        let mut target = json!({
            "metadata": {"annotations": {"a": "1", "b": "2"}},
            "spec": {"power": "On", "items": [1, 2]}
        });
        merge_patch(
            &mut target,
            &json!({
                "metadata": {"annotations": {"a": null, "c": "3"}},
                "spec": {"items": [3]}
            }),
        );
        assert_eq!(
            target,
            json!({
                "metadata": {"annotations": {"b": "2", "c": "3"}},
                "spec": {"power": "On", "items": [3]}
            })
        );
    }

    #[test]
    fn test_field_matches_nested_path() {
        let object = json!({"spec": {"serverRef": {"name": "server-1"}}});
        assert!(field_matches(&object, "spec.serverRef.name", "server-1"));
        assert!(!field_matches(&object, "spec.serverRef.name", "server-2"));
        assert!(!field_matches(&object, "spec.bmcRef.name", "server-1"));
    }

    #[test]
    fn test_list_options_field_filter() {
        let object = json!({
            "metadata": {"labels": {"env": "prod"}},
            "spec": {"bmcRef": {"name": "bmc-a"}}
        });
        assert!(ListOptions::default().matches(&object));
        assert!(ListOptions::default().field("spec.bmcRef.name", "bmc-a").matches(&object));
        assert!(!ListOptions::default().field("spec.bmcRef.name", "bmc-b").matches(&object));
    }
}
