//! Object references between metal resources
//!
//! Two shapes are used: `LocalObjectReference` (name only, for cluster-scoped
//! targets such as Servers and BMCs) and `ObjectReference` (full reference with
//! optional namespace and uid, used where identity matters, e.g. the
//! maintenance lease on a Server).

use kube::Resource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a resource by name
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    /// Name of the referenced resource
    pub name: String,
}

impl LocalObjectReference {
    /// Create a reference to `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Full reference to a resource, optionally pinned to a uid
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referenced resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the referenced resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referenced resource
    pub name: String,

    /// Namespace of the referenced resource (unset for cluster-scoped kinds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// UID of the referenced resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ObjectReference {
    /// Reference a cluster-scoped resource by name only
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Reference a namespaced resource by namespace and name
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    /// Build a complete reference (kind, apiVersion, uid) to an existing object.
    ///
    /// Returns `None` when the object has no name yet.
    pub fn to_object<K>(obj: &K) -> Option<Self>
    where
        K: Resource<DynamicType = ()>,
    {
        let meta = obj.meta();
        Some(Self {
            api_version: Some(K::api_version(&()).into_owned()),
            kind: Some(K::kind(&()).into_owned()),
            name: meta.name.clone()?,
            namespace: meta.namespace.clone(),
            uid: meta.uid.clone(),
        })
    }

    /// Whether this reference points at `obj`.
    ///
    /// When both sides carry a uid the uids decide; otherwise name and
    /// namespace must match.
    pub fn refers_to<K>(&self, obj: &K) -> bool
    where
        K: Resource<DynamicType = ()>,
    {
        let meta = obj.meta();
        if let (Some(uid), Some(other)) = (&self.uid, &meta.uid) {
            return uid == other;
        }
        meta.name.as_deref() == Some(self.name.as_str())
            && meta.namespace.as_deref() == self.namespace.as_deref()
    }
}
