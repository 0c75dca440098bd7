//! Typed access to an [`ObjectStore`]
//!
//! `Store<K>` plays the role `kube::Api<K>` plays for a live client: it knows
//! the kind's `ApiResource` and an optional namespace, and (de)serializes
//! objects on the way in and out.

use crate::common::ListOptions;
use crate::error::StoreError;
use crate::store_trait::ObjectStore;
use kube::core::ApiResource;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed handle for one kind, optionally scoped to a namespace
pub struct Store<K> {
    backend: Arc<dyn ObjectStore>,
    resource: ApiResource,
    namespace: Option<String>,
    kind: PhantomData<fn() -> K>,
}

impl<K> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            resource: self.resource.clone(),
            namespace: self.namespace.clone(),
            kind: PhantomData,
        }
    }
}

impl<K> fmt::Debug for Store<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("kind", &self.resource.kind)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl<K> Store<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Cluster-wide handle (cluster-scoped kinds, or every namespace)
    pub fn all(backend: Arc<dyn ObjectStore>) -> Self {
        Self {
            backend,
            resource: ApiResource::erase::<K>(&()),
            namespace: None,
            kind: PhantomData,
        }
    }

    /// Handle scoped to one namespace
    pub fn namespaced(backend: Arc<dyn ObjectStore>, namespace: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            ..Self::all(backend)
        }
    }

    /// Same backend, different namespace
    #[must_use]
    pub fn within(&self, namespace: &str) -> Self {
        Self::namespaced(Arc::clone(&self.backend), namespace)
    }

    /// Namespace this handle is scoped to
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn describe(&self, name: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{} {}/{}", self.resource.kind, ns, name),
            None => format!("{} {}", self.resource.kind, name),
        }
    }

    fn decode(value: Value) -> Result<K, StoreError> {
        Ok(serde_json::from_value(value)?)
    }

    fn encode(&self, object: &K) -> Result<Value, StoreError> {
        let mut value = serde_json::to_value(object)?;
        if let Value::Object(map) = &mut value {
            map.insert("apiVersion".to_string(), Value::String(self.resource.api_version.clone()));
            map.insert("kind".to_string(), Value::String(self.resource.kind.clone()));
        }
        Ok(value)
    }

    /// Namespace for a write: the object's own, else the handle's
    fn write_namespace<'a>(&'a self, object: &'a K) -> Option<&'a str> {
        object
            .meta()
            .namespace
            .as_deref()
            .or(self.namespace.as_deref())
    }

    /// Get an object, failing with `NotFound` when missing
    pub async fn get(&self, name: &str) -> Result<K, StoreError> {
        self.get_opt(name)
            .await?
            .ok_or_else(|| StoreError::NotFound(self.describe(name)))
    }

    /// Get an object, `None` when missing
    pub async fn get_opt(&self, name: &str) -> Result<Option<K>, StoreError> {
        self.backend
            .get(&self.resource, self.namespace.as_deref(), name)
            .await?
            .map(Self::decode)
            .transpose()
    }

    /// List objects matching `options`
    pub async fn list(&self, options: &ListOptions) -> Result<Vec<K>, StoreError> {
        self.backend
            .list(&self.resource, self.namespace.as_deref(), options)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    /// Create an object
    pub async fn create(&self, object: &K) -> Result<K, StoreError> {
        let value = self.encode(object)?;
        Self::decode(
            self.backend
                .create(&self.resource, self.write_namespace(object), value)
                .await?,
        )
    }

    /// Replace an object, checked against its resourceVersion
    pub async fn replace(&self, object: &K) -> Result<K, StoreError> {
        let name = object
            .meta()
            .name
            .clone()
            .ok_or_else(|| StoreError::Invalid(format!("{} without name", self.resource.kind)))?;
        let value = self.encode(object)?;
        Self::decode(
            self.backend
                .replace(&self.resource, self.write_namespace(object), &name, value)
                .await?,
        )
    }

    /// JSON merge patch on metadata/spec
    pub async fn patch(&self, name: &str, patch: &Value) -> Result<K, StoreError> {
        Self::decode(
            self.backend
                .patch(&self.resource, self.namespace.as_deref(), name, patch.clone())
                .await?,
        )
    }

    /// JSON merge patch on status
    pub async fn patch_status(&self, name: &str, patch: &Value) -> Result<K, StoreError> {
        Self::decode(
            self.backend
                .patch_status(&self.resource, self.namespace.as_deref(), name, patch.clone())
                .await?,
        )
    }

    /// Delete an object; a missing object is not an error
    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        match self
            .backend
            .delete(&self.resource, self.namespace.as_deref(), name)
            .await
        {
            Err(StoreError::NotFound(_)) => Ok(()),
            other => other,
        }
    }
}
