//! Kubernetes-backed object store
//!
//! Every operation goes through `kube::Api<DynamicObject>` built from the
//! caller's `ApiResource`. Field-indexed lists are filtered client side
//! because CRD spec fields cannot be used as server-side field selectors.

use crate::common::ListOptions;
use crate::error::StoreError;
use crate::store_trait::ObjectStore;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::Client;
use serde_json::Value;
use tracing::debug;

/// Object store backed by a live API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Create a store over an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    fn describe(resource: &ApiResource, namespace: Option<&str>, name: &str) -> String {
        match namespace {
            Some(ns) => format!("{} {}/{}", resource.kind, ns, name),
            None => format!("{} {}", resource.kind, name),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>, StoreError> {
        let what = Self::describe(resource, namespace, name);
        let object = self
            .api(resource, namespace)
            .get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(e, &what))?;
        object.map(|o| serde_json::to_value(o).map_err(StoreError::from)).transpose()
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<Vec<Value>, StoreError> {
        let params = ListParams::default();
        let list = self
            .api(resource, namespace)
            .list(&params)
            .await
            .map_err(|e| StoreError::from_kube(e, &resource.kind))?;
        let mut objects = Vec::with_capacity(list.items.len());
        for item in list.items {
            let value = serde_json::to_value(item)?;
            if options.matches(&value) {
                objects.push(value);
            }
        }
        debug!("Listed {} {} objects", objects.len(), resource.kind);
        Ok(objects)
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: Value,
    ) -> Result<Value, StoreError> {
        let object: DynamicObject = serde_json::from_value(object)?;
        let what = Self::describe(
            resource,
            namespace,
            object
                .metadata
                .name
                .as_deref()
                .or(object.metadata.generate_name.as_deref())
                .unwrap_or_default(),
        );
        let created = self
            .api(resource, namespace)
            .create(&PostParams::default(), &object)
            .await
            .map_err(|e| StoreError::from_kube(e, &what))?;
        Ok(serde_json::to_value(created)?)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        object: Value,
    ) -> Result<Value, StoreError> {
        let object: DynamicObject = serde_json::from_value(object)?;
        let what = Self::describe(resource, namespace, name);
        let replaced = self
            .api(resource, namespace)
            .replace(name, &PostParams::default(), &object)
            .await
            .map_err(|e| StoreError::from_kube(e, &what))?;
        Ok(serde_json::to_value(replaced)?)
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<Value, StoreError> {
        let what = Self::describe(resource, namespace, name);
        let patched = self
            .api(resource, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &what))?;
        Ok(serde_json::to_value(patched)?)
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<Value, StoreError> {
        let what = Self::describe(resource, namespace, name);
        let patched = self
            .api(resource, namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &what))?;
        Ok(serde_json::to_value(patched)?)
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        let what = Self::describe(resource, namespace, name);
        self.api(resource, namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| StoreError::from_kube(e, &what))?;
        Ok(())
    }
}
