//! ObjectStore trait for mocking
//!
//! Objects travel as JSON so the trait stays dyn-compatible; the typed
//! [`Store`](crate::Store) wrapper converts to and from concrete kinds.

use crate::common::ListOptions;
use crate::error::StoreError;
use kube::core::ApiResource;
use serde_json::Value;

/// Trait for declarative object store operations
///
/// `namespace` is `None` for cluster-scoped kinds (and for listing across all
/// namespaces). All methods must be `Send` to work with Tokio's work-stealing
/// runtime.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get an object, `None` when it does not exist
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>, StoreError>;

    /// List objects matching `options`
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<Vec<Value>, StoreError>;

    /// Create an object (`metadata.generateName` is honoured)
    async fn create(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: Value,
    ) -> Result<Value, StoreError>;

    /// Full replace, checked against `metadata.resourceVersion`
    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        object: Value,
    ) -> Result<Value, StoreError>;

    /// JSON merge patch on metadata and spec
    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<Value, StoreError>;

    /// JSON merge patch on the status subresource
    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<Value, StoreError>;

    /// Delete (or mark for deletion while finalizers remain)
    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError>;
}
