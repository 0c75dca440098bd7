//! Declarative Object Store Facade
//!
//! The firmware reconcilers talk to the cluster through this crate instead of
//! `kube::Api` directly, so the same reconcile code runs against a live API
//! server ([`KubeStore`]) and against an in-memory store in unit tests
//! (`MockObjectStore`, behind the `test-util` feature).
//!
//! # Example
//!
//! ```no_run
//! use crds::Server;
//! use metal_store::{KubeStore, ListOptions, Store};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let backend = Arc::new(KubeStore::new(client));
//!
//! let servers: Store<Server> = Store::all(backend);
//! let served = servers
//!     .list(&ListOptions::default().field("spec.bmcRef.name", "bmc-a"))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Semantics
//!
//! - `replace` is a full-object update checked against `metadata.resourceVersion`;
//!   a stale version yields [`StoreError::Conflict`]. It never touches status.
//! - `patch` applies a JSON merge patch to metadata and spec, `patch_status`
//!   to status only.
//! - `delete` only marks objects carrying finalizers (`deletionTimestamp`);
//!   they disappear once the last finalizer is removed.

pub mod common;
pub mod error;
pub mod kube_store;
#[path = "trait.rs"]
pub mod store_trait;
pub mod typed;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use common::{FieldSelector, ListOptions};
pub use error::StoreError;
pub use kube_store::KubeStore;
pub use store_trait::ObjectStore;
pub use typed::Store;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockObjectStore;
