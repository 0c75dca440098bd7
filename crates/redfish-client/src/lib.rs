//! Redfish Capability Facade
//!
//! The small slice of the Redfish API the firmware controllers need: BIOS and
//! BMC attributes, firmware versions, SimpleUpdate tasks and system/manager
//! resets. Every call names the BMC it talks to through a [`BmcEndpoint`];
//! system-scoped calls additionally carry the system UUID.
//!
//! # Example
//!
//! ```no_run
//! use redfish_client::{BmcEndpoint, RedfishClient, RedfishClientTrait};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RedfishClient::new(Duration::from_secs(30), true)?;
//! let bmc = BmcEndpoint {
//!     address: "10.0.0.10".to_string(),
//!     port: None,
//!     username: "admin".to_string(),
//!     password: "secret".to_string(),
//! };
//!
//! let version = client
//!     .get_bios_version(&bmc, "38947555-7742-3448-3784-823347823834")
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! [`RedfishError`] separates `NotFound`, `Transient`, `TaskInProgress` and
//! `Fatal` so callers can requeue on the transient kinds and fail otherwise.

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod redfish_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::RedfishClient;
pub use common::HttpClient;
pub use error::RedfishError;
pub use models::*;
pub use redfish_trait::RedfishClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockFailure, MockRedfishClient};
