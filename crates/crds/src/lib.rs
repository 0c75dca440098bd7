//! Metal CRD Definitions
//!
//! Kubernetes Custom Resource Definitions consumed and produced by the firmware
//! controllers. All kinds live in the `metal.ironcore.dev/v1alpha1` API group.
//!
//! Cluster-scoped: `Server`, `BMC`, `BMCSecret`, the settings/version kinds and
//! their sets. Namespaced: `ServerMaintenance`, `ServerClaim`,
//! `ServerBootConfiguration`.

pub mod references;
pub mod condition;
pub mod selector;
pub mod server;
pub mod server_claim;
pub mod server_maintenance;
pub mod server_boot_configuration;
pub mod bmc;
pub mod bmc_secret;
pub mod bios_settings;
pub mod bios_version;
pub mod bmc_settings;
pub mod bmc_version;
pub mod set_status;
pub mod bios_settings_set;
pub mod bios_version_set;
pub mod bmc_settings_set;
pub mod bmc_version_set;

pub use references::*;
pub use condition::*;
pub use selector::*;
pub use server::*;
pub use server_claim::*;
pub use server_maintenance::*;
pub use server_boot_configuration::*;
pub use bmc::*;
pub use bmc_secret::*;
pub use bios_settings::*;
pub use bios_version::*;
pub use bmc_settings::*;
pub use bmc_version::*;
pub use set_status::*;
pub use bios_settings_set::*;
pub use bios_version_set::*;
pub use bmc_settings_set::*;
pub use bmc_version_set::*;

/// API group shared by every kind in this crate
pub const API_GROUP: &str = "metal.ironcore.dev";

/// API version shared by every kind in this crate
pub const API_VERSION: &str = "metal.ironcore.dev/v1alpha1";
