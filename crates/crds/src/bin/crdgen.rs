//! Prints every CRD of this crate as a multi-document YAML stream.
//!
//! ```sh
//! cargo run -p crds --bin crdgen > config/crd/bases/metal.yaml
//! ```

use crds::*;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        Server::crd(),
        ServerClaim::crd(),
        ServerMaintenance::crd(),
        ServerBootConfiguration::crd(),
        BMC::crd(),
        BMCSecret::crd(),
        BIOSSettings::crd(),
        BIOSVersion::crd(),
        BMCSettings::crd(),
        BMCVersion::crd(),
        BIOSSettingsSet::crd(),
        BIOSVersionSet::crd(),
        BMCSettingsSet::crd(),
        BMCVersionSet::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
