//! Test utilities for unit testing reconcilers
//!
//! [`TestEnv`] wires a [`Reconciler`] to an in-memory store and a mock BMC.
//! [`TestEnv::reconcile_all`] plays one round of every controller plus the
//! parts of the system that live outside this crate: servers report the
//! state their references imply and the power their spec asks for, and boot
//! configurations become ready.

use crate::config::OperatorConfig;
use crate::reconciler::Reconciler;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use crds::*;
use kube::Resource;
use metal_store::{ListOptions, MockObjectStore, ObjectStore, Store};
use redfish_client::MockRedfishClient;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Namespace maintenances and claims live in during tests
pub const TEST_NAMESPACE: &str = "default";
/// BMCSecret every test BMC points at
pub const TEST_SECRET: &str = "bmc-secret";
/// Upper bound of rounds for [`TestEnv::converge`]
pub const MAX_ROUNDS: usize = 40;

/// Short intervals so nothing in a test depends on wall-clock waits
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        manager_namespace: TEST_NAMESPACE.to_string(),
        power_poll_interval: Duration::from_millis(10),
        task_poll_interval: Duration::from_millis(10),
        version_poll_interval: Duration::from_millis(10),
        approval_poll_interval: Duration::from_millis(10),
        bmc_reset_backoff_min: Duration::from_millis(10),
        bmc_reset_backoff_max: Duration::from_millis(50),
        ..OperatorConfig::default()
    }
}

/// Reconciler over a mock store and a mock BMC
pub struct TestEnv {
    pub store: Arc<MockObjectStore>,
    pub redfish: Arc<MockRedfishClient>,
    pub reconciler: Reconciler,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OperatorConfig) -> Self {
        let store = Arc::new(MockObjectStore::new());
        let redfish = Arc::new(MockRedfishClient::new());
        let backend: Arc<dyn ObjectStore> = store.clone();
        let reconciler = Reconciler::new(backend, redfish.clone(), config);
        Self {
            store,
            redfish,
            reconciler,
        }
    }

    /// Typed handle on the mock store
    pub fn objects<K>(&self) -> Store<K>
    where
        K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
    {
        let backend: Arc<dyn ObjectStore> = self.store.clone();
        Store::all(backend)
    }

    pub async fn list<K>(&self) -> Vec<K>
    where
        K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
    {
        self.objects::<K>().list(&ListOptions::default()).await.expect("list")
    }

    pub async fn get<K>(&self, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
    {
        self.objects::<K>().get_opt(name).await.expect("get")
    }

    pub async fn maintenance(&self, name: &str) -> Option<ServerMaintenance> {
        self.objects::<ServerMaintenance>()
            .within(TEST_NAMESPACE)
            .get_opt(name)
            .await
            .expect("get maintenance")
    }

    pub async fn create<K>(&self, object: K) -> K
    where
        K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
    {
        self.objects::<K>().create(&object).await.expect("create")
    }

    pub async fn create_secret(&self) -> BMCSecret {
        let data = BTreeMap::from([
            (BMC_SECRET_USERNAME_KEY.to_string(), STANDARD.encode("admin")),
            (BMC_SECRET_PASSWORD_KEY.to_string(), STANDARD.encode("adminpass")),
        ]);
        self.create(BMCSecret::new(TEST_SECRET, BMCSecretSpec { data })).await
    }

    /// BMC at `address`, creating the shared secret on first use
    pub async fn create_bmc(&self, name: &str, address: &str, labels: &[(&str, &str)]) -> BMC {
        if self.get::<BMCSecret>(TEST_SECRET).await.is_none() {
            self.create_secret().await;
        }
        let mut bmc = BMC::new(
            name,
            BMCSpec {
                endpoint: BMCEndpointSpec {
                    address: address.to_string(),
                    port: None,
                },
                bmc_secret_ref: LocalObjectReference::new(TEST_SECRET),
                bmc_settings_ref: None,
            },
        );
        bmc.metadata.labels = Some(to_labels(labels));
        self.create(bmc).await
    }

    /// Powered-off, available server managed by `bmc`
    pub async fn create_server(&self, name: &str, uuid: &str, bmc: &str, labels: &[(&str, &str)]) -> Server {
        let mut server = Server::new(
            name,
            ServerSpec {
                uuid: uuid.to_string(),
                bmc_ref: Some(LocalObjectReference::new(bmc)),
                ..Default::default()
            },
        );
        server.metadata.labels = Some(to_labels(labels));
        self.create(server).await;
        self.objects::<Server>()
            .patch_status(name, &json!({ "status": { "state": "Available", "powerState": "Off" } }))
            .await
            .expect("server status")
    }

    /// Claim `server` so it reports `Reserved`
    pub async fn claim_server(&self, server: &str, claim: &str) -> ServerClaim {
        let mut object = ServerClaim::new(
            claim,
            ServerClaimSpec {
                power: Power::On,
                server_ref: Some(LocalObjectReference::new(server)),
                image: None,
            },
        );
        object.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        let created = self
            .objects::<ServerClaim>()
            .within(TEST_NAMESPACE)
            .create(&object)
            .await
            .expect("create claim");
        self.objects::<Server>()
            .patch(
                server,
                &json!({ "spec": { "serverClaimRef": ObjectReference::to_object(&created) } }),
            )
            .await
            .expect("claim server");
        self.simulate().await;
        created
    }

    /// Set an annotation on a claim (approval and the like)
    pub async fn annotate_claim(&self, claim: &str, key: &str, value: &str) {
        self.objects::<ServerClaim>()
            .within(TEST_NAMESPACE)
            .patch(claim, &json!({ "metadata": { "annotations": { key: value } } }))
            .await
            .expect("annotate claim");
    }

    /// Set an annotation on a cluster-scoped object
    pub async fn annotate<K>(&self, name: &str, key: &str, value: &str)
    where
        K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
    {
        self.objects::<K>()
            .patch(name, &json!({ "metadata": { "annotations": { key: value } } }))
            .await
            .expect("annotate");
    }

    /// What the server agent and boot operator would do between two rounds
    pub async fn simulate(&self) {
        for server in self.list::<Server>().await {
            let name = server.metadata.name.clone().unwrap_or_default();
            let state = if server.spec.maintenance_ref.is_some() {
                ServerState::Maintenance
            } else if server.spec.server_claim_ref.is_some() {
                ServerState::Reserved
            } else {
                ServerState::Available
            };
            let power_state = match server.spec.power {
                Some(Power::On) => {
                    self.redfish.power_on(&server.spec.uuid);
                    ServerPowerState::On
                }
                Some(Power::Off) => {
                    self.redfish.power_off(&server.spec.uuid);
                    ServerPowerState::Off
                }
                None => server.power_state().unwrap_or(ServerPowerState::Off),
            };
            if server.state() != state || server.power_state() != Some(power_state) {
                self.objects::<Server>()
                    .patch_status(&name, &json!({ "status": { "state": state, "powerState": power_state } }))
                    .await
                    .expect("server status");
            }
        }

        for config in self.list::<ServerBootConfiguration>().await {
            if config.status.as_ref().and_then(|s| s.state) == Some(ServerBootConfigurationState::Ready) {
                continue;
            }
            let namespace = config.metadata.namespace.clone().unwrap_or_default();
            let name = config.metadata.name.clone().unwrap_or_default();
            self.objects::<ServerBootConfiguration>()
                .within(&namespace)
                .patch_status(&name, &json!({ "status": { "state": "Ready" } }))
                .await
                .expect("boot config status");
        }
    }

    /// One round of every controller; returns the errors it ran into
    pub async fn reconcile_all(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let r = &self.reconciler;
        self.simulate().await;

        for m in self.list::<ServerMaintenance>().await {
            record(&mut errors, "ServerMaintenance", r.reconcile_server_maintenance(&m).await);
        }
        self.simulate().await;
        for s in self.list::<BIOSSettings>().await {
            record(&mut errors, "BIOSSettings", r.reconcile_bios_settings(&s).await);
        }
        for v in self.list::<BIOSVersion>().await {
            record(&mut errors, "BIOSVersion", r.reconcile_bios_version(&v).await);
        }
        for s in self.list::<BMCSettings>().await {
            record(&mut errors, "BMCSettings", r.reconcile_bmc_settings(&s).await);
        }
        for v in self.list::<BMCVersion>().await {
            record(&mut errors, "BMCVersion", r.reconcile_bmc_version(&v).await);
        }
        for b in self.list::<BMC>().await {
            record(&mut errors, "BMC", r.reconcile_bmc(&b).await);
        }
        for s in self.list::<BIOSSettingsSet>().await {
            record(&mut errors, "BIOSSettingsSet", r.reconcile_bios_settings_set(&s).await);
        }
        for s in self.list::<BIOSVersionSet>().await {
            record(&mut errors, "BIOSVersionSet", r.reconcile_bios_version_set(&s).await);
        }
        for s in self.list::<BMCSettingsSet>().await {
            record(&mut errors, "BMCSettingsSet", r.reconcile_bmc_settings_set(&s).await);
        }
        for s in self.list::<BMCVersionSet>().await {
            record(&mut errors, "BMCVersionSet", r.reconcile_bmc_version_set(&s).await);
        }
        errors
    }

    /// Run rounds until nothing is written any more
    pub async fn converge(&self) {
        for _ in 0..MAX_ROUNDS {
            let before = self.store.write_count();
            self.reconcile_all().await;
            if self.store.write_count() == before {
                return;
            }
        }
    }

    /// Run rounds until `done` holds for the object `name`; returns it
    pub async fn run_until<K, F>(&self, name: &str, done: F) -> K
    where
        K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + std::fmt::Debug,
        F: Fn(&K) -> bool,
    {
        for _ in 0..MAX_ROUNDS {
            self.reconcile_all().await;
            if let Some(object) = self.get::<K>(name).await {
                if done(&object) {
                    return object;
                }
            }
        }
        panic!("{} {} did not reach the expected state: {:?}", K::kind(&()), name, self.get::<K>(name).await);
    }
}

fn record(errors: &mut Vec<String>, kind: &str, result: Result<kube_runtime::controller::Action, crate::error::ControllerError>) {
    if let Err(e) = result {
        errors.push(format!("{kind}: {e}"));
    }
}

pub fn to_labels(labels: &[(&str, &str)]) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Condition types in recording order
pub fn condition_types(conditions: &[Condition]) -> Vec<String> {
    conditions.iter().map(|c| c.r#type.clone()).collect()
}

/// Settings flow from `(priority, [(key, value)])` pairs
pub fn flow_of(steps: &[(i32, &[(&str, &str)])]) -> Vec<SettingsFlowItem> {
    steps
        .iter()
        .map(|(priority, settings)| SettingsFlowItem {
            name: Some(format!("step-{priority}")),
            priority: *priority,
            settings: to_labels(settings),
        })
        .collect()
}

/// BIOSSettings for `server` at the mock's default BIOS version
pub fn bios_settings(name: &str, server: &str, flow: Vec<SettingsFlowItem>) -> BIOSSettings {
    BIOSSettings::new(
        name,
        BIOSSettingsSpec {
            server_ref: Some(LocalObjectReference::new(server)),
            version: redfish_client::mock::DEFAULT_BIOS_VERSION.to_string(),
            settings_flow: flow,
            ..Default::default()
        },
    )
}
