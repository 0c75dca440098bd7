//! Mock RedfishClient for unit testing
//!
//! Simulates BMCs in memory so reconcilers can be exercised without hardware:
//!
//! - BIOS attributes whose key contains `reboot` are staged and only take
//!   effect after a power cycle or a system reset; other keys apply at once.
//! - BMC attributes whose key contains `reset` are staged until a manager
//!   reset.
//! - Firmware images must be registered with [`MockRedfishClient::add_firmware_image`];
//!   upgrade tasks report `Running` for a configurable number of polls and the
//!   new version becomes visible after the next system (BIOS) or manager (BMC)
//!   reset.
//! - After a manager reset the manager is unreachable for a configurable
//!   number of calls.

use crate::error::RedfishError;
use crate::models::*;
use crate::redfish_trait::RedfishClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// BIOS version every simulated system starts with
pub const DEFAULT_BIOS_VERSION: &str = "P79 v1.45 (12/06/2017)";
/// BMC firmware every simulated manager starts with
pub const DEFAULT_BMC_VERSION: &str = "1.45.455b66-rev4";

/// Error kind injected with [`MockRedfishClient::fail_once`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    NotFound,
    Transient,
    TaskInProgress,
    Fatal,
}

impl MockFailure {
    fn into_error(self, operation: &str) -> RedfishError {
        let message = format!("injected failure in {operation}");
        match self {
            Self::NotFound => RedfishError::NotFound(message),
            Self::Transient => RedfishError::Transient(message),
            Self::TaskInProgress => RedfishError::TaskInProgress(message),
            Self::Fatal => RedfishError::Fatal(message),
        }
    }
}

#[derive(Debug, Clone)]
struct MockSystem {
    bios_version: String,
    attributes: Attributes,
    pending_attributes: Attributes,
    pending_version: Option<String>,
    powered_on: bool,
}

impl Default for MockSystem {
    fn default() -> Self {
        Self {
            bios_version: DEFAULT_BIOS_VERSION.to_string(),
            attributes: Attributes::from([
                ("abc".to_string(), "bar".to_string()),
                ("fooreboot".to_string(), "123".to_string()),
            ]),
            pending_attributes: Attributes::new(),
            pending_version: None,
            powered_on: false,
        }
    }
}

impl MockSystem {
    fn apply_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending_attributes);
        self.attributes.extend(pending);
        if let Some(version) = self.pending_version.take() {
            self.bios_version = version;
        }
    }
}

#[derive(Debug, Clone)]
struct MockManager {
    firmware_version: String,
    attributes: Attributes,
    pending_attributes: Attributes,
    pending_version: Option<String>,
    unreachable_for: u32,
}

impl Default for MockManager {
    fn default() -> Self {
        Self {
            firmware_version: DEFAULT_BMC_VERSION.to_string(),
            attributes: Attributes::from([
                ("abc".to_string(), "bar".to_string()),
                ("fooreset".to_string(), "1".to_string()),
            ]),
            pending_attributes: Attributes::new(),
            pending_version: None,
            unreachable_for: 0,
        }
    }
}

#[derive(Debug, Clone)]
enum TaskTarget {
    System(String),
    Manager(String),
}

#[derive(Debug, Clone)]
struct MockTask {
    target: TaskTarget,
    version: String,
    polls_left: u32,
    fail: bool,
    state: TaskState,
}

#[derive(Debug)]
struct MockState {
    systems: HashMap<String, MockSystem>,
    managers: HashMap<String, MockManager>,
    tasks: HashMap<String, MockTask>,
    images: HashMap<String, String>,
    failures: HashMap<String, MockFailure>,
    fail_next_task: bool,
    task_polls: u32,
    reset_unreachable_calls: u32,
    next_task: u64,
    calls: Vec<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            systems: HashMap::new(),
            managers: HashMap::new(),
            tasks: HashMap::new(),
            images: HashMap::new(),
            failures: HashMap::new(),
            fail_next_task: false,
            task_polls: 1,
            reset_unreachable_calls: 1,
            next_task: 1,
            calls: Vec::new(),
        }
    }
}

impl MockState {
    /// Record a call and surface an injected failure for it, if any
    fn enter(&mut self, operation: &str) -> Result<(), RedfishError> {
        self.calls.push(operation.to_string());
        match self.failures.remove(operation) {
            Some(failure) => Err(failure.into_error(operation)),
            None => Ok(()),
        }
    }

    fn system(&mut self, uuid: &str) -> &mut MockSystem {
        self.systems.entry(uuid.to_string()).or_default()
    }

    fn manager(&mut self, address: &str) -> &mut MockManager {
        self.managers.entry(address.to_string()).or_default()
    }

    /// Managers come back after a reset only after a few calls
    fn reachable_manager(&mut self, address: &str) -> Result<&mut MockManager, RedfishError> {
        let manager = self.manager(address);
        if manager.unreachable_for > 0 {
            manager.unreachable_for -= 1;
            return Err(RedfishError::Transient(format!("{address}: connection refused")));
        }
        Ok(manager)
    }

    fn create_task(&mut self, target: TaskTarget, image: &FirmwareImage) -> Result<String, RedfishError> {
        let version = self
            .images
            .get(&image.uri)
            .cloned()
            .ok_or_else(|| RedfishError::Fatal(format!("image {} could not be downloaded", image.uri)))?;
        let uri = format!("/redfish/v1/TaskService/Tasks/{}", self.next_task);
        self.next_task += 1;
        let fail = std::mem::take(&mut self.fail_next_task);
        self.tasks.insert(
            uri.clone(),
            MockTask {
                target,
                version,
                polls_left: self.task_polls,
                fail,
                state: TaskState::Running,
            },
        );
        Ok(uri)
    }
}

/// Mock RedfishClient for testing
#[derive(Debug, Clone, Default)]
pub struct MockRedfishClient {
    state: Arc<Mutex<MockState>>,
}

impl MockRedfishClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the BIOS version of a system (for test setup)
    pub fn set_bios_version(&self, system_uuid: &str, version: &str) {
        self.lock().system(system_uuid).bios_version = version.to_string();
    }

    /// Set one live BIOS attribute (for test setup)
    pub fn set_bios_attribute(&self, system_uuid: &str, key: &str, value: &str) {
        self.lock()
            .system(system_uuid)
            .attributes
            .insert(key.to_string(), value.to_string());
    }

    /// Live BIOS version
    pub fn bios_version(&self, system_uuid: &str) -> String {
        self.lock().system(system_uuid).bios_version.clone()
    }

    /// Live BIOS attributes
    pub fn bios_attributes(&self, system_uuid: &str) -> Attributes {
        self.lock().system(system_uuid).attributes.clone()
    }

    /// BIOS attributes staged until the next reboot
    pub fn pending_bios_attributes(&self, system_uuid: &str) -> Attributes {
        self.lock().system(system_uuid).pending_attributes.clone()
    }

    /// Set the firmware version of a BMC (for test setup)
    pub fn set_bmc_version(&self, address: &str, version: &str) {
        self.lock().manager(address).firmware_version = version.to_string();
    }

    /// Set one live BMC attribute (for test setup)
    pub fn set_bmc_attribute(&self, address: &str, key: &str, value: &str) {
        self.lock()
            .manager(address)
            .attributes
            .insert(key.to_string(), value.to_string());
    }

    /// Live BMC firmware version
    pub fn bmc_version(&self, address: &str) -> String {
        self.lock().manager(address).firmware_version.clone()
    }

    /// Live BMC attributes
    pub fn bmc_attributes(&self, address: &str) -> Attributes {
        self.lock().manager(address).attributes.clone()
    }

    /// Power a system on, completing a pending power cycle
    pub fn power_on(&self, system_uuid: &str) {
        let mut state = self.lock();
        let system = state.system(system_uuid);
        if !system.powered_on {
            system.apply_pending();
            system.powered_on = true;
        }
    }

    /// Power a system off
    pub fn power_off(&self, system_uuid: &str) {
        self.lock().system(system_uuid).powered_on = false;
    }

    /// Whether a system is powered
    pub fn is_powered_on(&self, system_uuid: &str) -> bool {
        self.lock().system(system_uuid).powered_on
    }

    /// Make `uri` installable, reporting `version` once applied
    pub fn add_firmware_image(&self, uri: &str, version: &str) {
        self.lock().images.insert(uri.to_string(), version.to_string());
    }

    /// Number of `Running` polls before a task settles
    pub fn set_task_polls(&self, polls: u32) {
        self.lock().task_polls = polls;
    }

    /// Number of calls a manager stays unreachable after a reset
    pub fn set_reset_unreachable_calls(&self, calls: u32) {
        self.lock().reset_unreachable_calls = calls;
    }

    /// Make the next upgrade task end in `Failed`
    pub fn fail_next_task(&self) {
        self.lock().fail_next_task = true;
    }

    /// Make the next call of `operation` (e.g. `"set_bios_attributes"`) fail
    pub fn fail_once(&self, operation: &str, failure: MockFailure) {
        self.lock().failures.insert(operation.to_string(), failure);
    }

    /// Names of all operations called so far
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// How often `operation` was called
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == operation).count()
    }
}

#[async_trait::async_trait]
impl RedfishClientTrait for MockRedfishClient {
    async fn get_bios_version(&self, _bmc: &BmcEndpoint, system_uuid: &str) -> Result<String, RedfishError> {
        let mut state = self.lock();
        state.enter("get_bios_version")?;
        Ok(state.system(system_uuid).bios_version.clone())
    }

    async fn get_bios_attributes(&self, _bmc: &BmcEndpoint, system_uuid: &str) -> Result<Attributes, RedfishError> {
        let mut state = self.lock();
        state.enter("get_bios_attributes")?;
        Ok(state.system(system_uuid).attributes.clone())
    }

    async fn requires_reboot(&self, _bmc: &BmcEndpoint, _system_uuid: &str, attributes: &Attributes) -> Result<bool, RedfishError> {
        self.lock().enter("requires_reboot")?;
        Ok(attributes.keys().any(|k| k.contains("reboot")))
    }

    async fn set_bios_attributes(&self, _bmc: &BmcEndpoint, system_uuid: &str, attributes: &Attributes) -> Result<(), RedfishError> {
        let mut state = self.lock();
        state.enter("set_bios_attributes")?;
        let system = state.system(system_uuid);
        for (key, value) in attributes {
            if key.contains("reboot") {
                system.pending_attributes.insert(key.clone(), value.clone());
            } else {
                system.attributes.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn upgrade_bios(&self, _bmc: &BmcEndpoint, system_uuid: &str, image: &FirmwareImage) -> Result<String, RedfishError> {
        let mut state = self.lock();
        state.enter("upgrade_bios")?;
        state.create_task(TaskTarget::System(system_uuid.to_string()), image)
    }

    async fn reset_system(&self, _bmc: &BmcEndpoint, system_uuid: &str, reset: ResetType) -> Result<(), RedfishError> {
        let mut state = self.lock();
        state.enter("reset_system")?;
        let system = state.system(system_uuid);
        match reset {
            ResetType::ForceOff | ResetType::GracefulShutdown => system.powered_on = false,
            ResetType::On => {
                if !system.powered_on {
                    system.apply_pending();
                }
                system.powered_on = true;
            }
            ResetType::GracefulRestart | ResetType::ForceRestart | ResetType::PowerCycle => {
                system.apply_pending();
                system.powered_on = true;
            }
        }
        Ok(())
    }

    async fn get_task(&self, _bmc: &BmcEndpoint, task_uri: &str) -> Result<TaskInfo, RedfishError> {
        let mut state = self.lock();
        state.enter("get_task")?;
        let task = state
            .tasks
            .get_mut(task_uri)
            .ok_or_else(|| RedfishError::NotFound(format!("task {task_uri}")))?;

        let settled = if task.state == TaskState::Running {
            if task.polls_left > 0 {
                task.polls_left -= 1;
                None
            } else if task.fail {
                task.state = TaskState::Failed;
                None
            } else {
                task.state = TaskState::Completed;
                Some((task.target.clone(), task.version.clone()))
            }
        } else {
            None
        };
        let info = TaskInfo {
            uri: task_uri.to_string(),
            state: task.state,
            percent_complete: Some(match task.state {
                TaskState::Running => 50,
                TaskState::Completed | TaskState::Failed => 100,
            }),
            message: (task.state == TaskState::Failed).then(|| "firmware update failed".to_string()),
        };

        match settled {
            Some((TaskTarget::System(uuid), version)) => state.system(&uuid).pending_version = Some(version),
            Some((TaskTarget::Manager(address), version)) => state.manager(&address).pending_version = Some(version),
            None => {}
        }
        Ok(info)
    }

    async fn get_manager(&self, bmc: &BmcEndpoint) -> Result<Manager, RedfishError> {
        let mut state = self.lock();
        state.enter("get_manager")?;
        let manager = state.reachable_manager(&bmc.address)?;
        Ok(Manager {
            id: "BMC".to_string(),
            firmware_version: Some(manager.firmware_version.clone()),
            state: Some("Enabled".to_string()),
        })
    }

    async fn reset_manager(&self, bmc: &BmcEndpoint, _reset: ResetType) -> Result<(), RedfishError> {
        let mut state = self.lock();
        state.enter("reset_manager")?;
        let unreachable = state.reset_unreachable_calls;
        let manager = state.manager(&bmc.address);
        let pending = std::mem::take(&mut manager.pending_attributes);
        manager.attributes.extend(pending);
        if let Some(version) = manager.pending_version.take() {
            manager.firmware_version = version;
        }
        manager.unreachable_for = unreachable;
        Ok(())
    }

    async fn get_bmc_version(&self, bmc: &BmcEndpoint) -> Result<String, RedfishError> {
        let mut state = self.lock();
        state.enter("get_bmc_version")?;
        Ok(state.reachable_manager(&bmc.address)?.firmware_version.clone())
    }

    async fn upgrade_bmc(&self, bmc: &BmcEndpoint, image: &FirmwareImage) -> Result<String, RedfishError> {
        let mut state = self.lock();
        state.enter("upgrade_bmc")?;
        state.create_task(TaskTarget::Manager(bmc.address.clone()), image)
    }

    async fn get_bmc_attributes(&self, bmc: &BmcEndpoint) -> Result<Attributes, RedfishError> {
        let mut state = self.lock();
        state.enter("get_bmc_attributes")?;
        Ok(state.reachable_manager(&bmc.address)?.attributes.clone())
    }

    async fn set_bmc_attributes(&self, bmc: &BmcEndpoint, attributes: &Attributes) -> Result<(), RedfishError> {
        let mut state = self.lock();
        state.enter("set_bmc_attributes")?;
        let manager = state.reachable_manager(&bmc.address)?;
        for (key, value) in attributes {
            if key.contains("reset") {
                manager.pending_attributes.insert(key.clone(), value.clone());
            } else {
                manager.attributes.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn bmc_reset_required(&self, _bmc: &BmcEndpoint, attributes: &Attributes) -> Result<bool, RedfishError> {
        self.lock().enter("bmc_reset_required")?;
        Ok(attributes.keys().any(|k| k.contains("reset")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "38947555-7742-3448-3784-823347823834";

    fn bmc() -> BmcEndpoint {
        BmcEndpoint {
            address: "10.0.0.1".to_string(),
            port: None,
            username: "admin".to_string(),
            password: "pw".to_string(),
        }
    }

    #[tokio::test]
    async fn test_reboot_attributes_wait_for_power_cycle() {
        let mock = MockRedfishClient::new();
        mock.power_on(UUID);
        let attrs = Attributes::from([
            ("fooreboot".to_string(), "144".to_string()),
            ("abc".to_string(), "baz".to_string()),
        ]);
        assert!(mock.requires_reboot(&bmc(), UUID, &attrs).await.unwrap());
        mock.set_bios_attributes(&bmc(), UUID, &attrs).await.unwrap();

        let live = mock.get_bios_attributes(&bmc(), UUID).await.unwrap();
        assert_eq!(live["abc"], "baz");
        assert_eq!(live["fooreboot"], "123");

        mock.power_off(UUID);
        mock.power_on(UUID);
        let live = mock.get_bios_attributes(&bmc(), UUID).await.unwrap();
        assert_eq!(live["fooreboot"], "144");
    }

    #[tokio::test]
    async fn test_bios_upgrade_task_then_reset() {
        let mock = MockRedfishClient::new();
        mock.add_firmware_image("http://images/bios-2.0.bin", "2.0");
        let image = FirmwareImage {
            uri: "http://images/bios-2.0.bin".to_string(),
            ..Default::default()
        };
        let task = mock.upgrade_bios(&bmc(), UUID, &image).await.unwrap();

        assert_eq!(mock.get_task(&bmc(), &task).await.unwrap().state, TaskState::Running);
        assert_eq!(mock.get_task(&bmc(), &task).await.unwrap().state, TaskState::Completed);
        assert_eq!(mock.get_bios_version(&bmc(), UUID).await.unwrap(), DEFAULT_BIOS_VERSION);

        mock.reset_system(&bmc(), UUID, ResetType::ForceRestart).await.unwrap();
        assert_eq!(mock.get_bios_version(&bmc(), UUID).await.unwrap(), "2.0");
    }

    #[tokio::test]
    async fn test_manager_unreachable_after_reset() {
        let mock = MockRedfishClient::new();
        mock.set_reset_unreachable_calls(2);
        mock.reset_manager(&bmc(), ResetType::GracefulRestart).await.unwrap();

        assert!(mock.get_manager(&bmc()).await.unwrap_err().is_transient());
        assert!(mock.get_manager(&bmc()).await.unwrap_err().is_transient());
        assert!(mock.get_manager(&bmc()).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let mock = MockRedfishClient::new();
        mock.fail_once("get_bios_version", MockFailure::Transient);
        assert!(mock.get_bios_version(&bmc(), UUID).await.unwrap_err().is_transient());
        assert!(mock.get_bios_version(&bmc(), UUID).await.is_ok());
        assert_eq!(mock.call_count("get_bios_version"), 2);
    }

    #[tokio::test]
    async fn test_unknown_image_is_fatal() {
        let mock = MockRedfishClient::new();
        let image = FirmwareImage {
            uri: "http://images/missing.bin".to_string(),
            ..Default::default()
        };
        let err = mock.upgrade_bmc(&bmc(), &image).await.unwrap_err();
        assert!(matches!(err, RedfishError::Fatal(_)));
    }
}
