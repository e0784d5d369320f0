//! VM lifecycle controller.
//!
//! One [`HostController`] serves one hypervisor host. It drives each agent VM
//! through its lifecycle:
//!
//! ```text
//! Idle -> Starting -> AwaitingIp -> Provisioned -> Disposing -> Idle
//! ```
//!
//! Lifecycles of different VMs run independently (typically one thread per
//! VM); the only state they share is the active-agent count, which is
//! serialized inside [`ActiveAgents`].

use std::sync::Arc;

use crate::agent::{ActiveAgents, AgentRegistry, AgentVm, Phase, RestartCoordinator};
use crate::config::ConnectorConfig;
use crate::error::{Error, Result};
use crate::executor::{CommandExecutor, Prlctl, ProcessChannel};
use crate::inventory::{Inventory, VmRecord, VmStatus};
use crate::policy::{resolve, PostBuildBehavior};
use crate::resources::{ResourceAccountant, Resources, Usage};
use crate::util::RetryPolicy;

/// Lifecycle controller for the VMs of one hypervisor host.
pub struct HostController {
    inventory: Inventory,
    accountant: ResourceAccountant,
    retry: RetryPolicy,
    agents: ActiveAgents,
    registry: Arc<dyn AgentRegistry>,
}

impl HostController {
    /// Create a controller issuing commands through `executor`.
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        host: Resources,
        retry: RetryPolicy,
        registry: Arc<dyn AgentRegistry>,
        restart: Arc<dyn RestartCoordinator>,
    ) -> Self {
        tracing::info!(
            cpus = host.cpus,
            ram_mib = host.ram_bytes / crate::inventory::MIB,
            "host resources"
        );
        Self {
            inventory: Inventory::new(executor),
            accountant: ResourceAccountant::new(host),
            retry,
            agents: ActiveAgents::new(restart),
            registry,
        }
    }

    /// Create a controller for the host described by `config`.
    pub fn from_config(
        config: &ConnectorConfig,
        registry: Arc<dyn AgentRegistry>,
        restart: Arc<dyn RestartCoordinator>,
    ) -> Self {
        let channel = Arc::new(ProcessChannel::remote(config.remote.clone()));
        let prlctl = Arc::new(Prlctl::new(channel, config.prlctl.clone()));
        Self::new(
            prlctl,
            config.host_resources(),
            config.retry_policy(),
            registry,
            restart,
        )
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn host(&self) -> Resources {
        self.accountant.host()
    }

    /// Number of agents currently holding a VM slot.
    pub fn active_agents(&self) -> usize {
        self.agents.count()
    }

    /// Whether no agent currently holds a VM slot.
    pub fn is_ready_to_restart(&self) -> bool {
        self.agents.is_ready_to_restart()
    }

    /// Current resource usage of the host.
    pub fn usage(&self) -> Result<Usage> {
        self.accountant.usage(&self.inventory.list_all()?)
    }

    /// Whether `vm` could be started right now.
    pub fn can_start(&self, vm: &str) -> Result<bool> {
        self.accountant.can_start(&self.inventory, vm)
    }

    /// Start the VM for an agent unless it is already running.
    ///
    /// On success the VM is marked provisioned and waits for its address.
    /// A missing VM fails before any command is issued; every other failure
    /// (query error, refused by accounting, `start` error) runs the
    /// post-build disposal before the error is returned.
    pub fn start_vm(&self, vm: &mut AgentVm) -> Result<()> {
        tracing::info!(vm = %vm.vm_id, "looking for virtual machine");
        vm.phase = Phase::Starting;

        let snapshot = match self.inventory.list_all() {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.abort_start(vm, e)),
        };

        let Some(record) = snapshot.iter().find(|r| r.matches(&vm.vm_id)) else {
            tracing::error!(vm = %vm.vm_id, "failed to start virtual machine: no such VM");
            vm.phase = Phase::Idle;
            return Err(Error::VmNotFound(vm.vm_id.clone()));
        };

        let status = startable_status(record);
        if vm.config.post_build == PostBuildBehavior::ReturnPrevState {
            vm.prev_state = Some(status.clone());
        }

        if status != VmStatus::Running {
            match self.accountant.can_start_in(&snapshot, &vm.vm_id) {
                Ok(true) => {}
                Ok(false) => {
                    let err = Error::InsufficientResources(vm.vm_id.clone());
                    return Err(self.abort_start(vm, err));
                }
                Err(e) => return Err(self.abort_start(vm, e)),
            }

            tracing::info!(vm = %vm.vm_id, "starting virtual machine");
            if let Err(e) = self.inventory.executor().execute(&["start", &vm.vm_id]) {
                return Err(self.abort_start(vm, e));
            }
        }

        vm.provisioned = true;
        vm.phase = Phase::AwaitingIp;
        Ok(())
    }

    /// Wait for a started VM to report its address, then hand it to the
    /// agent registry.
    ///
    /// If the VM will need disposal, it takes an agent slot before polling
    /// starts. On timeout the VM is left running and keeps its slot until
    /// [`HostController::post_build`] is called for it.
    pub fn provision(&self, vm: &mut AgentVm) -> Result<String> {
        if !vm.holds_slot && !resolve(&vm.config, vm.prev_state.as_ref()).is_noop() {
            self.agents.acquire();
            vm.holds_slot = true;
        }

        vm.phase = Phase::AwaitingIp;
        tracing::info!(vm = %vm.vm_id, "waiting for IP");
        let ip = self
            .inventory
            .poll_ip(&vm.vm_id, &self.retry)
            .inspect_err(|e| tracing::error!(vm = %vm.vm_id, error = %e, "no IP for VM"))?;

        tracing::info!(vm = %vm.vm_id, ip = %ip, "got IP address");
        vm.launcher_ip = Some(ip.clone());
        vm.phase = Phase::Provisioned;
        self.registry.provisioned(vm, &ip);
        Ok(ip)
    }

    /// [`HostController::start_vm`] followed by [`HostController::provision`].
    pub fn launch(&self, vm: &mut AgentVm) -> Result<String> {
        self.start_vm(vm)?;
        self.provision(vm)
    }

    /// Apply the post-build disposal to `vm`.
    ///
    /// Never fails: command errors are logged and the VM is released anyway.
    pub fn post_build(&self, vm: &mut AgentVm) {
        let action = resolve(&vm.config, vm.prev_state.as_ref());
        if action.is_noop() {
            tracing::info!(vm = %vm.vm_id, "keep running VM");
            if !vm.provisioned {
                vm.phase = Phase::Idle;
            }
            return;
        }

        vm.phase = Phase::Disposing;
        tracing::info!(vm = %vm.vm_id, action = %action, "post build action");

        for args in action.commands(&vm.vm_id) {
            let argv: Vec<&str> = args.iter().map(String::as_str).collect();
            match self.inventory.executor().execute(&argv) {
                Ok(output) => tracing::debug!(vm = %vm.vm_id, output = %output.trim(), "result"),
                Err(e) => {
                    tracing::error!(vm = %vm.vm_id, error = %e, "post build action failed");
                    break;
                }
            }
        }

        vm.provisioned = false;
        vm.launcher_ip = None;
        vm.phase = Phase::Idle;
        if vm.holds_slot {
            vm.holds_slot = false;
            self.agents.release();
        }
    }

    /// Signal that the connector itself is going away.
    pub fn terminate(&self) {
        self.registry.terminated();
    }

    fn abort_start(&self, vm: &mut AgentVm, err: Error) -> Error {
        tracing::error!(vm = %vm.vm_id, error = %err, "failed to start VM");
        self.post_build(vm);
        err
    }
}

/// State used for starting decisions. Anything outside running, stopped and
/// suspended is treated as suspended.
fn startable_status(record: &VmRecord) -> VmStatus {
    match &record.status {
        VmStatus::Running | VmStatus::Stopped | VmStatus::Suspended => record.status.clone(),
        other => {
            tracing::warn!(vm = %record.name, state = %other, "unexpected VM state");
            VmStatus::Suspended
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RestartFlag;
    use crate::config::VmConfig;
    use crate::inventory::MIB;
    use crate::testing::FakeHypervisor;
    use parking_lot::Mutex;

    const GIB: u64 = 1 << 30;

    #[derive(Default)]
    struct Registry {
        provisioned: Mutex<Vec<(String, String)>>,
        terminated: Mutex<bool>,
    }

    impl AgentRegistry for Registry {
        fn provisioned(&self, vm: &AgentVm, ip: &str) {
            self.provisioned
                .lock()
                .push((vm.agent_name().to_string(), ip.to_string()));
        }

        fn terminated(&self) {
            *self.terminated.lock() = true;
        }
    }

    struct Fixture {
        hv: Arc<FakeHypervisor>,
        registry: Arc<Registry>,
        restart: Arc<RestartFlag>,
        controller: Arc<HostController>,
    }

    fn fixture(hv: FakeHypervisor, host: Resources) -> Fixture {
        let hv = Arc::new(hv);
        let registry = Arc::new(Registry::default());
        let restart = Arc::new(RestartFlag::new());
        let controller = Arc::new(HostController::new(
            hv.clone(),
            host,
            RetryPolicy::immediate(180),
            registry.clone(),
            restart.clone(),
        ));
        Fixture {
            hv,
            registry,
            restart,
            controller,
        }
    }

    fn agent(id: &str, post_build: PostBuildBehavior) -> AgentVm {
        AgentVm::new(id, VmConfig::with_post_build(post_build))
    }

    #[test]
    fn test_launch_stopped_vm() {
        let f = fixture(
            FakeHypervisor::new().with_vm("a", "stopped", 2, 2048),
            Resources::new(8, 16 * GIB),
        );
        f.hv.edit("a", |vm| vm.polls_until_ip = 3);
        let mut vm = agent("a", PostBuildBehavior::Stop);

        let ip = f.controller.launch(&mut vm).unwrap();

        assert_eq!(ip, "10.211.55.2");
        assert_eq!(vm.launcher_ip.as_deref(), Some("10.211.55.2"));
        assert!(vm.provisioned);
        assert_eq!(vm.phase, Phase::Provisioned);
        assert_eq!(f.hv.state("a"), "running");
        assert_eq!(f.hv.calls_to("start"), vec![vec!["start", "a"]]);
        assert_eq!(f.hv.calls_to("list").len(), 1 + 4);
        assert_eq!(
            *f.registry.provisioned.lock(),
            vec![("a".to_string(), "10.211.55.2".to_string())]
        );
        assert_eq!(f.controller.active_agents(), 1);
        assert!(!f.restart.is_ready());
    }

    #[test]
    fn test_launch_running_vm_skips_start() {
        let f = fixture(
            FakeHypervisor::new().with_vm("a", "running", 64, 1 << 20),
            Resources::new(1, GIB),
        );
        let mut vm = agent("a-name", PostBuildBehavior::KeepRunning);

        f.controller.launch(&mut vm).unwrap();

        assert!(f.hv.calls_to("start").is_empty());
        assert_eq!(f.controller.active_agents(), 0);
        assert!(f.restart.is_ready());
    }

    #[test]
    fn test_missing_vm_issues_no_commands() {
        let f = fixture(
            FakeHypervisor::new().with_vm("a", "stopped", 2, 2048),
            Resources::new(8, 16 * GIB),
        );
        let mut vm = agent("ghost", PostBuildBehavior::Stop);

        let err = f.controller.start_vm(&mut vm).unwrap_err();

        assert!(matches!(err, Error::VmNotFound(ref id) if id == "ghost"));
        assert_eq!(f.hv.calls(), vec![vec!["list", "-i", "-a", "--json"]]);
        assert_eq!(vm.phase, Phase::Idle);
        assert!(!vm.provisioned);
    }

    #[test]
    fn test_insufficient_resources_disposes() {
        // Reserve 1 GiB + busy (2048 + 256 + 500 MiB) leaves no room for "a".
        let f = fixture(
            FakeHypervisor::new()
                .with_vm("busy", "running", 2, 2048)
                .with_vm("a", "suspended", 2, 2048),
            Resources::new(8, 6 * GIB),
        );
        let mut vm = agent("a", PostBuildBehavior::Stop);

        let err = f.controller.start_vm(&mut vm).unwrap_err();

        assert!(matches!(err, Error::InsufficientResources(_)));
        assert!(f.hv.calls_to("start").is_empty());
        assert_eq!(f.hv.calls_to("stop"), vec![vec!["stop", "a"]]);
        assert!(!vm.provisioned);
        assert_eq!(vm.phase, Phase::Idle);
        assert!(f.registry.provisioned.lock().is_empty());
    }

    #[test]
    fn test_start_failure_disposes_and_propagates() {
        let f = fixture(
            FakeHypervisor::new().with_vm("a", "stopped", 2, 2048),
            Resources::new(8, 16 * GIB),
        );
        f.hv.fail("start");
        let mut vm = agent("a", PostBuildBehavior::Suspend);

        let err = f.controller.launch(&mut vm).unwrap_err();

        assert!(err.is_command_failure());
        assert_eq!(f.hv.calls_to("suspend"), vec![vec!["suspend", "a"]]);
        assert!(f.hv.calls_to("list").iter().all(|c| c[1] == "-i"));
    }

    #[test]
    fn test_unknown_state_treated_as_suspended() {
        let f = fixture(
            FakeHypervisor::new().with_vm("a", "paused", 2, 2048),
            Resources::new(8, 16 * GIB),
        );
        let mut vm = agent("a", PostBuildBehavior::ReturnPrevState);

        f.controller.start_vm(&mut vm).unwrap();

        assert_eq!(vm.prev_state, Some(VmStatus::Suspended));
        assert_eq!(f.hv.calls_to("start").len(), 1);
    }

    #[test]
    fn test_ip_timeout_leaves_vm_running() {
        let f = fixture(
            FakeHypervisor::new().with_vm("a", "stopped", 2, 2048),
            Resources::new(8, 16 * GIB),
        );
        f.hv.edit("a", |vm| vm.polls_until_ip = u32::MAX);
        let mut vm = agent("a", PostBuildBehavior::Stop);

        let err = f.controller.launch(&mut vm).unwrap_err();

        assert!(matches!(
            err,
            Error::IpAcquisitionTimeout { attempts: 180, .. }
        ));
        assert_eq!(f.hv.calls_to("list").len(), 1 + 180);
        assert_eq!(f.hv.state("a"), "running");
        assert!(f.hv.calls_to("stop").is_empty());
        assert_eq!(vm.phase, Phase::AwaitingIp);
        assert!(vm.launcher_ip.is_none());
        assert_eq!(f.controller.active_agents(), 1);
        assert!(f.registry.provisioned.lock().is_empty());
    }

    #[test]
    fn test_active_agent_counter() {
        let f = fixture(
            FakeHypervisor::new()
                .with_vm("a", "stopped", 2, 2048)
                .with_vm("b", "stopped", 2, 2048)
                .with_vm("c", "suspended", 2, 2048),
            Resources::new(16, 64 * GIB),
        );
        let mut vms: Vec<AgentVm> = ["a", "b", "c"]
            .iter()
            .map(|id| agent(id, PostBuildBehavior::Stop))
            .collect();

        for vm in vms.iter_mut() {
            f.controller.launch(vm).unwrap();
        }
        assert_eq!(f.controller.active_agents(), 3);
        assert!(!f.restart.is_ready());

        f.controller.post_build(&mut vms[0]);
        f.controller.post_build(&mut vms[1]);
        assert_eq!(f.controller.active_agents(), 1);
        assert!(!f.restart.is_ready());

        f.controller.post_build(&mut vms[2]);
        assert_eq!(f.controller.active_agents(), 0);
        assert!(f.restart.is_ready());
        assert!(f.controller.is_ready_to_restart());

        f.controller.post_build(&mut vms[2]);
        assert_eq!(f.controller.active_agents(), 0);
        assert!(f.restart.is_ready());

        assert_eq!(f.hv.state("a"), "stopped");
        assert_eq!(f.hv.state("c"), "stopped");
    }

    #[test]
    fn test_return_prev_state_uses_captured_state() {
        let f = fixture(
            FakeHypervisor::new().with_vm("a", "suspended", 2, 2048),
            Resources::new(8, 16 * GIB),
        );
        let mut vm = agent("a", PostBuildBehavior::ReturnPrevState);

        f.controller.launch(&mut vm).unwrap();
        assert_eq!(vm.prev_state, Some(VmStatus::Suspended));
        assert_eq!(f.controller.active_agents(), 1);

        // Someone stops the VM behind our back; the captured state still wins.
        f.hv.edit("a", |v| v.state = "stopped".into());
        f.controller.post_build(&mut vm);

        assert_eq!(f.hv.calls_to("suspend"), vec![vec!["suspend", "a"]]);
        assert!(f.hv.calls_to("stop").is_empty());
        assert_eq!(f.controller.active_agents(), 0);
    }

    #[test]
    fn test_return_prev_state_of_running_vm_keeps_it_running() {
        let f = fixture(
            FakeHypervisor::new().with_vm("a", "running", 2, 2048),
            Resources::new(8, 16 * GIB),
        );
        let mut vm = agent("a", PostBuildBehavior::ReturnPrevState);

        f.controller.launch(&mut vm).unwrap();
        assert_eq!(f.controller.active_agents(), 0);

        f.controller.post_build(&mut vm);
        assert!(vm.provisioned);
        assert_eq!(vm.phase, Phase::Provisioned);
        assert_eq!(f.hv.state("a"), "running");
    }

    #[test]
    fn test_failed_disposal_still_releases() {
        let f = fixture(
            FakeHypervisor::new().with_vm("a", "stopped", 2, 2048),
            Resources::new(8, 16 * GIB),
        );
        let mut vm = agent("a", PostBuildBehavior::Stop);
        f.controller.launch(&mut vm).unwrap();
        assert_eq!(f.controller.active_agents(), 1);

        f.hv.fail("stop");
        f.controller.post_build(&mut vm);

        assert_eq!(f.hv.calls_to("stop").len(), 1);
        assert!(!vm.provisioned);
        assert_eq!(vm.phase, Phase::Idle);
        assert_eq!(f.controller.active_agents(), 0);
        assert!(f.restart.is_ready());
    }

    #[test]
    fn test_only_slot_holders_release() {
        let f = fixture(
            FakeHypervisor::new()
                .with_vm("a", "stopped", 2, 2048)
                .with_vm("big", "stopped", 64, 2048),
            Resources::new(8, 16 * GIB),
        );
        let mut a = agent("a", PostBuildBehavior::Stop);
        f.controller.launch(&mut a).unwrap();
        assert!(a.holds_slot);

        // A refused start disposes "big" but must not release a's slot.
        let mut big = agent("big", PostBuildBehavior::Stop);
        let err = f.controller.launch(&mut big).unwrap_err();
        assert!(matches!(err, Error::InsufficientResources(_)));
        assert!(!big.holds_slot);
        assert_eq!(f.hv.calls_to("stop"), vec![vec!["stop", "big"]]);
        assert_eq!(f.controller.active_agents(), 1);
        assert!(!f.restart.is_ready());

        f.controller.post_build(&mut a);
        assert!(!a.holds_slot);
        assert_eq!(f.controller.active_agents(), 0);
        assert!(f.restart.is_ready());

        f.controller.post_build(&mut a);
        assert_eq!(f.controller.active_agents(), 0);
        assert!(f.restart.is_ready());
    }

    #[test]
    fn test_provision_retry_keeps_one_slot() {
        let f = fixture(
            FakeHypervisor::new().with_vm("a", "stopped", 2, 2048),
            Resources::new(8, 16 * GIB),
        );
        f.hv.edit("a", |vm| vm.polls_until_ip = 200);
        let mut vm = agent("a", PostBuildBehavior::Suspend);

        assert!(f.controller.launch(&mut vm).is_err());
        assert_eq!(f.controller.active_agents(), 1);

        f.controller.provision(&mut vm).unwrap();
        assert_eq!(f.controller.active_agents(), 1);

        f.controller.post_build(&mut vm);
        assert_eq!(f.controller.active_agents(), 0);
    }

    #[test]
    fn test_revert_stops_at_first_failure() {
        let f = fixture(
            FakeHypervisor::new().with_vm("a", "stopped", 2, 2048),
            Resources::new(8, 16 * GIB),
        );
        let mut vm = AgentVm::new(
            "a",
            VmConfig {
                post_build: PostBuildBehavior::RevertAndSuspend,
                snapshot: Some("{snap}".into()),
                ..VmConfig::default()
            },
        );
        f.controller.launch(&mut vm).unwrap();

        f.hv.fail("snapshot-switch");
        f.controller.post_build(&mut vm);

        assert_eq!(
            f.hv.calls_to("snapshot-switch"),
            vec![vec!["snapshot-switch", "a", "--id", "{snap}"]]
        );
        assert!(f.hv.calls_to("suspend").is_empty());
        assert_eq!(f.controller.active_agents(), 0);
    }

    #[test]
    fn test_concurrent_lifecycles() {
        let mut hv = FakeHypervisor::new();
        for i in 0..6 {
            hv = hv.with_vm(&format!("vm{}", i), "stopped", 1, 1024);
        }
        let f = fixture(hv, Resources::new(64, 256 * GIB));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let controller = f.controller.clone();
                std::thread::spawn(move || {
                    let mut vm = agent(&format!("vm{}", i), PostBuildBehavior::Suspend);
                    controller.launch(&mut vm).unwrap();
                    vm
                })
            })
            .collect();
        let mut vms: Vec<AgentVm> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(f.controller.active_agents(), 6);
        assert_eq!(f.registry.provisioned.lock().len(), 6);

        for vm in vms.iter_mut() {
            f.controller.post_build(vm);
        }
        assert_eq!(f.controller.active_agents(), 0);
        assert!(f.restart.is_ready());
    }

    #[test]
    fn test_usage_and_terminate() {
        let f = fixture(
            FakeHypervisor::new()
                .with_vm("a", "running", 2, 2048)
                .with_vm("b", "stopped", 4, 4096),
            Resources::new(8, 16 * GIB),
        );

        let usage = f.controller.usage().unwrap();
        assert_eq!(usage.active_vms, 1);
        assert_eq!(usage.used.cpus, 2);
        assert_eq!(usage.used.ram_bytes, GIB + (2048 + 256 + 500) * MIB);
        assert!(f.controller.can_start("b").unwrap());

        f.controller.terminate();
        assert!(*f.registry.terminated.lock());
    }
}
