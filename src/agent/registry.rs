//! Collaborators notified by the lifecycle controller.

use std::sync::atomic::{AtomicBool, Ordering};

use super::AgentVm;

/// Receives agent attach/detach signals (the CI system's node registry).
pub trait AgentRegistry: Send + Sync {
    /// The VM is reachable at `ip`; an agent can be attached.
    fn provisioned(&self, vm: &AgentVm, ip: &str);

    /// The host connector itself was torn down.
    fn terminated(&self);
}

/// Receives "safe to restart the host" updates.
pub trait RestartCoordinator: Send + Sync {
    fn set_ready_to_restart(&self, ready: bool);
}

/// Registry that only logs.
#[derive(Debug, Default)]
pub struct TracingRegistry;

impl AgentRegistry for TracingRegistry {
    fn provisioned(&self, vm: &AgentVm, ip: &str) {
        tracing::info!(agent = %vm.agent_name(), vm = %vm.vm_id, ip = %ip, "agent provisioned");
    }

    fn terminated(&self) {
        tracing::info!("connector terminated");
    }
}

/// Restart readiness held in memory.
#[derive(Debug)]
pub struct RestartFlag {
    ready: AtomicBool,
}

impl RestartFlag {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

impl Default for RestartFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RestartCoordinator for RestartFlag {
    fn set_ready_to_restart(&self, ready: bool) {
        tracing::info!(ready, "restart readiness changed");
        self.ready.store(ready, Ordering::Release);
    }
}
