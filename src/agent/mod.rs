//! Build-agent VMs and the collaborators notified about them.
//!
//! An [`AgentVm`] is the mutable record the lifecycle controller works on
//! for one VM: its configuration, the address it was given, whether it is
//! provisioned, and the state it had before it was started.

mod counter;
mod registry;

pub use counter::ActiveAgents;
pub use registry::{AgentRegistry, RestartCoordinator, RestartFlag, TracingRegistry};

use serde::{Deserialize, Serialize};

use crate::config::VmConfig;
use crate::inventory::VmStatus;

/// Lifecycle phase of one agent VM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Idle,
    Starting,
    AwaitingIp,
    Provisioned,
    Disposing,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Starting => write!(f, "starting"),
            Phase::AwaitingIp => write!(f, "awaiting-ip"),
            Phase::Provisioned => write!(f, "provisioned"),
            Phase::Disposing => write!(f, "disposing"),
        }
    }
}

/// A VM used as an ephemeral build agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentVm {
    /// VM id or name, as passed to `prlctl`.
    pub vm_id: String,

    /// Configured behavior.
    pub config: VmConfig,

    /// Address the agent launcher should connect to.
    pub launcher_ip: Option<String>,

    /// Whether the VM has been started for an agent and not yet disposed.
    pub provisioned: bool,

    /// Whether this VM counts towards the host's active agents.
    pub holds_slot: bool,

    /// State captured before start, for `return-prev-state`.
    pub prev_state: Option<VmStatus>,

    /// Current lifecycle phase.
    pub phase: Phase,
}

impl AgentVm {
    /// Create an idle record.
    pub fn new(vm_id: impl Into<String>, config: VmConfig) -> Self {
        Self {
            vm_id: vm_id.into(),
            config,
            launcher_ip: None,
            provisioned: false,
            holds_slot: false,
            prev_state: None,
            phase: Phase::Idle,
        }
    }

    /// Name the agent registers under.
    pub fn agent_name(&self) -> &str {
        self.config.agent_name.as_deref().unwrap_or(&self.vm_id)
    }
}
