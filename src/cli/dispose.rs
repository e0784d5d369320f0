//! Dispose command implementation.

use clap::Args;
use pdcloud::agent::AgentVm;
use pdcloud::config::ConnectorConfig;
use pdcloud::inventory::VmStatus;
use pdcloud::policy::PostBuildBehavior;

/// Apply the post-build action to a VM.
#[derive(Args, Debug)]
pub struct DisposeCmd {
    /// VM id or name.
    pub vm: String,

    /// Override the configured post-build behavior.
    #[arg(long)]
    pub behavior: Option<PostBuildBehavior>,

    /// State the VM had before it was provisioned (for return-prev-state).
    #[arg(long)]
    pub prev_state: Option<String>,
}

impl DisposeCmd {
    /// Execute the dispose command.
    pub fn run(&self, config: &ConnectorConfig) -> pdcloud::Result<()> {
        let mut vm_config = config.get_vm(&self.vm).cloned().unwrap_or_default();
        if let Some(behavior) = self.behavior {
            vm_config.post_build = behavior;
        }

        let mut vm = AgentVm::new(self.vm.clone(), vm_config);
        vm.provisioned = true;
        vm.prev_state = self.prev_state.as_deref().map(VmStatus::parse);

        super::controller(config).post_build(&mut vm);
        println!("VM {}: {}", self.vm, vm.phase);
        Ok(())
    }
}
