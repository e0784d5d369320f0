//! Check command implementation.

use clap::Args;
use pdcloud::config::ConnectorConfig;
use pdcloud::Error;

/// Check whether a VM fits on the host right now.
///
/// Exits non-zero when starting the VM would exceed host CPU or RAM.
#[derive(Args, Debug)]
pub struct CheckCmd {
    /// VM id or name.
    pub vm: String,
}

impl CheckCmd {
    /// Execute the check command.
    pub fn run(&self, config: &ConnectorConfig) -> pdcloud::Result<()> {
        if super::controller(config).can_start(&self.vm)? {
            println!("VM {} can be started", self.vm);
            Ok(())
        } else {
            Err(Error::InsufficientResources(self.vm.clone()))
        }
    }
}
