//! Provision command implementation.

use clap::Args;
use pdcloud::agent::AgentVm;
use pdcloud::config::ConnectorConfig;
use pdcloud::Error;
use std::time::Duration;

use super::parse_duration;

/// Start a VM (if needed) and wait until it reports an address.
///
/// Prints the address on success. The VM's state before the start is
/// printed to stderr so it can be passed to `dispose --prev-state`.
#[derive(Args, Debug)]
pub struct ProvisionCmd {
    /// VM id or name.
    pub vm: String,

    /// Delay between address polls (e.g. "500ms", "2s").
    #[arg(long, value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Number of address polls before giving up.
    #[arg(long)]
    pub poll_attempts: Option<u32>,
}

impl ProvisionCmd {
    /// Execute the provision command.
    pub fn run(&self, config: &ConnectorConfig) -> pdcloud::Result<()> {
        let mut config = config.clone();
        if let Some(interval) = self.poll_interval {
            config.ip_poll_interval_ms = interval_millis(interval)?;
        }
        if let Some(attempts) = self.poll_attempts {
            config.ip_poll_attempts = attempts;
        }
        config.validate()?;

        let vm_config = config.get_vm(&self.vm).cloned().unwrap_or_default();
        let mut vm = AgentVm::new(self.vm.clone(), vm_config);

        let controller = super::controller(&config);
        let ip = controller.launch(&mut vm)?;

        if let Some(prev) = &vm.prev_state {
            eprintln!("previous state: {}", prev);
        }
        println!("{}", ip);
        Ok(())
    }
}

/// Convert a poll interval to whole milliseconds.
fn interval_millis(interval: Duration) -> pdcloud::Result<u64> {
    u64::try_from(interval.as_millis()).map_err(|_| {
        Error::config(
            "parse --poll-interval",
            format!("{} is too large", humantime::format_duration(interval)),
        )
    })
}
