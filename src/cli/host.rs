//! Host command implementation.

use clap::Args;
use pdcloud::config::ConnectorConfig;

use super::format_mib;

/// Show host capacity and current usage.
#[derive(Args, Debug)]
pub struct HostCmd {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl HostCmd {
    /// Execute the host command.
    pub fn run(&self, config: &ConnectorConfig) -> pdcloud::Result<()> {
        let usage = super::controller(config).usage()?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&usage)?);
            return Ok(());
        }

        println!("{:<12} {:>6} {:>14}", "", "CPUS", "RAM");
        println!(
            "{:<12} {:>6} {:>14}",
            "capacity",
            usage.host.cpus,
            format_mib(usage.host.ram_bytes)
        );
        println!(
            "{:<12} {:>6} {:>14}",
            "used",
            usage.used.cpus,
            format_mib(usage.used.ram_bytes)
        );
        println!("Active VMs: {}", usage.active_vms);
        Ok(())
    }
}
