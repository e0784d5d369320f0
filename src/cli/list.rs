//! List command implementation.

use clap::Args;
use pdcloud::config::ConnectorConfig;
use pdcloud::inventory::parse_mem_size;

use super::{format_mib, truncate};

/// List VMs on the hypervisor host.
#[derive(Args, Debug)]
pub struct ListCmd {
    /// Only show VMs configured as build agents.
    #[arg(short, long)]
    pub configured: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListCmd {
    /// Execute the list command.
    pub fn run(&self, config: &ConnectorConfig) -> pdcloud::Result<()> {
        let is_configured = |id: &str, name: &str| {
            config.get_vm(id).is_some() || config.get_vm(name).is_some()
        };

        let vms: Vec<_> = super::controller(config)
            .inventory()
            .list_all()?
            .into_iter()
            .filter(|vm| !self.configured || is_configured(&vm.id, &vm.name))
            .collect();

        if self.json {
            let json_vms: Vec<_> = vms
                .iter()
                .map(|vm| {
                    serde_json::json!({
                        "id": vm.id,
                        "name": vm.name,
                        "status": vm.status.to_string(),
                        "hardware": vm.hardware,
                        "configured": is_configured(&vm.id, &vm.name),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json_vms)?);
            return Ok(());
        }

        if vms.is_empty() {
            println!("No VMs found");
            return Ok(());
        }

        println!(
            "{:<40} {:<24} {:<10} {:<5} {:<12} {:<5}",
            "ID", "NAME", "STATUS", "CPUS", "MEMORY", "AGENT"
        );
        println!("{}", "-".repeat(101));

        for vm in &vms {
            let (cpus, memory) = match &vm.hardware {
                Some(hw) => (
                    hw.cpus.to_string(),
                    parse_mem_size(&hw.memory)
                        .map(format_mib)
                        .unwrap_or_else(|_| hw.memory.clone()),
                ),
                None => ("-".to_string(), "-".to_string()),
            };
            let agent = if is_configured(&vm.id, &vm.name) { "yes" } else { "" };

            println!(
                "{:<40} {:<24} {:<10} {:<5} {:<12} {:<5}",
                vm.id,
                truncate(&vm.name, 24),
                vm.status.to_string(),
                cpus,
                memory,
                agent,
            );
        }

        Ok(())
    }
}
