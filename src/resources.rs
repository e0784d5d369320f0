//! Host capacity and VM resource accounting.
//!
//! Before a stopped or suspended VM is started, the footprint of every VM
//! already holding host resources is summed from one inventory snapshot and
//! compared against the host's capacity. The check is advisory: two
//! concurrent checks can both pass for VMs that do not fit together.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::inventory::{parse_mem_size, HardwareSpec, Inventory, VmRecord, VmStatus, MIB};

/// Per-VM virtualization overhead added to every footprint.
pub const VM_OVERHEAD_BYTES: u64 = 500 * MIB;

/// RAM kept for the host OS and management processes.
pub const HOST_RESERVE_BYTES: u64 = 1 << 30;

/// A CPU + RAM quantity: host capacity, a VM footprint, or a running total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpus: u32,
    pub ram_bytes: u64,
}

impl Resources {
    pub fn new(cpus: u32, ram_bytes: u64) -> Self {
        Self { cpus, ram_bytes }
    }

    /// Add `other` into `self`.
    pub fn append(&mut self, other: Resources) {
        self.cpus = self.cpus.saturating_add(other.cpus);
        self.ram_bytes = self.ram_bytes.saturating_add(other.ram_bytes);
    }

    /// Capacity of the machine this process runs on.
    ///
    /// Falls back to unlimited RAM when the physical memory size cannot be
    /// read, so accounting degrades to a CPU-only check.
    pub fn detect_host() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);

        let ram_bytes = physical_memory().unwrap_or_else(|| {
            tracing::error!("failed to get host RAM size");
            u64::MAX
        });

        Self { cpus, ram_bytes }
    }
}

fn physical_memory() -> Option<u64> {
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if pages <= 0 || page_size <= 0 {
        return None;
    }
    (pages as u64).checked_mul(page_size as u64)
}

/// Footprint of a VM: declared CPUs, RAM + video RAM + fixed overhead.
pub fn footprint(hw: &HardwareSpec) -> Result<Resources> {
    let ram = parse_mem_size(&hw.memory)?
        .saturating_add(parse_mem_size(&hw.video)?)
        .saturating_add(VM_OVERHEAD_BYTES);
    Ok(Resources::new(hw.cpus, ram))
}

/// Which host limit a candidate VM would exceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exceeded {
    Cpu,
    Ram,
}

/// Check whether `vm` fits next to `used` on `host`.
pub fn check(host: Resources, used: Resources, vm: Resources) -> std::result::Result<(), Exceeded> {
    if u64::from(vm.cpus) + u64::from(used.cpus) > u64::from(host.cpus) {
        return Err(Exceeded::Cpu);
    }
    if u128::from(vm.ram_bytes) + u128::from(used.ram_bytes) > u128::from(host.ram_bytes) {
        return Err(Exceeded::Ram);
    }
    Ok(())
}

/// Accounting snapshot for one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub host: Resources,
    /// Reserve plus the footprint of every non-idle VM.
    pub used: Resources,
    pub active_vms: usize,
}

/// Decides whether a VM may be started given host capacity.
#[derive(Debug, Clone, Copy)]
pub struct ResourceAccountant {
    host: Resources,
}

impl ResourceAccountant {
    pub fn new(host: Resources) -> Self {
        Self { host }
    }

    pub fn host(&self) -> Resources {
        self.host
    }

    /// Sum the footprints of every VM that holds host resources.
    pub fn usage(&self, vms: &[VmRecord]) -> Result<Usage> {
        let mut used = Resources::new(0, HOST_RESERVE_BYTES);
        let mut active_vms = 0;

        for vm in vms.iter().filter(|vm| !vm.status.is_idle()) {
            tracing::debug!(vm = %vm.name, status = %vm.status, "accounting VM");
            used.append(footprint(vm.hardware()?)?);
            active_vms += 1;
        }

        Ok(Usage {
            host: self.host,
            used,
            active_vms,
        })
    }

    /// Whether `candidate` (id or name) can be started without exceeding
    /// host CPU or RAM.
    ///
    /// A candidate that is not currently stopped or suspended is already
    /// running (or being started by someone else) and passes trivially.
    pub fn can_start(&self, inventory: &Inventory, candidate: &str) -> Result<bool> {
        let vms = inventory.list_all()?;
        self.can_start_in(&vms, candidate)
    }

    /// Same as [`ResourceAccountant::can_start`] on an existing snapshot.
    pub fn can_start_in(&self, vms: &[VmRecord], candidate: &str) -> Result<bool> {
        let usage = self.usage(vms)?;

        let Some(record) = vms.iter().find(|vm| {
            vm.matches(candidate) && matches!(vm.status, VmStatus::Stopped | VmStatus::Suspended)
        }) else {
            return Ok(true);
        };

        let vm = footprint(record.hardware()?)?;
        match check(self.host, usage.used, vm) {
            Ok(()) => Ok(true),
            Err(Exceeded::Cpu) => {
                tracing::warn!(
                    vm = vm.cpus,
                    used = usage.used.cpus,
                    host = self.host.cpus,
                    "exceeding CPU limit"
                );
                Ok(false)
            }
            Err(Exceeded::Ram) => {
                tracing::warn!(
                    vm_mib = vm.ram_bytes / MIB,
                    used_mib = usage.used.ram_bytes / MIB,
                    host_mib = self.host.ram_bytes / MIB,
                    "exceeding RAM limit"
                );
                Ok(false)
            }
        }
    }
}
