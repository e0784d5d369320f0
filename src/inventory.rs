//! VM inventory as reported by `prlctl list`.

use std::fmt;
use std::sync::Arc;

use pdcloud_protocol::{decode_list, VmInfo, VmSummary};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::executor::CommandExecutor;
use crate::util::{poll_until, RetryPolicy};

/// Bytes in a mebibyte.
pub const MIB: u64 = 1 << 20;

/// VM state as reported by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Running,
    Stopped,
    Suspended,
    Invalid,
    /// Any state string outside the known vocabulary (paused, resuming, ...).
    Other(String),
}

impl VmStatus {
    /// Map a `prlctl` state string. Matching is exact.
    pub fn parse(state: &str) -> Self {
        match state {
            "running" => VmStatus::Running,
            "stopped" => VmStatus::Stopped,
            "suspended" => VmStatus::Suspended,
            "invalid" => VmStatus::Invalid,
            other => VmStatus::Other(other.to_string()),
        }
    }

    /// Whether a VM in this state holds no host CPU or RAM.
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            VmStatus::Stopped | VmStatus::Suspended | VmStatus::Invalid
        )
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmStatus::Running => write!(f, "running"),
            VmStatus::Stopped => write!(f, "stopped"),
            VmStatus::Suspended => write!(f, "suspended"),
            VmStatus::Invalid => write!(f, "invalid"),
            VmStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Declared hardware of a VM, as raw listing values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareSpec {
    pub cpus: u32,
    /// Guest RAM, e.g. `"2048Mb"`.
    pub memory: String,
    /// Video RAM, e.g. `"256Mb"`.
    pub video: String,
}

/// One inventory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: String,
    pub name: String,
    pub status: VmStatus,
    pub hardware: Option<HardwareSpec>,
}

impl VmRecord {
    /// Whether `key` is this VM's id or name.
    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.name == key
    }

    /// Hardware spec, or a parse error naming the VM.
    pub fn hardware(&self) -> Result<&HardwareSpec> {
        self.hardware
            .as_ref()
            .ok_or_else(|| Error::parse(format!("hardware of VM '{}'", self.name), "missing"))
    }
}

impl From<VmInfo> for VmRecord {
    fn from(info: VmInfo) -> Self {
        Self {
            status: VmStatus::parse(&info.state),
            hardware: info.hardware.map(|hw| HardwareSpec {
                cpus: hw.cpu.cpus,
                memory: hw.memory.size,
                video: hw.video.size,
            }),
            id: info.id,
            name: info.name,
        }
    }
}

/// Convert a `prlctl` memory size such as `"2048Mb"` to bytes.
///
/// The last two characters are always the unit marker; the rest must be a
/// whole number of mebibytes.
pub fn parse_mem_size(size: &str) -> Result<u64> {
    let digits = size
        .len()
        .checked_sub(2)
        .and_then(|end| size.get(..end))
        .ok_or_else(|| Error::parse("memory size", format!("'{}' is too short", size)))?;

    let mib: u64 = digits
        .parse()
        .map_err(|e| Error::parse("memory size", format!("'{}': {}", size, e)))?;

    mib.checked_mul(MIB)
        .ok_or_else(|| Error::parse("memory size", format!("'{}' overflows", size)))
}

/// Reads the hypervisor's VM inventory.
#[derive(Clone)]
pub struct Inventory {
    executor: Arc<dyn CommandExecutor>,
}

impl Inventory {
    /// Create a reader on top of `executor`.
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// The executor this reader issues commands through.
    pub fn executor(&self) -> &Arc<dyn CommandExecutor> {
        &self.executor
    }

    /// Every VM known to the hypervisor, including invalid entries.
    pub fn list_all(&self) -> Result<Vec<VmRecord>> {
        self.list_detail(&["list", "-i", "-a", "--json"])
    }

    /// Look up one VM by id or name in the running-VM detail listing.
    pub fn find_one(&self, key: &str) -> Result<VmRecord> {
        Self::pick(self.list_detail(&["list", "-i", "--json"])?, key)
    }

    /// Look up one VM by id or name in the full listing, so stopped and
    /// suspended machines are found too.
    pub fn lookup(&self, key: &str) -> Result<VmRecord> {
        Self::pick(self.list_all()?, key)
    }

    /// Poll until the guest reports an address.
    ///
    /// Issues `list -f --json <vm>` up to `policy.max_attempts` times and
    /// returns the first address that is not the `-` placeholder.
    pub fn poll_ip(&self, vm: &str, policy: &RetryPolicy) -> Result<String> {
        let ip = poll_until(policy, |attempt| {
            let text = self.executor.execute(&["list", "-f", "--json", vm])?;
            tracing::info!(
                vm = %vm,
                attempt = attempt + 1,
                max_attempts = policy.max_attempts,
                "polling for IP"
            );

            let summaries: Vec<VmSummary> = decode_list("summary", &text)?;
            let summary = summaries
                .first()
                .ok_or_else(|| Error::VmNotFound(vm.to_string()))?;
            Ok(summary.address().map(str::to_string))
        })?;

        ip.ok_or_else(|| Error::IpAcquisitionTimeout {
            vm: vm.to_string(),
            attempts: policy.max_attempts,
        })
    }

    fn list_detail(&self, args: &[&str]) -> Result<Vec<VmRecord>> {
        let text = self.executor.execute(args)?;
        let vms: Vec<VmInfo> = decode_list("detail", &text)?;
        Ok(vms.into_iter().map(VmRecord::from).collect())
    }

    fn pick(records: Vec<VmRecord>, key: &str) -> Result<VmRecord> {
        records
            .into_iter()
            .find(|r| r.matches(key))
            .ok_or_else(|| Error::VmNotFound(key.to_string()))
    }
}
