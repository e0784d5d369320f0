//! Connector configuration.
//!
//! One [`ConnectorConfig`] describes one hypervisor host: how to reach it,
//! how long to wait for guests to report an address, and which VMs may be
//! used as build agents together with their post-build behavior.
//!
//! The configuration is a TOML file at `<config dir>/pdcloud/config.toml`:
//!
//! ```toml
//! prlctl = "/usr/local/bin/prlctl"
//! remote = ["ssh", "-o", "BatchMode=yes", "ci@mac-mini-04"]
//! ip_poll_attempts = 180
//! ip_poll_interval_ms = 1000
//!
//! [vms.macos-14-builder]
//! post_build = "revert-and-suspend"
//! snapshot = "{4f0e4cbb-33a5-4c4d-9d1e-8f3b7f9b6a10}"
//! labels = ["macos", "xcode-15"]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::executor::DEFAULT_PRLCTL;
use crate::inventory::MIB;
use crate::policy::PostBuildBehavior;
use crate::resources::Resources;
use crate::util::{RetryPolicy, DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL};

/// Application name for config file storage.
const APP_NAME: &str = "pdcloud";

/// Config file name inside the application directory.
const CONFIG_FILE: &str = "config.toml";

/// Configuration for one hypervisor host connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Configuration format version.
    pub version: u8,

    /// Path of `prlctl` on the hypervisor host.
    pub prlctl: String,

    /// Transport prefix used to reach the host (e.g. `["ssh", "ci@mac"]`).
    /// Empty means the hypervisor runs on this machine.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remote: Vec<String>,

    /// Number of address polls after a VM is started.
    pub ip_poll_attempts: u32,

    /// Delay between address polls, in milliseconds.
    pub ip_poll_interval_ms: u64,

    /// Host CPU count override. Detected locally when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_cpus: Option<u32>,

    /// Host RAM override in MiB. Detected locally when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_ram_mib: Option<u64>,

    /// VMs usable as build agents, keyed by VM id or name.
    pub vms: HashMap<String, VmConfig>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            version: 1,
            prlctl: DEFAULT_PRLCTL.to_string(),
            remote: Vec::new(),
            ip_poll_attempts: DEFAULT_POLL_ATTEMPTS,
            ip_poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            host_cpus: None,
            host_ram_mib: None,
            vms: HashMap::new(),
        }
    }
}

impl ConnectorConfig {
    /// Default location of the configuration file.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::ConfigLoad("could not determine config directory".into()))?;
        Ok(dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load configuration from `path`, falling back to defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::ConfigLoad(format!("{}: {}", path.display(), e))),
        };

        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?)
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::ConfigSave(format!("{}: {}", parent.display(), e)))?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::ConfigSave(e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| Error::ConfigSave(format!("{}: {}", path.display(), e)))
    }

    /// Reject settings the controller cannot act on.
    pub fn validate(&self) -> Result<()> {
        if self.prlctl.trim().is_empty() {
            return Err(Error::config("validate prlctl", "path cannot be empty"));
        }
        if self.ip_poll_attempts == 0 {
            return Err(Error::config(
                "validate ip_poll_attempts",
                "must be greater than 0",
            ));
        }
        for (id, vm) in &self.vms {
            if vm.post_build.needs_snapshot() && vm.snapshot.is_none() {
                return Err(Error::config(
                    "validate vms",
                    format!("VM '{}' uses '{}' but has no snapshot", id, vm.post_build),
                ));
            }
        }
        Ok(())
    }

    /// Polling policy for address acquisition.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.ip_poll_attempts,
            Duration::from_millis(self.ip_poll_interval_ms),
        )
    }

    /// Host capacity: configured overrides, detected values otherwise.
    pub fn host_resources(&self) -> Resources {
        let detected = Resources::detect_host();
        Resources {
            cpus: self.host_cpus.unwrap_or(detected.cpus),
            ram_bytes: self
                .host_ram_mib
                .map(|mib| mib.saturating_mul(MIB))
                .unwrap_or(detected.ram_bytes),
        }
    }

    /// Add or replace a VM.
    pub fn insert_vm(&mut self, id: impl Into<String>, vm: VmConfig) -> Option<VmConfig> {
        self.vms.insert(id.into(), vm)
    }

    /// Remove a VM from the registry.
    pub fn remove_vm(&mut self, id: &str) -> Option<VmConfig> {
        self.vms.remove(id)
    }

    /// Get a VM by id or name.
    pub fn get_vm(&self, id: &str) -> Option<&VmConfig> {
        self.vms.get(id)
    }

    /// List all configured VMs.
    pub fn list_vms(&self) -> impl Iterator<Item = (&String, &VmConfig)> {
        self.vms.iter()
    }

    /// Update a VM in place.
    pub fn update_vm<F>(&mut self, id: &str, f: F) -> Option<()>
    where
        F: FnOnce(&mut VmConfig),
    {
        if let Some(vm) = self.vms.get_mut(id) {
            f(vm);
            Some(())
        } else {
            None
        }
    }
}

/// Per-VM settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    /// What to do with the VM after its build.
    #[serde(default)]
    pub post_build: PostBuildBehavior,

    /// Snapshot id used by the revert behaviors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,

    /// CI labels advertised by the agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    /// Agent name. Defaults to the VM id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
}

impl VmConfig {
    /// Config with the given post-build behavior and defaults otherwise.
    pub fn with_post_build(post_build: PostBuildBehavior) -> Self {
        Self {
            post_build,
            ..Self::default()
        }
    }
}
