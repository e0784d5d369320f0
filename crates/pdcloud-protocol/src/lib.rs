//! Wire types for `prlctl` JSON listings.
//!
//! `prlctl list` emits two differently shaped JSON arrays depending on the
//! flags it is given:
//!
//! - `list -i [-a] --json` prints full detail records ([`VmInfo`]) with
//!   capitalised keys and a nested hardware descriptor.
//! - `list -f --json [vm]` prints flat summary records ([`VmSummary`]) that
//!   carry the guest address reported by Parallels Tools.
//!
//! This crate only describes the shapes. Interpretation (state mapping,
//! memory-size parsing, resource accounting) lives in the `pdcloud` crate.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Address reported by `prlctl` while a guest has no configured IP yet.
pub const NO_ADDRESS: &str = "-";

/// Error decoding a `prlctl` listing.
#[derive(Debug, thiserror::Error)]
#[error("invalid {kind} listing: {source}")]
pub struct DecodeError {
    /// Which listing was being decoded.
    pub kind: &'static str,
    /// Underlying JSON error.
    #[source]
    pub source: serde_json::Error,
}

/// Detail record from `prlctl list -i --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInfo {
    /// VM UUID, including braces (e.g. `{0d0d...}`).
    #[serde(rename = "ID")]
    pub id: String,

    /// Display name.
    #[serde(rename = "Name")]
    pub name: String,

    /// Raw state string (`running`, `stopped`, `suspended`, `invalid`, ...).
    #[serde(rename = "State")]
    pub state: String,

    /// Hardware descriptor. Absent for some invalid/unregistered entries.
    #[serde(rename = "Hardware", default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<Hardware>,
}

/// Hardware section of a detail record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hardware {
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub video: VideoInfo,
}

/// Virtual CPU configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub cpus: u32,
}

/// Guest RAM configuration. `size` looks like `"2048Mb"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub size: String,
}

/// Video adapter configuration. `size` looks like `"256Mb"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub size: String,
}

/// Summary record from `prlctl list -f --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSummary {
    pub uuid: String,
    pub status: String,
    /// Guest address, or [`NO_ADDRESS`] while none is assigned.
    pub ip_configured: String,
    pub name: String,
}

impl VmSummary {
    /// Returns the reported address unless it is still the placeholder.
    pub fn address(&self) -> Option<&str> {
        let ip = self.ip_configured.trim();
        if ip.is_empty() || ip == NO_ADDRESS {
            None
        } else {
            Some(ip)
        }
    }
}

/// Decode a `prlctl ... --json` array.
pub fn decode_list<T: DeserializeOwned>(
    kind: &'static str,
    text: &str,
) -> Result<Vec<T>, DecodeError> {
    serde_json::from_str(text).map_err(|source| DecodeError { kind, source })
}
