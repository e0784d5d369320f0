//! Request and response bodies.

use serde::{Deserialize, Serialize};

use crate::agent::Phase;
use crate::resources::Resources;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Host capacity and agent accounting.
#[derive(Debug, Serialize, Deserialize)]
pub struct HostResponse {
    pub host: Resources,
    /// Host reserve plus the footprint of every non-idle VM.
    pub used: Resources,
    pub active_vms: usize,
    pub active_agents: usize,
    pub ready_to_restart: bool,
}

/// One VM in the host inventory.
#[derive(Debug, Serialize, Deserialize)]
pub struct VmEntry {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
    /// Whether the VM is configured as a build agent.
    pub configured: bool,
    /// Lifecycle phase, once the VM has been used by this server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launcher_ip: Option<String>,
}

/// Result of provisioning or disposing a VM.
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentResponse {
    pub vm: String,
    pub agent: String,
    pub phase: Phase,
    pub provisioned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launcher_ip: Option<String>,
}
