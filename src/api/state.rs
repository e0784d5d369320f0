//! API server state management.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::AgentVm;
use crate::api::error::ApiError;
use crate::api::types::AgentResponse;
use crate::config::ConnectorConfig;
use crate::controller::HostController;

/// Shared API server state.
pub struct ApiState {
    controller: Arc<HostController>,
    config: ConnectorConfig,
    /// Agent VMs touched by this server, keyed by the configured VM key.
    agents: RwLock<HashMap<String, Arc<Mutex<AgentVm>>>>,
}

impl ApiState {
    /// Create a new API state.
    pub fn new(controller: Arc<HostController>, config: ConnectorConfig) -> Self {
        Self {
            controller,
            config,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn controller(&self) -> &Arc<HostController> {
        &self.controller
    }

    /// Whether `key` names a configured build-agent VM.
    pub fn is_configured(&self, key: &str) -> bool {
        self.config.get_vm(key).is_some()
    }

    /// Get the agent record for `key`, creating an idle one on first use.
    ///
    /// Only configured VMs can be used as agents.
    pub fn agent(&self, key: &str) -> Result<Arc<Mutex<AgentVm>>, ApiError> {
        if let Some(entry) = self.agents.read().get(key) {
            return Ok(entry.clone());
        }

        let config = self
            .config
            .get_vm(key)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("VM '{}' is not configured", key)))?;

        let mut agents = self.agents.write();
        let entry = agents
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AgentVm::new(key, config))));
        Ok(entry.clone())
    }

    /// Get an existing agent record.
    pub fn existing_agent(&self, key: &str) -> Result<Arc<Mutex<AgentVm>>, ApiError> {
        self.agents
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("VM '{}' has no agent", key)))
    }

    /// Snapshot of every agent record.
    pub fn list_agents(&self) -> Vec<AgentResponse> {
        self.agents
            .read()
            .values()
            .map(|entry| agent_response(&entry.lock()))
            .collect()
    }
}

/// Response body describing `vm`.
pub fn agent_response(vm: &AgentVm) -> AgentResponse {
    AgentResponse {
        vm: vm.vm_id.clone(),
        agent: vm.agent_name().to_string(),
        phase: vm.phase,
        provisioned: vm.provisioned,
        launcher_ip: vm.launcher_ip.clone(),
    }
}
