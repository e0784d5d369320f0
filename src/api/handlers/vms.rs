//! VM inventory and agent lifecycle handlers.
//!
//! Lifecycle calls block for as long as `prlctl` and address polling take,
//! so they run on the blocking pool. The per-VM lock serializes requests
//! for the same VM; different VMs proceed concurrently.

use axum::{
    extract::{Path, State},
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::state::{agent_response, ApiState};
use crate::api::types::{AgentResponse, VmEntry};
use crate::api::validation::validate_vm_key;

/// GET /api/v1/vms - List the host inventory.
pub async fn list_vms(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<VmEntry>>, ApiError> {
    let controller = state.controller().clone();
    let records = tokio::task::spawn_blocking(move || controller.inventory().list_all()).await??;

    let agents: HashMap<String, AgentResponse> = state
        .list_agents()
        .into_iter()
        .map(|a| (a.vm.clone(), a))
        .collect();

    let entries = records
        .into_iter()
        .map(|record| {
            let agent = agents
                .get(&record.id)
                .or_else(|| agents.get(&record.name));
            VmEntry {
                configured: state.is_configured(&record.id) || state.is_configured(&record.name),
                phase: agent.map(|a| a.phase),
                launcher_ip: agent.and_then(|a| a.launcher_ip.clone()),
                cpus: record.hardware.as_ref().map(|hw| hw.cpus),
                status: record.status.to_string(),
                id: record.id,
                name: record.name,
            }
        })
        .collect();

    Ok(Json(entries))
}

/// POST /api/v1/vms/:id/provision - Start a VM and wait for its address.
pub async fn provision_vm(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<AgentResponse>, ApiError> {
    validate_vm_key(&id)?;
    let entry = state.agent(&id)?;
    let controller = state.controller().clone();

    let response = tokio::task::spawn_blocking(move || {
        let mut vm = entry.lock();
        if vm.holds_slot {
            return Err(ApiError::Conflict(format!(
                "VM '{}' is already provisioned",
                vm.vm_id
            )));
        }
        controller.launch(&mut vm)?;
        Ok(agent_response(&vm))
    })
    .await??;

    Ok(Json(response))
}

/// POST /api/v1/vms/:id/dispose - Apply the post-build action to a VM.
pub async fn dispose_vm(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<AgentResponse>, ApiError> {
    validate_vm_key(&id)?;
    let entry = state.existing_agent(&id)?;
    let controller = state.controller().clone();

    let response = tokio::task::spawn_blocking(move || {
        let mut vm = entry.lock();
        controller.post_build(&mut vm);
        agent_response(&vm)
    })
    .await?;

    Ok(Json(response))
}
