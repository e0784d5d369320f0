//! Host capacity endpoint.

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::api::types::HostResponse;

/// GET /api/v1/host - Host capacity, current usage and agent count.
pub async fn host(State(state): State<Arc<ApiState>>) -> Result<Json<HostResponse>, ApiError> {
    let controller = state.controller().clone();
    let usage = tokio::task::spawn_blocking(move || controller.usage()).await??;

    let controller = state.controller();
    Ok(Json(HostResponse {
        host: usage.host,
        used: usage.used,
        active_vms: usage.active_vms,
        active_agents: controller.active_agents(),
        ready_to_restart: controller.is_ready_to_restart(),
    }))
}
