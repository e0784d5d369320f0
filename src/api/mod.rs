//! HTTP API server for pdcloud.
//!
//! One long-lived server owns the host controller, so every lifecycle it
//! drives shares a single active-agent count. A CI system provisions a VM
//! before a build and disposes it afterwards.
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! pdcloud serve --listen 127.0.0.1:8080
//!
//! # Start a VM and wait for its address
//! curl -X POST http://localhost:8080/api/v1/vms/macos-builder/provision
//!
//! # Apply its post-build action
//! curl -X POST http://localhost:8080/api/v1/vms/macos-builder/dispose
//! ```

pub mod error;
pub mod handlers;
pub mod state;
pub mod types;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use state::ApiState;

/// Upper bound for one request. Covers a full address-polling budget.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Create the API router with all endpoints.
pub fn create_router(state: Arc<ApiState>) -> Router {
    let health_route = Router::new().route("/health", get(handlers::health::health));

    let vm_routes = Router::new()
        .route("/", get(handlers::vms::list_vms))
        .route("/:id/provision", post(handlers::vms::provision_vm))
        .route("/:id/dispose", post(handlers::vms::dispose_vm));

    let api_v1 = Router::new()
        .route("/host", get(handlers::host::host))
        .nest("/vms", vm_routes);

    Router::new()
        .merge(health_route)
        .nest("/api/v1", api_v1)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
