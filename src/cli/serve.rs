//! HTTP API server command.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;

use pdcloud::api::state::ApiState;
use pdcloud::config::ConnectorConfig;
use pdcloud::{Error, Result};

/// Start the HTTP API server.
#[derive(Parser, Debug)]
pub struct ServeCmd {
    /// Listen address.
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: String,
}

impl ServeCmd {
    /// Run the serve command.
    pub fn run(self, config: &ConnectorConfig) -> Result<()> {
        let addr: SocketAddr = self.listen.parse().map_err(|e| {
            Error::Config(format!("invalid listen address '{}': {}", self.listen, e))
        })?;

        let controller = Arc::new(super::controller(config));
        let state = Arc::new(ApiState::new(controller.clone(), config.clone()));

        let runtime = tokio::runtime::Runtime::new()?;
        let result = runtime.block_on(run_server(addr, state));

        controller.terminate();
        result
    }
}

async fn run_server(addr: SocketAddr, state: Arc<ApiState>) -> Result<()> {
    let app = pdcloud::api::create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "starting HTTP API server");
    println!("pdcloud API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
