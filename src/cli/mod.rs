//! CLI command implementations.

pub mod check;
pub mod dispose;
pub mod host;
pub mod list;
pub mod provision;
pub mod serve;

use std::sync::Arc;
use std::time::Duration;

use pdcloud::agent::{RestartFlag, TracingRegistry};
use pdcloud::config::ConnectorConfig;
use pdcloud::controller::HostController;

/// Build a controller for the configured host.
pub fn controller(config: &ConnectorConfig) -> HostController {
    HostController::from_config(
        config,
        Arc::new(TracingRegistry),
        Arc::new(RestartFlag::new()),
    )
}

/// Parse a duration like `500ms` or `2s`.
pub fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Format a byte count as MiB.
pub fn format_mib(bytes: u64) -> String {
    if bytes == u64::MAX {
        return "unknown".to_string();
    }
    format!("{} MiB", bytes / pdcloud::inventory::MIB)
}

/// Truncate a string to max length, adding "..." if needed.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
