//! pdcloud - ephemeral Parallels Desktop build-agent VMs.
//!
//! The crate drives VMs on a Parallels Desktop host through `prlctl`: it
//! decides whether a VM fits on the host, starts it, waits until the guest
//! reports an address, hands it to a CI agent registry, and applies the
//! configured post-build action once the build is done.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pdcloud::agent::{AgentVm, RestartFlag, TracingRegistry};
//! use pdcloud::config::ConnectorConfig;
//! use pdcloud::controller::HostController;
//!
//! # fn main() -> pdcloud::Result<()> {
//! let config = ConnectorConfig::load()?;
//! let controller = HostController::from_config(
//!     &config,
//!     Arc::new(TracingRegistry),
//!     Arc::new(RestartFlag::new()),
//! );
//!
//! let vm_config = config.get_vm("macos-builder").cloned().unwrap_or_default();
//! let mut vm = AgentVm::new("macos-builder", vm_config);
//! let ip = controller.launch(&mut vm)?;
//! println!("agent reachable at {}", ip);
//! controller.post_build(&mut vm);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod policy;
pub mod resources;
pub mod util;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
