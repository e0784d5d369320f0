//! Error types for pdcloud.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the VM lifecycle controller and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No live connection to the hypervisor host and reconnecting failed.
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// `prlctl` exited with a non-zero status.
    #[error("{}", command_failed_message(*exit_code, output))]
    CommandFailed {
        /// Exit code of the control program (-1 if killed by a signal).
        exit_code: i32,
        /// Combined stdout/stderr text.
        output: String,
    },

    /// The guest never reported an address within the polling budget.
    #[error("failed to get IP for VM '{vm}' after {attempts} attempts")]
    IpAcquisitionTimeout {
        /// VM id or name that was polled.
        vm: String,
        /// Number of polls issued.
        attempts: u32,
    },

    /// No inventory entry matched the id or name.
    #[error("VM not found: {0}")]
    VmNotFound(String),

    /// Starting the VM would exceed host CPU or RAM.
    #[error("not enough resources to start VM '{0}'")]
    InsufficientResources(String),

    /// Inventory output did not have the expected shape.
    #[error("failed to parse {what}: {message}")]
    Parse {
        /// What was being parsed.
        what: String,
        /// Parser message.
        message: String,
    },

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Failed to load configuration from disk.
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Failed to save configuration to disk.
    #[error("failed to save config: {0}")]
    ConfigSave(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a parse error.
    pub fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Parse {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Create a config error for a failed operation.
    pub fn config(op: &str, message: impl std::fmt::Display) -> Self {
        Error::Config(format!("{}: {}", op, message))
    }

    /// True for a non-zero exit of the control program.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Error::CommandFailed { .. })
    }
}

impl From<pdcloud_protocol::DecodeError> for Error {
    fn from(e: pdcloud_protocol::DecodeError) -> Self {
        Error::parse(format!("{} listing", e.kind), e.source.to_string())
    }
}

fn command_failed_message(exit_code: i32, output: &str) -> String {
    let mut msg = format!("prlctl execution failed with code {}", exit_code);
    if !output.is_empty() {
        msg.push_str(&format!(", output:\n{}", output));
    }
    msg
}
