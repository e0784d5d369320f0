//! Hypervisor command execution.
//!
//! Every interaction with Parallels Desktop goes through `prlctl`. This module
//! provides the transport ([`RemoteChannel`]) that reaches the host running
//! the hypervisor, and the [`CommandExecutor`] capability that the inventory
//! and lifecycle code are written against.

use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Default location of the Parallels Desktop control program.
pub const DEFAULT_PRLCTL: &str = "/usr/local/bin/prlctl";

/// Raw result of running a program through a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,
    /// Combined stdout and stderr.
    pub text: String,
}

/// Connection to the host that runs the hypervisor.
pub trait RemoteChannel: Send + Sync {
    /// Whether a live connection is currently held.
    fn is_connected(&self) -> bool;

    /// Establish the connection. Blocks for as long as the transport needs.
    fn connect(&self) -> Result<()>;

    /// Run `program` with `args` on the remote side.
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs `prlctl`-style operations and returns their output.
pub trait CommandExecutor: Send + Sync {
    /// Execute one operation. Fails with [`Error::CommandFailed`] on a
    /// non-zero exit and [`Error::ChannelUnavailable`] when the host cannot
    /// be reached.
    fn execute(&self, args: &[&str]) -> Result<String>;
}

/// Channel that spawns processes, either directly on this machine or behind
/// a transport prefix such as `ssh user@host`.
#[derive(Debug)]
pub struct ProcessChannel {
    prefix: Vec<String>,
    connected: AtomicBool,
}

impl ProcessChannel {
    /// Channel running commands on the local machine.
    pub fn local() -> Self {
        Self {
            prefix: Vec::new(),
            connected: AtomicBool::new(true),
        }
    }

    /// Channel running commands behind `prefix` (e.g. `["ssh", "ci@mac"]`).
    ///
    /// An empty prefix is the same as [`ProcessChannel::local`].
    pub fn remote(prefix: Vec<String>) -> Self {
        let local = prefix.is_empty();
        Self {
            prefix,
            connected: AtomicBool::new(local),
        }
    }

    fn is_local(&self) -> bool {
        self.prefix.is_empty()
    }

    fn build(&self, program: &str, args: &[&str]) -> Command {
        if self.is_local() {
            let mut cmd = Command::new(program);
            cmd.args(args);
            return cmd;
        }

        // The transport hands the remainder to a remote shell.
        let mut cmd = Command::new(&self.prefix[0]);
        cmd.args(&self.prefix[1..]);
        cmd.arg(shell_quote(program));
        cmd.args(args.iter().map(|a| shell_quote(a)));
        cmd
    }
}

impl RemoteChannel for ProcessChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn connect(&self) -> Result<()> {
        if self.is_local() {
            return Ok(());
        }

        tracing::info!(transport = ?self.prefix, "connecting to hypervisor host");
        let output = Command::new(&self.prefix[0])
            .args(&self.prefix[1..])
            .arg("true")
            .output()
            .map_err(|e| Error::ChannelUnavailable(format!("{}: {}", self.prefix[0], e)))?;

        if !output.status.success() {
            return Err(Error::ChannelUnavailable(format!(
                "transport probe exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        self.connected.store(true, Ordering::Release);
        tracing::info!("connected to hypervisor host");
        Ok(())
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = match self.build(program, args).output() {
            Ok(output) => output,
            Err(e) if self.is_local() => return Err(Error::Io(e)),
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                return Err(Error::ChannelUnavailable(format!(
                    "{}: {}",
                    self.prefix[0], e
                )));
            }
        };

        // Invalid UTF-8 is replaced rather than rejected.
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            text,
        })
    }
}

/// Quote an argument for a POSIX shell.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@{}".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// `prlctl` invoked through a [`RemoteChannel`].
pub struct Prlctl {
    channel: Arc<dyn RemoteChannel>,
    program: String,
}

impl Prlctl {
    /// Create an executor for `program` reached through `channel`.
    pub fn new(channel: Arc<dyn RemoteChannel>, program: impl Into<String>) -> Self {
        Self {
            channel,
            program: program.into(),
        }
    }

    /// Return the channel, reconnecting first if the connection was lost.
    fn live_channel(&self) -> Result<&dyn RemoteChannel> {
        if !self.channel.is_connected() {
            self.channel.connect().map_err(|e| match e {
                Error::ChannelUnavailable(_) => e,
                other => Error::ChannelUnavailable(other.to_string()),
            })?;
        }
        Ok(self.channel.as_ref())
    }
}

impl CommandExecutor for Prlctl {
    fn execute(&self, args: &[&str]) -> Result<String> {
        let channel = self.live_channel()?;

        tracing::info!(program = %self.program, args = ?args, "running command");
        let output = channel.run(&self.program, args)?;

        if output.exit_code != 0 {
            tracing::debug!(exit_code = output.exit_code, output = %output.text, "command failed");
            return Err(Error::CommandFailed {
                exit_code: output.exit_code,
                output: output.text,
            });
        }
        Ok(output.text)
    }
}
