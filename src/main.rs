//! pdcloud CLI entry point.

use clap::{Parser, Subcommand};
use pdcloud::config::ConnectorConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;

/// pdcloud - ephemeral Parallels Desktop build agents
#[derive(Parser, Debug)]
#[command(name = "pdcloud")]
#[command(about = "Ephemeral Parallels Desktop build-agent VMs")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show host capacity and current usage.
    Host(cli::host::HostCmd),

    /// List VMs on the hypervisor host.
    #[command(alias = "list")]
    Ls(cli::list::ListCmd),

    /// Check whether a VM can be started without exceeding host capacity.
    Check(cli::check::CheckCmd),

    /// Start a VM and wait for its address.
    Provision(cli::provision::ProvisionCmd),

    /// Apply the post-build action to a VM.
    Dispose(cli::dispose::DisposeCmd),

    /// Run the HTTP API server.
    Serve(cli::serve::ServeCmd),
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.log_json);

    tracing::debug!(version = pdcloud::VERSION, "starting pdcloud");

    let loaded = match &cli.config {
        Some(path) => ConnectorConfig::load_from(path),
        None => ConnectorConfig::load(),
    };
    let config = match loaded {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Host(cmd) => cmd.run(&config),
        Commands::Ls(cmd) => cmd.run(&config),
        Commands::Check(cmd) => cmd.run(&config),
        Commands::Provision(cmd) => cmd.run(&config),
        Commands::Dispose(cmd) => cmd.run(&config),
        Commands::Serve(cmd) => cmd.run(&config),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber.
///
/// Logs go to stderr so command output on stdout stays scriptable.
fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pdcloud=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
