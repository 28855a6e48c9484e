//! vmlet CLI entry point.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vmlet::{DomainLifecycleManager, ManagerConfig};

mod cli;

/// vmlet - hypervisor VMs as orchestrator containers
#[derive(Parser, Debug)]
#[command(name = "vmlet")]
#[command(about = "Run hypervisor virtual machines as orchestrator containers")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the per-user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Volume driver calls made by the orchestrator.
    #[command(name = "flexvolume")]
    FlexVolume(cli::flexvolume::FlexVolumeCmd),

    /// Inspect and maintain containers.
    #[command(subcommand)]
    Container(cli::container::ContainerCmd),

    /// Manage configuration.
    #[command(subcommand)]
    Config(cli::config::ConfigCmd),
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.log_json);

    tracing::debug!(version = vmlet::VERSION, "starting vmlet");

    let result = match cli.command {
        Commands::FlexVolume(cmd) => cmd.run(),
        Commands::Config(cmd) => cmd.run(cli.config),
        Commands::Container(cmd) => load_config(cli.config)
            .and_then(DomainLifecycleManager::from_config)
            .and_then(|manager| cmd.run(&manager)),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, kind = %e.kind(), "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<PathBuf>) -> vmlet::Result<ManagerConfig> {
    match path {
        Some(p) => ManagerConfig::load_from(&p),
        None => ManagerConfig::load(),
    }
}

/// Initialize the tracing subscriber.
///
/// Logs go to stderr; stdout carries command output such as flexvolume
/// driver responses.
fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vmlet=warn"));

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
