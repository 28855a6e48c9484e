//! Container inspection and maintenance commands.
//!
//! These operate on the metadata database and hypervisor named in the
//! configuration, the same ones the orchestrator-facing service uses.

use clap::{Args, Subcommand};
use std::time::Duration;
use vmlet::{ContainerFilter, ContainerState, DomainLifecycleManager, Result};

/// Container commands
#[derive(Subcommand, Debug)]
pub enum ContainerCmd {
    /// List containers
    #[command(alias = "ls")]
    List(ListCmd),

    /// Show the status of a container
    Status(StatusCmd),

    /// Start a created container
    Start(IdArg),

    /// Stop a container
    Stop(StopCmd),

    /// Remove a stopped container and its volumes
    #[command(alias = "rm")]
    Remove(IdArg),
}

impl ContainerCmd {
    pub fn run(self, manager: &DomainLifecycleManager) -> Result<()> {
        match self {
            ContainerCmd::List(cmd) => cmd.run(manager),
            ContainerCmd::Status(cmd) => cmd.run(manager),
            ContainerCmd::Start(arg) => {
                manager.start_container(&arg.id)?;
                println!("Started {}", arg.id);
                Ok(())
            }
            ContainerCmd::Stop(cmd) => cmd.run(manager),
            ContainerCmd::Remove(arg) => {
                manager.remove_container(&arg.id)?;
                println!("Removed {}", arg.id);
                Ok(())
            }
        }
    }
}

/// Container ID argument.
#[derive(Args, Debug)]
pub struct IdArg {
    /// Container ID.
    pub id: String,
}

/// List containers.
#[derive(Args, Debug)]
pub struct ListCmd {
    /// Only containers of this sandbox.
    #[arg(long)]
    pub sandbox: Option<String>,

    /// Only containers in this state (created, running, exited).
    #[arg(long, value_parser = parse_state)]
    pub state: Option<ContainerState>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListCmd {
    pub fn run(self, manager: &DomainLifecycleManager) -> Result<()> {
        let filter = ContainerFilter {
            sandbox_id: self.sandbox,
            state: self.state,
            ..ContainerFilter::default()
        };
        let containers = manager.list_containers(Some(&filter))?;

        if self.json {
            let text = serde_json::to_string_pretty(&containers)?;
            println!("{}", text);
            return Ok(());
        }

        if containers.is_empty() {
            println!("No containers found");
            return Ok(());
        }

        println!("{:<38} {:<20} {:<10} {:<20}", "ID", "NAME", "STATE", "IMAGE");
        println!("{}", "-".repeat(90));
        for c in containers {
            println!(
                "{:<38} {:<20} {:<10} {:<20}",
                c.id,
                truncate(&c.metadata.name, 18),
                c.state,
                truncate(&c.image, 18)
            );
        }
        Ok(())
    }
}

/// Show the status of a container.
#[derive(Args, Debug)]
pub struct StatusCmd {
    /// Container ID.
    pub id: String,
}

impl StatusCmd {
    pub fn run(self, manager: &DomainLifecycleManager) -> Result<()> {
        let status = manager.container_status(&self.id)?;
        println!("{}", serde_json::to_string_pretty(&status)?);
        Ok(())
    }
}

/// Stop a container.
#[derive(Args, Debug)]
pub struct StopCmd {
    /// Container ID.
    pub id: String,

    /// Seconds to wait for the guest before destroying the domain.
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl StopCmd {
    pub fn run(self, manager: &DomainLifecycleManager) -> Result<()> {
        match self.timeout {
            Some(secs) => manager.stop_container(&self.id, Duration::from_secs(secs))?,
            None => manager.stop_container_default(&self.id)?,
        }
        println!("Stopped {}", self.id);
        Ok(())
    }
}

fn parse_state(s: &str) -> std::result::Result<ContainerState, String> {
    match s {
        "created" => Ok(ContainerState::Created),
        "running" => Ok(ContainerState::Running),
        "exited" => Ok(ContainerState::Exited),
        other => Err(format!("unknown state: {}", other)),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        s.to_string()
    }
}
