//! Configuration CLI commands.

use clap::{Args, Subcommand};
use std::path::PathBuf;
use vmlet::{ManagerConfig, Result};

/// Configuration commands
#[derive(Subcommand, Debug)]
pub enum ConfigCmd {
    /// Show the effective configuration as TOML
    Show(ShowCmd),

    /// Show the path of the configuration file
    Path,

    /// Write the default configuration if no file exists
    Init,
}

impl ConfigCmd {
    pub fn run(self, config_path: Option<PathBuf>) -> Result<()> {
        let path = match config_path {
            Some(p) => p,
            None => ManagerConfig::default_path()?,
        };
        match self {
            ConfigCmd::Show(cmd) => cmd.run(&path),
            ConfigCmd::Path => {
                println!("{}", path.display());
                Ok(())
            }
            ConfigCmd::Init => {
                if path.exists() {
                    println!("Config already exists at {}", path.display());
                    return Ok(());
                }
                ManagerConfig::default().save_to(&path)?;
                println!("Wrote default config to {}", path.display());
                Ok(())
            }
        }
    }
}

/// Show the effective configuration
#[derive(Args, Debug)]
pub struct ShowCmd {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ShowCmd {
    pub fn run(self, path: &std::path::Path) -> Result<()> {
        let config = ManagerConfig::load_from(path)?;
        if self.json {
            let text = serde_json::to_string_pretty(&config)
                .map_err(|e| vmlet::Error::ConfigSave(e.to_string()))?;
            println!("{}", text);
        } else {
            if !path.exists() {
                println!("# {} not found, showing defaults", path.display());
            }
            print!("{}", config.to_toml()?);
        }
        Ok(())
    }
}
