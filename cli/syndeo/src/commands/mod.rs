//! CLI commands.

mod delete;
mod run;
mod setup;
mod show;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use syndeo_config::ConfigStore;
use syndeo_provisioner::{logging, Settings};

use crate::output::OutputFormat;

/// syndeo - Provision Ray clusters on Slurm.
#[derive(Debug, Parser)]
#[command(name = "syndeo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Directory for role configs and rendered scripts.
    #[arg(long, global = true, env = "SYNDEO_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Directory holding the batch script templates.
    #[arg(long, global = true, env = "SYNDEO_TEMPLATE_DIR")]
    template_dir: Option<PathBuf>,

    /// Directory the jobs write their logs to.
    #[arg(long, global = true, env = "SYNDEO_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Configure a role (head, cpu or gpu).
    Setup(setup::SetupCommand),

    /// Delete a role's configuration.
    Delete(delete::DeleteCommand),

    /// Show the configuration of every role.
    Show,

    /// Submit every configured role and wait for the cluster.
    Run(run::RunCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format: OutputFormat = self.format.parse()?;

        let mut settings = Settings::from_env()?;
        if let Some(dir) = self.state_dir {
            settings.layout.state_dir = dir;
        }
        if let Some(dir) = self.template_dir {
            settings.layout.template_dir = dir;
        }
        if let Some(dir) = self.log_dir {
            settings.layout.log_dir = dir;
        }

        logging::init(&settings.log_level, settings.log_format)?;

        let ctx = CommandContext { settings, format };

        match self.command {
            Commands::Setup(cmd) => cmd.run(ctx).await,
            Commands::Delete(cmd) => cmd.run(ctx).await,
            Commands::Show => show::run(ctx).await,
            Commands::Run(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("syndeo {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub settings: Settings,
    pub format: OutputFormat,
}

impl CommandContext {
    pub fn store(&self) -> ConfigStore {
        ConfigStore::new(self.settings.layout.clone())
    }
}
