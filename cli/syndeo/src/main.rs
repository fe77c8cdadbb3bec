//! syndeo - provision Ray clusters on Slurm
//!
//! Role configurations are set up once with `syndeo setup`, inspected with
//! `syndeo show`, and turned into running jobs with `syndeo run`.

use anyhow::Result;
use clap::Parser;

mod commands;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
