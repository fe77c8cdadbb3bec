//! Configure a role.

use anyhow::Result;
use chrono::{DateTime, TimeZone};
use clap::Args;
use syndeo_config::{HostEnv, Role, RoleConfig};

use crate::output::{print_json, print_success, OutputFormat};

use super::{show::print_snapshot, CommandContext};

/// Set up a role's batch job. Unset options take the role's defaults.
#[derive(Debug, Args)]
pub struct SetupCommand {
    /// Role to configure (head, cpu or gpu).
    role: Role,

    /// Scheduler job name.
    #[arg(long)]
    job_name: Option<String>,

    /// Log base name (written to <log-dir>/<output>.log).
    #[arg(long)]
    output: Option<String>,

    /// CPUs per task.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    cpus_per_task: Option<u32>,

    /// Number of nodes.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    nodes: Option<u32>,

    /// Slurm partition.
    #[arg(long)]
    partition: Option<String>,

    /// Generic resources, e.g. gpu:volta:2 (n/a for none).
    #[arg(long)]
    gres: Option<String>,

    /// Wall-clock limit, days-hours:min:secs.
    #[arg(long)]
    time: Option<String>,

    /// Where Ray runs on the node (container or bare_metal).
    #[arg(long)]
    hostenv: Option<HostEnv>,

    /// Scratch directory on the node.
    #[arg(long)]
    tmpdir: Option<String>,

    /// Container image on the shared filesystem.
    #[arg(long)]
    container_src_path: Option<String>,

    /// Where the image is copied on each node (must end in .sif).
    #[arg(long)]
    container_tgt_path: Option<String>,
}

impl SetupCommand {
    /// The role's defaults with every given option applied.
    fn config<Tz>(&self, now: DateTime<Tz>) -> RoleConfig
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let mut config = RoleConfig::defaults(self.role, now);

        let text_fields = [
            (&self.job_name, &mut config.job_name),
            (&self.output, &mut config.output),
            (&self.partition, &mut config.partition),
            (&self.gres, &mut config.gres),
            (&self.time, &mut config.time),
            (&self.tmpdir, &mut config.tmpdir),
            (&self.container_src_path, &mut config.container_src_path),
            (&self.container_tgt_path, &mut config.container_tgt_path),
        ];
        for (given, field) in text_fields {
            if let Some(value) = given {
                *field = value.clone();
            }
        }

        if let Some(cpus) = self.cpus_per_task {
            config.cpus_per_task = cpus;
        }
        if let Some(nodes) = self.nodes {
            config.nodes = nodes;
        }
        if let Some(hostenv) = self.hostenv {
            config.hostenv = hostenv;
        }

        config
    }

    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let store = ctx.store();
        let record = self.config(chrono::Local::now()).to_record()?;
        let stored = store.setup(self.role, &record)?;

        match ctx.format {
            OutputFormat::Json => print_json(&stored),
            OutputFormat::Table => {
                print_success(&format!("Configured {} ({})", self.role.title(), stored.job_name));
                print_snapshot(&store.snapshot()?, ctx.format)?;
            }
        }

        Ok(())
    }
}
