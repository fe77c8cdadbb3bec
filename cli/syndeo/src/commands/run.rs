//! Provision the configured roles.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use syndeo_provisioner::{
    ClusterInfo, Provisioner, RoleOutcome, RunReport, Scheduler, SimulatedScheduler,
    SlurmScheduler,
};
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::error::CliError;
use crate::output::{
    print_cluster_table, print_config_table, print_info, print_json, print_outcome,
    print_progress, print_success, print_warning, OutputFormat,
};

use super::CommandContext;

/// Node start interval of the simulated cluster.
const SIMULATED_NODE_INTERVAL: Duration = Duration::from_millis(500);

/// Submit every configured role and wait until its nodes are up.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Give up waiting on a role after this many seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Start head, cpu and gpu one after another.
    #[arg(long)]
    sequential: bool,

    /// Simulate the cluster instead of calling sbatch.
    #[arg(long)]
    simulate: bool,
}

#[derive(Debug, Serialize)]
struct RoleView {
    role: String,
    status: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunView<'a> {
    cluster: &'a ClusterInfo,
    roles: Vec<RoleView>,
    parse_errors: Vec<String>,
}

impl<'a> From<&'a RunReport> for RunView<'a> {
    fn from(report: &'a RunReport) -> Self {
        let roles = report
            .roles
            .iter()
            .map(|r| RoleView {
                role: r.role.to_string(),
                status: r.outcome.label(),
                detail: r.outcome.to_string(),
                job_id: match &r.outcome {
                    RoleOutcome::Ready { job_id, .. } => job_id.clone(),
                    _ => None,
                },
            })
            .collect();

        Self {
            cluster: &report.cluster,
            roles,
            parse_errors: report.parse_errors.iter().map(ToString::to_string).collect(),
        }
    }
}

impl RunCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let mut settings = ctx.settings.clone();
        if let Some(secs) = self.timeout {
            settings.ready_timeout = Some(Duration::from_secs(secs));
        }
        if self.sequential {
            settings.sequential = true;
        }

        let snapshot = ctx.store().snapshot()?;
        if snapshot.iter().all(|(_, config)| config.is_none()) {
            return Err(CliError::NothingConfigured.into());
        }

        let table = ctx.format == OutputFormat::Table;
        if table {
            print_config_table(&snapshot);
        }

        let scheduler: Arc<dyn Scheduler> = if self.simulate {
            if table {
                print_info("Simulating the cluster, nothing is submitted to Slurm");
            }
            Arc::new(SimulatedScheduler::new(
                SIMULATED_NODE_INTERVAL,
                settings.ready_marker.clone(),
            ))
        } else {
            Arc::new(SlurmScheduler::new(settings.sbatch_program.clone()))
        };

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let provisioner = Provisioner::with_progress(&settings, scheduler, progress_tx);
        let printer = tokio::spawn(print_progress_updates(progress_rx, table));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let signal = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping");
                let _ = shutdown_tx.send(true);
            }
        });

        let result = provisioner.run(shutdown_rx).await;
        signal.abort();
        drop(provisioner);
        let _ = printer.await;

        let report = result?;

        match ctx.format {
            OutputFormat::Json => print_json(&RunView::from(&report)),
            OutputFormat::Table => {
                println!();
                for role in &report.roles {
                    print_outcome(role);
                }
                for err in &report.parse_errors {
                    print_warning(&format!("Head log: {err}"));
                }
                println!();
                print_cluster_table(&report.cluster);

                if report.all_ready() {
                    print_success("Ray cluster is up");
                } else {
                    print_warning("Not every configured role came up");
                }
            }
        }

        Ok(())
    }
}

async fn print_progress_updates(
    mut updates: mpsc::UnboundedReceiver<syndeo_provisioner::RoleProgress>,
    enabled: bool,
) {
    let mut last = BTreeMap::new();
    while let Some(update) = updates.recv().await {
        if !enabled {
            continue;
        }
        if last.insert(update.role, update.progress.ready) != Some(update.progress.ready) {
            print_progress(&update);
        }
    }
}
