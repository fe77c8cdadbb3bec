//! Runs every role's pipeline and assembles the result.

use std::collections::BTreeMap;
use std::sync::Arc;

use syndeo_config::{ConfigStore, Layout, Role};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::cluster_info::{self, ClusterInfo, Extraction, ParseError};
use crate::config::Settings;
use crate::context::RuntimeContext;
use crate::error::ProvisionError;
use crate::pipeline::{Pipeline, ReadinessSettings, RoleOutcome, RoleProgress};
use crate::scheduler::{JobSubmitter, Scheduler};

/// One role's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleReport {
    pub role: Role,
    pub outcome: RoleOutcome,
}

/// Result of a provisioning run that was not aborted.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub cluster: ClusterInfo,
    /// One entry per role, in head, cpu, gpu order.
    pub roles: Vec<RoleReport>,
    /// Head log lines that could not be read.
    pub parse_errors: Vec<ParseError>,
}

impl RunReport {
    pub fn outcome(&self, role: Role) -> Option<&RoleOutcome> {
        self.roles
            .iter()
            .find(|report| report.role == role)
            .map(|report| &report.outcome)
    }

    /// Every configured role came up.
    pub fn all_ready(&self) -> bool {
        self.roles
            .iter()
            .all(|r| matches!(r.outcome, RoleOutcome::Skipped) || r.outcome.is_ready())
    }
}

/// Drives a whole provisioning run.
pub struct Provisioner {
    pipeline: Arc<Pipeline>,
    layout: Layout,
    id_length: usize,
    sequential: bool,
}

impl Provisioner {
    pub fn new(settings: &Settings, scheduler: Arc<dyn Scheduler>) -> Self {
        Self::with_pipeline(settings, |pipeline| pipeline, scheduler)
    }

    /// Like [`Provisioner::new`], forwarding readiness progress to `tx`.
    pub fn with_progress(
        settings: &Settings,
        scheduler: Arc<dyn Scheduler>,
        tx: mpsc::UnboundedSender<RoleProgress>,
    ) -> Self {
        Self::with_pipeline(settings, |pipeline| pipeline.with_progress(tx), scheduler)
    }

    fn with_pipeline(
        settings: &Settings,
        customize: impl FnOnce(Pipeline) -> Pipeline,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let pipeline = Pipeline::new(
            ConfigStore::new(settings.layout.clone()),
            JobSubmitter::new(scheduler),
            ReadinessSettings {
                poll_interval: settings.poll_interval,
                timeout: settings.ready_timeout,
                marker: settings.ready_marker.clone(),
            },
        );

        Self {
            pipeline: Arc::new(customize(pipeline)),
            layout: settings.layout.clone(),
            id_length: settings.id_length,
            sequential: settings.sequential,
        }
    }

    /// Provision every configured role.
    ///
    /// Flipping `shutdown` to `true` stops every readiness wait and every
    /// submission not yet made; the report shows those roles as cancelled or
    /// aborted. A submission failure in any
    /// role cancels the others and aborts the run.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<RunReport, ProvisionError> {
        let context = RuntimeContext::generate(self.id_length);
        context
            .persist(&self.layout.runtime_path())
            .map_err(ProvisionError::RuntimeContext)?;
        info!(ray_ip_dir = %context.ray_ip_dir, "Runtime context generated");

        let (cancel_tx, cancel_rx) = watch::channel(*shutdown.borrow());
        let cancel_tx = Arc::new(cancel_tx);
        let forwarder = tokio::spawn(forward_shutdown(shutdown, Arc::clone(&cancel_tx)));

        let result = if self.sequential {
            self.run_sequential(&context, cancel_rx).await
        } else {
            self.run_concurrent(Arc::new(context.clone()), cancel_rx, &cancel_tx)
                .await
        };
        forwarder.abort();
        let mut outcomes = result?;

        let head_submitted = outcomes
            .get(&Role::Head)
            .is_some_and(RoleOutcome::was_submitted);
        let extraction = if head_submitted {
            match cluster_info::extract(&self.layout).await {
                Ok(extraction) => extraction,
                Err(e) => {
                    warn!(error = %e, "Could not read head log");
                    Extraction::default()
                }
            }
        } else {
            Extraction::default()
        };

        for err in &extraction.errors {
            warn!(line_number = err.line_number, marker = %err.marker, line = %err.line, "Unreadable head log line");
        }

        let cluster = ClusterInfo::new(extraction.head, context.ray_ip_dir);
        if head_submitted && !cluster.is_complete() {
            warn!("Head info incomplete");
        }

        let roles = Role::ALL
            .into_iter()
            .map(|role| RoleReport {
                role,
                outcome: outcomes.remove(&role).unwrap_or(RoleOutcome::Skipped),
            })
            .collect();

        Ok(RunReport {
            cluster,
            roles,
            parse_errors: extraction.errors,
        })
    }

    async fn run_sequential(
        &self,
        context: &RuntimeContext,
        cancel: watch::Receiver<bool>,
    ) -> Result<BTreeMap<Role, RoleOutcome>, ProvisionError> {
        let mut outcomes = BTreeMap::new();
        for role in Role::ALL {
            // Once cancelled, later roles still load their config but stop short of submitting.
            let outcome = self.pipeline.run(role, context, cancel.clone()).await?;
            outcomes.insert(role, outcome);
        }
        Ok(outcomes)
    }

    async fn run_concurrent(
        &self,
        context: Arc<RuntimeContext>,
        cancel: watch::Receiver<bool>,
        cancel_tx: &watch::Sender<bool>,
    ) -> Result<BTreeMap<Role, RoleOutcome>, ProvisionError> {
        let mut tasks = JoinSet::new();
        for role in Role::ALL {
            let pipeline = Arc::clone(&self.pipeline);
            let context = Arc::clone(&context);
            let cancel = cancel.clone();
            tasks.spawn(async move { (role, pipeline.run(role, &context, cancel).await) });
        }

        let mut outcomes = BTreeMap::new();
        let mut fatal = None;

        while let Some(joined) = tasks.join_next().await {
            let err = match joined {
                Ok((role, Ok(outcome))) => {
                    outcomes.insert(role, outcome);
                    continue;
                }
                Ok((_, Err(err))) => err,
                Err(join_err) => ProvisionError::Task(join_err.to_string()),
            };

            if fatal.is_none() {
                error!(error = %err, "Aborting run, cancelling remaining roles");
                cancel_tx.send_replace(true);
                fatal = Some(err);
            } else {
                warn!(error = %err, "Further failure while aborting");
            }
        }

        match fatal {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }
}

/// Trip `cancel` once the caller's `shutdown` reads `true`.
async fn forward_shutdown(mut shutdown: watch::Receiver<bool>, cancel: Arc<watch::Sender<bool>>) {
    loop {
        if *shutdown.borrow_and_update() {
            cancel.send_replace(true);
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
