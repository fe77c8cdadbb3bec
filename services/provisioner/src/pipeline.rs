//! One role's way from configuration to running nodes.
//!
//! load -> validate -> render -> clear stale log -> submit -> await readiness.
//! A missing or invalid config, a cancelled run and a readiness timeout end
//! the pipeline with an outcome; anything else is a [`ProvisionError`].

use std::fmt;
use std::time::Duration;

use syndeo_config::{ConfigStore, Role, RoleConfig, StoreError, ValidationError};
use syndeo_reconcile::{ReadinessError, ReadinessMonitor, ReadinessProgress};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::context::RuntimeContext;
use crate::error::ProvisionError;
use crate::scheduler::JobSubmitter;
use crate::template::{merged_mapping, untouched_tokens, TemplateRenderer};

/// How a role's pipeline ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleOutcome {
    /// No config for this role.
    Skipped,

    /// Config present but unusable; nothing was submitted.
    Invalid(ValidationError),

    /// Every requested node reported in.
    Ready {
        nodes: u32,
        job_id: Option<String>,
        elapsed: Duration,
    },

    /// Gave up waiting.
    TimedOut { ready: u32, requested: u32 },

    /// The run was cancelled while waiting.
    Cancelled { ready: u32, requested: u32 },

    /// The run was cancelled before this role's job went out.
    Aborted { requested: u32 },
}

impl RoleOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, RoleOutcome::Ready { .. })
    }

    /// A job was handed to the scheduler for this role.
    pub fn was_submitted(&self) -> bool {
        matches!(
            self,
            RoleOutcome::Ready { .. } | RoleOutcome::TimedOut { .. } | RoleOutcome::Cancelled { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            RoleOutcome::Skipped => "skipped",
            RoleOutcome::Invalid(_) => "invalid",
            RoleOutcome::Ready { .. } => "ready",
            RoleOutcome::TimedOut { .. } => "timed out",
            RoleOutcome::Cancelled { .. } => "cancelled",
            RoleOutcome::Aborted { .. } => "aborted",
        }
    }
}

impl fmt::Display for RoleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleOutcome::Skipped => write!(f, "skipped (not configured)"),
            RoleOutcome::Invalid(err) => write!(f, "invalid: {err}"),
            RoleOutcome::Ready { nodes, job_id, .. } => match job_id {
                Some(id) => write!(f, "ready: {nodes} node(s), job {id}"),
                None => write!(f, "ready: {nodes} node(s)"),
            },
            RoleOutcome::TimedOut { ready, requested } => {
                write!(f, "timed out: {ready}/{requested} node(s) ready")
            }
            RoleOutcome::Cancelled { ready, requested } => {
                write!(f, "cancelled: {ready}/{requested} node(s) ready")
            }
            RoleOutcome::Aborted { requested } => {
                write!(f, "aborted: {requested} node(s) never submitted")
            }
        }
    }
}

/// Readiness progress tagged with its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleProgress {
    pub role: Role,
    pub progress: ReadinessProgress,
}

/// Readiness settings shared by every role.
#[derive(Debug, Clone)]
pub struct ReadinessSettings {
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
    pub marker: String,
}

/// Runs the per-role steps.
pub struct Pipeline {
    store: ConfigStore,
    submitter: JobSubmitter,
    readiness: ReadinessSettings,
    progress: Option<mpsc::UnboundedSender<RoleProgress>>,
}

impl Pipeline {
    pub fn new(store: ConfigStore, submitter: JobSubmitter, readiness: ReadinessSettings) -> Self {
        Self {
            store,
            submitter,
            readiness,
            progress: None,
        }
    }

    /// Forward readiness progress of every role to `tx`.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<RoleProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub async fn run(
        &self,
        role: Role,
        context: &RuntimeContext,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RoleOutcome, ProvisionError> {
        let config = match self.store.load_role(role) {
            Ok(Some(config)) => config,
            Ok(None) => {
                debug!(role = %role, "Role not configured, skipping");
                return Ok(RoleOutcome::Skipped);
            }
            Err(StoreError::Validation(err)) => {
                warn!(role = %role, error = %err, "Role config invalid, not submitting");
                return Ok(RoleOutcome::Invalid(err));
            }
            Err(source) => return Err(ProvisionError::Config { role, source }),
        };

        if let Some(outcome) = aborted(role, &config, &shutdown) {
            return Ok(outcome);
        }

        let layout = self.store.layout();
        let mapping = merged_mapping(&config, context, &layout.log_dir);
        let template = layout.source_template(role);
        let script = layout.rendered_script(role);

        let rendered = TemplateRenderer::new(&mapping)
            .render(&template, &script)
            .await
            .map_err(|source| ProvisionError::Template {
                role,
                path: template.clone(),
                source,
            })?;

        let leftover = untouched_tokens(&rendered);
        if !leftover.is_empty() {
            warn!(
                role = %role,
                template = %template.display(),
                tokens = ?leftover,
                "Template placeholders left unfilled"
            );
        }

        let monitor = ReadinessMonitor::new(layout.log_path(&config.output), config.nodes)
            .with_marker(self.readiness.marker.clone())
            .with_poll_interval(self.readiness.poll_interval)
            .with_timeout(self.readiness.timeout);

        // Before submission, so a fast job's own log is never removed.
        monitor
            .clear_stale_log()
            .await
            .map_err(|source| ProvisionError::Readiness { role, source })?;

        if let Some(outcome) = aborted(role, &config, &shutdown) {
            return Ok(outcome);
        }

        let job = self
            .submitter
            .submit(role, &script)
            .await
            .map_err(|source| ProvisionError::Submission { role, source })?;

        let reporter = tokio::spawn(report_progress(
            role,
            monitor.subscribe(),
            self.progress.clone(),
        ));
        let result = monitor.await_ready(shutdown).await;
        if monitor.progress().state.is_terminal() {
            // The reporter stops on its own once it has forwarded the final state.
            if let Err(e) = reporter.await {
                debug!(role = %role, error = %e, "Progress reporter ended abnormally");
            }
        } else {
            reporter.abort();
        }

        match result {
            Ok(report) => {
                info!(
                    role = %role,
                    nodes = report.ready,
                    partition = %config.partition,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    log = %monitor.log_path().display(),
                    "Nodes started"
                );
                Ok(RoleOutcome::Ready {
                    nodes: report.ready,
                    job_id: job.job_id,
                    elapsed: report.elapsed,
                })
            }
            Err(ReadinessError::Timeout {
                ready, requested, ..
            }) => {
                warn!(role = %role, ready, requested, "Timed out waiting for nodes");
                Ok(RoleOutcome::TimedOut { ready, requested })
            }
            Err(ReadinessError::Cancelled { ready, .. }) => {
                info!(role = %role, ready, "Stopped waiting for nodes");
                Ok(RoleOutcome::Cancelled {
                    ready,
                    requested: config.nodes,
                })
            }
            Err(source) => Err(ProvisionError::Readiness { role, source }),
        }
    }
}

fn aborted(
    role: Role,
    config: &RoleConfig,
    shutdown: &watch::Receiver<bool>,
) -> Option<RoleOutcome> {
    if !*shutdown.borrow() {
        return None;
    }
    info!(role = %role, "Run cancelled, not submitting");
    Some(RoleOutcome::Aborted {
        requested: config.nodes,
    })
}

async fn report_progress(
    role: Role,
    mut updates: watch::Receiver<ReadinessProgress>,
    sink: Option<mpsc::UnboundedSender<RoleProgress>>,
) {
    let mut last_ready = None;

    while updates.changed().await.is_ok() {
        let progress = *updates.borrow_and_update();

        if last_ready != Some(progress.ready) {
            info!(
                role = %role,
                ready = progress.ready,
                requested = progress.requested,
                "Registering nodes"
            );
            last_ready = Some(progress.ready);
        }

        if let Some(sink) = &sink {
            if sink.send(RoleProgress { role, progress }).is_err() {
                break;
            }
        }

        if progress.state.is_terminal() {
            break;
        }
    }
}
