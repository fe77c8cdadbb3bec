//! Batch scheduler interface.
//!
//! The scheduler boundary is thin: hand over a rendered script,
//! get back an exit status and whatever the program printed. Jobs are never
//! retried.
//!
//! Three implementations:
//! - [`SlurmScheduler`] runs `sbatch`
//! - [`MockScheduler`] records submissions without running anything
//! - [`SimulatedScheduler`] pretends to be a cluster and writes role logs

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use syndeo_config::Role;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Submission program used unless overridden.
pub const DEFAULT_SBATCH: &str = "sbatch";

const SUBMITTED_PREFIX: &str = "Submitted batch job ";

/// What the scheduler said about a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub exit_code: i32,

    /// Standard output followed by standard error.
    pub output: String,

    /// Job id, when the output announced one.
    pub job_id: Option<String>,
}

impl SubmittedJob {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        let output = output.into();
        let job_id = parse_job_id(&output);
        Self {
            exit_code,
            output,
            job_id,
        }
    }

    pub fn accepted(&self) -> bool {
        self.exit_code == 0
    }
}

/// Pull the id out of `Submitted batch job <N>`.
pub fn parse_job_id(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once(SUBMITTED_PREFIX)?;
        let id = rest.split_whitespace().next()?;
        id.chars().all(|c| c.is_ascii_digit()).then(|| id.to_string())
    })
}

/// A submission that did not produce a queued job.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The scheduler ran and refused the job.
    #[error("scheduler exited with status {exit_code}: {}", .output.trim())]
    Rejected { exit_code: i32, output: String },

    /// The submission program could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl SubmissionError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            SubmissionError::Rejected { exit_code, .. } => Some(*exit_code),
            SubmissionError::Spawn { .. } => None,
        }
    }

    /// Raw scheduler output, verbatim.
    pub fn output(&self) -> Option<&str> {
        match self {
            SubmissionError::Rejected { output, .. } => Some(output),
            SubmissionError::Spawn { .. } => None,
        }
    }
}

/// Batch scheduler interface.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Hand a rendered script to the scheduler.
    ///
    /// Only a failure to reach the scheduler is an error here. A non-zero exit
    /// comes back in [`SubmittedJob::exit_code`].
    async fn submit(&self, script: &Path) -> Result<SubmittedJob, SubmissionError>;
}

/// Submits through the Slurm `sbatch` command.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    program: String,
}

impl SlurmScheduler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for SlurmScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_SBATCH)
    }
}

#[async_trait]
impl Scheduler for SlurmScheduler {
    async fn submit(&self, script: &Path) -> Result<SubmittedJob, SubmissionError> {
        debug!(program = %self.program, script = %script.display(), "Running submission program");

        let output = Command::new(&self.program)
            .arg(script)
            .output()
            .await
            .map_err(|source| SubmissionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        // Killed by a signal: no exit code, still a refusal.
        let exit_code = output.status.code().unwrap_or(-1);
        Ok(SubmittedJob::new(exit_code, text))
    }
}

/// Scheduler that records submissions and runs nothing.
pub struct MockScheduler {
    exit_code: i32,
    output: Option<String>,
    job_counter: AtomicU64,
    submissions: Mutex<Vec<PathBuf>>,
}

impl MockScheduler {
    /// Accept every job with an increasing job id.
    pub fn new() -> Self {
        Self {
            exit_code: 0,
            output: None,
            job_counter: AtomicU64::new(1000),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Refuse every job with this status and output.
    pub fn rejecting(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: Some(output.into()),
            ..Self::new()
        }
    }

    /// Scripts submitted so far, in order.
    pub fn submissions(&self) -> Vec<PathBuf> {
        lock(&self.submissions).clone()
    }

    pub fn submission_count(&self) -> usize {
        lock(&self.submissions).len()
    }
}

impl Default for MockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for MockScheduler {
    async fn submit(&self, script: &Path) -> Result<SubmittedJob, SubmissionError> {
        lock(&self.submissions).push(script.to_path_buf());

        let output = match &self.output {
            Some(output) => output.clone(),
            None => {
                let id = self.job_counter.fetch_add(1, Ordering::SeqCst);
                format!("{SUBMITTED_PREFIX}{id}\n")
            }
        };

        info!(script = %script.display(), exit_code = self.exit_code, "[MOCK] Submitting job");
        Ok(SubmittedJob::new(self.exit_code, output))
    }
}

/// Scheduler that plays the part of a cluster.
///
/// Each submitted script is read for its `--job-name`, `--output` and `--nodes`
/// directives. A background task then creates the log and appends one readiness
/// marker per node at a fixed interval. Scripts that publish head info get the
/// head lines written too. Jobs whose name is listed as stalled never start.
pub struct SimulatedScheduler {
    interval: Duration,
    marker: String,
    stalled: Vec<String>,
    job_counter: AtomicU64,
    submissions: Mutex<Vec<PathBuf>>,
}

impl SimulatedScheduler {
    pub fn new(interval: Duration, marker: impl Into<String>) -> Self {
        Self {
            interval,
            marker: marker.into(),
            stalled: Vec::new(),
            job_counter: AtomicU64::new(1),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Accept jobs with this name but never start their nodes.
    pub fn with_stalled_job(mut self, job_name: impl Into<String>) -> Self {
        self.stalled.push(job_name.into());
        self
    }

    pub fn submissions(&self) -> Vec<PathBuf> {
        lock(&self.submissions).clone()
    }
}

/// The directives the simulation cares about.
#[derive(Debug, Default, PartialEq, Eq)]
struct ScriptDirectives {
    job_name: Option<String>,
    output: Option<PathBuf>,
    nodes: u32,
    publishes_head: bool,
}

impl ScriptDirectives {
    fn parse(script: &str) -> Self {
        let mut directives = ScriptDirectives {
            nodes: 1,
            ..Default::default()
        };

        for line in script.lines() {
            if let Some(directive) = line.trim().strip_prefix("#SBATCH") {
                let directive = directive.trim();
                if let Some(name) = directive.strip_prefix("--job-name=") {
                    directives.job_name = Some(name.trim().to_string());
                } else if let Some(output) = directive.strip_prefix("--output=") {
                    directives.output = Some(PathBuf::from(output.trim()));
                } else if let Some(nodes) = directive.strip_prefix("--nodes=") {
                    directives.nodes = nodes.trim().parse().unwrap_or(1);
                }
            } else if line.contains("syndeo::head_ip=") {
                directives.publishes_head = true;
            }
        }

        directives
    }
}

#[async_trait]
impl Scheduler for SimulatedScheduler {
    async fn submit(&self, script: &Path) -> Result<SubmittedJob, SubmissionError> {
        lock(&self.submissions).push(script.to_path_buf());

        let text = match tokio::fs::read_to_string(script).await {
            Ok(text) => text,
            Err(e) => {
                return Ok(SubmittedJob::new(
                    1,
                    format!("sbatch: error: Unable to open file {}: {e}\n", script.display()),
                ))
            }
        };

        let directives = ScriptDirectives::parse(&text);
        let Some(log_path) = directives.output.clone() else {
            return Ok(SubmittedJob::new(
                1,
                "sbatch: error: script has no --output directive\n",
            ));
        };

        let job_id = self.job_counter.fetch_add(1, Ordering::SeqCst);
        let stalled = directives
            .job_name
            .as_ref()
            .is_some_and(|name| self.stalled.contains(name));

        if stalled {
            warn!(job_id, log = %log_path.display(), "[SIM] Job accepted but will never start");
        } else {
            info!(job_id, nodes = directives.nodes, log = %log_path.display(), "[SIM] Starting job");
            tokio::spawn(simulate_job(
                job_id,
                log_path,
                directives.nodes,
                directives.publishes_head,
                self.interval,
                self.marker.clone(),
            ));
        }

        Ok(SubmittedJob::new(0, format!("{SUBMITTED_PREFIX}{job_id}\n")))
    }
}

async fn simulate_job(
    job_id: u64,
    log_path: PathBuf,
    nodes: u32,
    publishes_head: bool,
    interval: Duration,
    marker: String,
) {
    let mut lines = Vec::new();
    if publishes_head {
        let ip = format!("10.0.{}.{}", job_id % 250, 1 + job_id % 200);
        lines.push(format!("syndeo::head_id=node{job_id:03}"));
        lines.push(format!("syndeo::head_ip={ip}"));
        lines.push(format!("syndeo::head_addr={ip}:6379"));
    }

    if let Err(e) = append(&log_path, &lines).await {
        error!(job_id, log = %log_path.display(), error = %e, "[SIM] Failed to write log");
        return;
    }

    for node in 0..nodes {
        tokio::time::sleep(interval).await;
        let line = format!("{marker}. Node {node} of job {job_id}");
        if let Err(e) = append(&log_path, &[line]).await {
            error!(job_id, log = %log_path.display(), error = %e, "[SIM] Failed to write log");
            return;
        }
    }
}

async fn append(path: &Path, lines: &[String]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    for line in lines {
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
    }
    file.flush().await
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Submits role scripts and turns refusals into errors.
#[derive(Clone)]
pub struct JobSubmitter {
    scheduler: Arc<dyn Scheduler>,
}

impl JobSubmitter {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self { scheduler }
    }

    pub async fn submit(&self, role: Role, script: &Path) -> Result<SubmittedJob, SubmissionError> {
        let job = self.scheduler.submit(script).await?;

        if !job.accepted() {
            error!(
                role = %role,
                exit_code = job.exit_code,
                output = %job.output.trim(),
                "Scheduler rejected job"
            );
            return Err(SubmissionError::Rejected {
                exit_code: job.exit_code,
                output: job.output,
            });
        }

        info!(
            role = %role,
            job_id = job.job_id.as_deref().unwrap_or("unknown"),
            script = %script.display(),
            "Job submitted"
        );
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::tempdir;

    #[rstest]
    #[case("Submitted batch job 48213\n", Some("48213"))]
    #[case("warning: low priority\nSubmitted batch job 7 on cluster gaia\n", Some("7"))]
    #[case("sbatch: error: invalid partition\n", None)]
    #[case("Submitted batch job abc\n", None)]
    fn test_parse_job_id(#[case] output: &str, #[case] expected: Option<&str>) {
        assert_eq!(parse_job_id(output).as_deref(), expected);
    }

    #[tokio::test]
    async fn test_submitter_accepts() {
        let mock = Arc::new(MockScheduler::new());
        let submitter = JobSubmitter::new(mock.clone());

        let job = submitter
            .submit(Role::Head, Path::new("/state/template_head.sh"))
            .await
            .unwrap();

        assert_eq!(job.job_id.as_deref(), Some("1000"));
        assert_eq!(mock.submissions(), vec![PathBuf::from("/state/template_head.sh")]);
    }

    #[tokio::test]
    async fn test_submitter_rejects_with_verbatim_output() {
        let output = "sbatch: error: Batch job submission failed: Invalid account\n";
        let submitter = JobSubmitter::new(Arc::new(MockScheduler::rejecting(1, output)));

        let err = submitter
            .submit(Role::Cpu, Path::new("template_cpu.sh"))
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), Some(1));
        assert_eq!(err.output(), Some(output));
    }

    #[test]
    fn test_parse_directives() {
        let script = "#!/bin/bash\n\
                      #SBATCH --job-name=ray_head_node\n\
                      #SBATCH --output=/logs/ray_head.log\n\
                      #SBATCH --nodes=3\n\
                      echo \"syndeo::head_ip=$head_node_ip\"\n";

        let directives = ScriptDirectives::parse(script);
        assert_eq!(directives.job_name.as_deref(), Some("ray_head_node"));
        assert_eq!(directives.output, Some(PathBuf::from("/logs/ray_head.log")));
        assert_eq!(directives.nodes, 3);
        assert!(directives.publishes_head);
    }

    #[tokio::test]
    async fn test_simulated_job_writes_markers() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("logs/ray_cpu.log");
        let script = dir.path().join("template_cpu.sh");
        tokio::fs::write(
            &script,
            format!(
                "#SBATCH --job-name=ray_cpu_workers\n#SBATCH --output={}\n#SBATCH --nodes=2\n",
                log.display()
            ),
        )
        .await
        .unwrap();

        let scheduler = SimulatedScheduler::new(Duration::from_millis(10), "Ray runtime started");
        let job = scheduler.submit(&script).await.unwrap();
        assert!(job.accepted());
        assert!(job.job_id.is_some());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let content = tokio::fs::read_to_string(&log).await.unwrap_or_default();
            if content.matches("Ray runtime started").count() == 2 {
                assert!(!content.contains("syndeo::head_ip"));
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "markers never appeared");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_simulated_rejects_script_without_output() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("template_gpu.sh");
        tokio::fs::write(&script, "#SBATCH --nodes=1\n").await.unwrap();

        let scheduler = SimulatedScheduler::new(Duration::from_millis(10), "Ray runtime started");
        let job = scheduler.submit(&script).await.unwrap();
        assert!(!job.accepted());
    }
}
