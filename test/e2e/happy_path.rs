//! End-to-end provisioning runs.
//!
//! Drives the provisioner over the shipped templates with a stand-in for
//! `sbatch`: every submission exits 0, and a log writer plays the compute
//! nodes by appending readiness markers to the job's log at a fixed rate.
//!
//! 1. Configure head, cpu and gpu roles (1, 2 and 1 nodes)
//! 2. Run the provisioner
//! 3. Verify every role is ready and the head info was picked up
//!
//! ## Running
//!
//! ```bash
//! cargo test -p syndeo-e2e --test happy_path
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use syndeo_config::{ConfigStore, Layout, Role, RoleConfig};
use syndeo_provisioner::{
    Provisioner, RoleOutcome, Scheduler, Settings, SubmissionError, SubmittedJob,
};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

const MARKER: &str = "Ray runtime started";
const NODE_INTERVAL: Duration = Duration::from_millis(25);
const TEST_TIMEOUT: Duration = Duration::from_secs(20);

/// What the log writer puts in a head job's log.
#[derive(Clone, Copy)]
enum HeadLines {
    Legacy,
    Malformed,
}

/// Accepts every script and starts a log writer for it.
struct StubSbatch {
    head_lines: HeadLines,
    submitted: Mutex<Vec<PathBuf>>,
}

impl StubSbatch {
    fn new(head_lines: HeadLines) -> Self {
        Self {
            head_lines,
            submitted: Mutex::new(Vec::new()),
        }
    }
}

fn directive<'a>(script: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("#SBATCH --{name}=");
    script
        .lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(str::trim)
}

#[async_trait]
impl Scheduler for StubSbatch {
    async fn submit(&self, script: &Path) -> Result<SubmittedJob, SubmissionError> {
        let text = tokio::fs::read_to_string(script).await.unwrap();
        let log = PathBuf::from(directive(&text, "output").expect("script without --output"));
        let nodes: u32 = directive(&text, "nodes").unwrap().parse().unwrap();
        let head = directive(&text, "job-name") == Some("ray_head_node");

        let job_id = {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(script.to_path_buf());
            submitted.len()
        };

        tokio::spawn(write_log(log, nodes, head.then_some(self.head_lines)));
        Ok(SubmittedJob::new(0, format!("Submitted batch job {job_id}\n")))
    }
}

async fn write_log(path: PathBuf, nodes: u32, head: Option<HeadLines>) {
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    let mut log = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .unwrap();

    let preamble = match head {
        Some(HeadLines::Legacy) => {
            "HEAD Node ID=node001\nHEAD Node IP=10.0.0.5\nHEAD Node Address=10.0.0.5:6379\n"
        }
        Some(HeadLines::Malformed) => {
            "HEAD Node ID=node001\nHEAD Node IP: 10.0.0.5\nHEAD Node Address=10.0.0.5:6379\n"
        }
        None => "",
    };
    log.write_all(preamble.as_bytes()).await.unwrap();

    for node in 0..nodes {
        tokio::time::sleep(NODE_INTERVAL).await;
        log.write_all(format!("{MARKER} on node {node}.\n").as_bytes())
            .await
            .unwrap();
        log.flush().await.unwrap();
    }
}

fn templates() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../templates")
}

/// A scratch workspace with head/cpu/gpu configured for 1/2/1 nodes.
fn workspace() -> (TempDir, Settings) {
    let dir = tempfile::tempdir().unwrap();
    let rooted = Layout::rooted(dir.path());
    let layout = Layout::new(rooted.state_dir, templates(), rooted.log_dir);

    let store = ConfigStore::new(layout.clone());
    for (role, nodes) in [(Role::Head, 1), (Role::Cpu, 2), (Role::Gpu, 1)] {
        let mut config = RoleConfig::defaults(role, chrono::Local::now());
        config.nodes = nodes;
        config.output = format!("ray_{role}_e2e");
        store
            .setup(role, &config.to_record().unwrap())
            .unwrap();
    }

    let settings = Settings {
        layout,
        poll_interval: Duration::from_millis(10),
        ready_timeout: Some(Duration::from_secs(10)),
        ..Settings::default()
    };
    (dir, settings)
}

#[tokio::test]
async fn test_happy_path() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (_dir, settings) = workspace();
    let sbatch = Arc::new(StubSbatch::new(HeadLines::Legacy));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = tokio::time::timeout(
        TEST_TIMEOUT,
        Provisioner::new(&settings, sbatch.clone()).run(shutdown_rx),
    )
    .await
    .expect("provisioning did not finish in time")
    .expect("provisioning failed");

    assert_eq!(sbatch.submitted.lock().unwrap().len(), 3);
    assert!(report.all_ready());
    assert!(matches!(
        report.outcome(Role::Cpu),
        Some(RoleOutcome::Ready { nodes: 2, .. })
    ));

    let cluster = &report.cluster;
    assert_eq!(cluster.head_id.as_deref(), Some("node001"));
    assert_eq!(cluster.head_ip.as_deref(), Some("10.0.0.5"));
    assert_eq!(cluster.head_addr.as_deref(), Some("10.0.0.5:6379"));
    assert!(cluster.is_complete());
    assert!(cluster.ray_ip_dir.starts_with("$HOME/tmp/"));
    assert!(report.parse_errors.is_empty());
}

#[tokio::test]
async fn test_malformed_head_line_is_reported() {
    let (_dir, settings) = workspace();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = tokio::time::timeout(
        TEST_TIMEOUT,
        Provisioner::new(&settings, Arc::new(StubSbatch::new(HeadLines::Malformed)))
            .run(shutdown_rx),
    )
    .await
    .expect("provisioning did not finish in time")
    .expect("provisioning failed");

    assert!(report.all_ready());
    assert_eq!(report.cluster.head_id.as_deref(), Some("node001"));
    assert_eq!(report.cluster.head_ip, None);
    assert_eq!(report.cluster.head_addr.as_deref(), Some("10.0.0.5:6379"));
    assert_eq!(report.parse_errors.len(), 1);
    assert_eq!(report.parse_errors[0].line_number, 2);
}

#[tokio::test]
async fn test_sequential_run() {
    let (_dir, mut settings) = workspace();
    settings.sequential = true;
    let sbatch = Arc::new(StubSbatch::new(HeadLines::Legacy));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = tokio::time::timeout(
        TEST_TIMEOUT,
        Provisioner::new(&settings, sbatch.clone()).run(shutdown_rx),
    )
    .await
    .expect("provisioning did not finish in time")
    .expect("provisioning failed");

    assert!(report.all_ready());
    let order: Vec<String> = sbatch
        .submitted
        .lock()
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(order, ["template_head.sh", "template_cpu.sh", "template_gpu.sh"]);
}
