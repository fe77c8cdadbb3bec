//! Readiness reconciliation primitives.
//!
//! A submitted batch job is only observable through the log file the
//! scheduler writes for it. Each node that finishes starting appends a
//! readiness marker; a role is ready once the marker count reaches the node
//! count it asked for.
//!
//! ```text
//! AwaitingLogFile ──(log appears)──▶ Polling ──(count >= requested)──▶ Ready
//!        │                              │
//!        └──────(timeout)───────────────┴──▶ Failed
//!        └──────(shutdown)──────────────┴──▶ Cancelled
//! ```
//!
//! # Invariants
//!
//! - A stale log from a previous run is removed before the job is submitted
//! - The monitor never reports ready before the requested count is observed
//! - A half-written line is just "not yet ready", never an error

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Default interval between log reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Line the Ray runtime prints once per started node.
pub const DEFAULT_READY_MARKER: &str = "Ray runtime started";

/// Readiness errors.
#[derive(Debug, Error)]
pub enum ReadinessError {
    /// The requested node count was not observed in time.
    #[error(
        "timeout after {elapsed:?} waiting for {} ({ready}/{requested} nodes ready)",
        .log_path.display()
    )]
    Timeout {
        log_path: PathBuf,
        ready: u32,
        requested: u32,
        elapsed: Duration,
    },

    /// Shutdown was requested while waiting.
    #[error("cancelled while waiting for {} ({ready} nodes ready)", .log_path.display())]
    Cancelled { log_path: PathBuf, ready: u32 },

    /// The log exists but could not be read or removed.
    #[error("log {} not accessible: {source}", .log_path.display())]
    Io {
        log_path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ReadinessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Where a monitor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    /// Job submitted, log file not created yet.
    AwaitingLogFile,

    /// Log exists, counting markers.
    Polling,

    /// Requested node count reached.
    Ready,

    /// Timed out.
    Failed,

    /// Shutdown requested.
    Cancelled,
}

impl ReadinessState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns true once no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot published on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessProgress {
    pub state: ReadinessState,
    pub ready: u32,
    pub requested: u32,
}

/// Outcome of a successful wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessReport {
    pub ready: u32,
    pub requested: u32,
    pub elapsed: Duration,
}

/// Count non-overlapping occurrences of `marker` in `content`.
pub fn count_markers(content: &str, marker: &str) -> u32 {
    if marker.is_empty() {
        return 0;
    }
    content.matches(marker).count() as u32
}

/// Watches one role's log until its nodes report ready.
#[derive(Debug)]
pub struct ReadinessMonitor {
    log_path: PathBuf,
    marker: String,
    requested: u32,
    poll_interval: Duration,
    timeout: Option<Duration>,
    progress: watch::Sender<ReadinessProgress>,
}

impl ReadinessMonitor {
    /// Monitor `log_path` until `requested` markers have been written.
    pub fn new(log_path: impl Into<PathBuf>, requested: u32) -> Self {
        let (progress, _) = watch::channel(ReadinessProgress {
            state: ReadinessState::AwaitingLogFile,
            ready: 0,
            requested,
        });

        Self {
            log_path: log_path.into(),
            marker: DEFAULT_READY_MARKER.to_string(),
            requested,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            progress,
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bound the wait. `None` waits for as long as it takes.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn requested(&self) -> u32 {
        self.requested
    }

    /// Receive a progress snapshot after every poll.
    pub fn subscribe(&self) -> watch::Receiver<ReadinessProgress> {
        self.progress.subscribe()
    }

    /// Latest published progress.
    pub fn progress(&self) -> ReadinessProgress {
        *self.progress.borrow()
    }

    /// Remove a log left behind by an earlier run.
    ///
    /// Must run before the job is submitted, otherwise the job's own fresh log
    /// could be deleted. Returns whether a file was removed.
    pub async fn clear_stale_log(&self) -> Result<bool, ReadinessError> {
        match tokio::fs::remove_file(&self.log_path).await {
            Ok(()) => {
                debug!(log_path = %self.log_path.display(), "Removed stale log");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ReadinessError::Io {
                log_path: self.log_path.clone(),
                source,
            }),
        }
    }

    /// Block until the requested node count is observed in the log.
    ///
    /// Re-reads the whole file on every poll. Stops early only on timeout or
    /// when `shutdown` flips to `true`.
    pub async fn await_ready(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ReadinessReport, ReadinessError> {
        let started = Instant::now();
        let deadline = self.timeout.map(|timeout| started + timeout);
        let mut ready = 0u32;
        let mut state = ReadinessState::AwaitingLogFile;

        self.publish(state, ready);

        loop {
            if *shutdown.borrow() {
                return Err(self.cancel(ready));
            }

            match tokio::fs::read(&self.log_path).await {
                Ok(bytes) => {
                    if state == ReadinessState::AwaitingLogFile {
                        debug!(log_path = %self.log_path.display(), "Log file appeared");
                        state = ReadinessState::Polling;
                    }

                    let content = String::from_utf8_lossy(&bytes);
                    let count = count_markers(&content, &self.marker);
                    if count != ready {
                        debug!(
                            log_path = %self.log_path.display(),
                            ready = count,
                            requested = self.requested,
                            "Nodes registering"
                        );
                    }
                    ready = count;

                    if ready >= self.requested {
                        self.publish(ReadinessState::Ready, ready);
                        let elapsed = started.elapsed();
                        info!(
                            log_path = %self.log_path.display(),
                            ready,
                            requested = self.requested,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "All requested nodes started"
                        );
                        return Ok(ReadinessReport {
                            ready,
                            requested: self.requested,
                            elapsed,
                        });
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(ReadinessError::Io {
                        log_path: self.log_path.clone(),
                        source,
                    })
                }
            }

            self.publish(state, ready);

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.publish(ReadinessState::Failed, ready);
                    return Err(ReadinessError::Timeout {
                        log_path: self.log_path.clone(),
                        ready,
                        requested: self.requested,
                        elapsed: started.elapsed(),
                    });
                }
            }

            let mut wake = Instant::now() + self.poll_interval;
            if let Some(deadline) = deadline {
                wake = wake.min(deadline);
            }

            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                _ = cancelled(&mut shutdown) => {
                    return Err(self.cancel(ready));
                }
            }
        }
    }

    fn cancel(&self, ready: u32) -> ReadinessError {
        self.publish(ReadinessState::Cancelled, ready);
        debug!(log_path = %self.log_path.display(), ready, "Readiness wait cancelled");
        ReadinessError::Cancelled {
            log_path: self.log_path.clone(),
            ready,
        }
    }

    fn publish(&self, state: ReadinessState, ready: u32) {
        self.progress.send_replace(ReadinessProgress {
            state,
            ready,
            requested: self.requested,
        });
    }
}

/// Resolves once `shutdown` reads `true`. A dropped sender never cancels.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
