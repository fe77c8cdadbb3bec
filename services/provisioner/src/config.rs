//! Runtime settings for the provisioner.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use syndeo_config::{Layout, DEFAULT_LOG_DIR, DEFAULT_STATE_DIR, DEFAULT_TEMPLATE_DIR};
use syndeo_reconcile::{DEFAULT_POLL_INTERVAL, DEFAULT_READY_MARKER};

use crate::context::DEFAULT_ID_LENGTH;
use crate::logging::LogFormat;
use crate::scheduler::DEFAULT_SBATCH;

/// Provisioner settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Where role records, templates and logs live.
    pub layout: Layout,

    /// How often a role log is re-read while waiting for readiness.
    pub poll_interval: Duration,

    /// Give up on a role after this long. `None` waits forever.
    pub ready_timeout: Option<Duration>,

    /// Length of the random staging identifier.
    pub id_length: usize,

    /// Line fragment written once per started node.
    pub ready_marker: String,

    /// Run head, cpu and gpu one after another instead of concurrently.
    pub sequential: bool,

    /// Program used to submit batch scripts.
    pub sbatch_program: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            ready_timeout: None,
            id_length: DEFAULT_ID_LENGTH,
            ready_marker: DEFAULT_READY_MARKER.to_string(),
            sequential: false,
            sbatch_program: DEFAULT_SBATCH.to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
        }
    }
}

impl Settings {
    /// Load settings from `SYNDEO_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dir = |name: &str, default: &str| {
            PathBuf::from(lookup(name).unwrap_or_else(|| default.to_string()))
        };
        let layout = Layout::new(
            dir("SYNDEO_STATE_DIR", DEFAULT_STATE_DIR),
            dir("SYNDEO_TEMPLATE_DIR", DEFAULT_TEMPLATE_DIR),
            dir("SYNDEO_LOG_DIR", DEFAULT_LOG_DIR),
        );

        let poll_interval = parse_var::<u64, _>(&lookup, "SYNDEO_POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let ready_timeout =
            parse_var::<u64, _>(&lookup, "SYNDEO_READY_TIMEOUT_SECS")?.map(Duration::from_secs);

        let id_length =
            parse_var::<usize, _>(&lookup, "SYNDEO_ID_LENGTH")?.unwrap_or(DEFAULT_ID_LENGTH);
        if id_length == 0 {
            anyhow::bail!("SYNDEO_ID_LENGTH must be at least 1");
        }

        let ready_marker = lookup("SYNDEO_READY_MARKER")
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_READY_MARKER.to_string());

        let sequential = parse_var::<bool, _>(&lookup, "SYNDEO_SEQUENTIAL")?.unwrap_or(false);

        let sbatch_program =
            lookup("SYNDEO_SBATCH").unwrap_or_else(|| DEFAULT_SBATCH.to_string());

        let log_level = lookup("SYNDEO_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let log_format = parse_var::<LogFormat, _>(&lookup, "SYNDEO_LOG_FORMAT")?
            .unwrap_or(LogFormat::Compact);

        Ok(Self {
            layout,
            poll_interval,
            ready_timeout,
            id_length,
            ready_marker,
            sequential,
            sbatch_program,
            log_level,
            log_format,
        })
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .with_context(|| format!("invalid {name}: '{raw}'"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.layout, Layout::default());
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.ready_timeout, None);
        assert_eq!(settings.id_length, 3);
        assert_eq!(settings.ready_marker, "Ray runtime started");
        assert!(!settings.sequential);
        assert_eq!(settings.sbatch_program, "sbatch");
        assert_eq!(settings.log_format, LogFormat::Compact);
    }

    #[test]
    fn test_overrides() {
        let settings = settings(&[
            ("SYNDEO_STATE_DIR", "/scratch/state"),
            ("SYNDEO_LOG_DIR", "/scratch/logs"),
            ("SYNDEO_POLL_INTERVAL_MS", "50"),
            ("SYNDEO_READY_TIMEOUT_SECS", "600"),
            ("SYNDEO_ID_LENGTH", "8"),
            ("SYNDEO_SEQUENTIAL", "true"),
            ("SYNDEO_SBATCH", "/opt/slurm/bin/sbatch"),
            ("SYNDEO_LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(settings.layout.state_dir, PathBuf::from("/scratch/state"));
        assert_eq!(settings.layout.log_dir, PathBuf::from("/scratch/logs"));
        assert_eq!(settings.layout.template_dir, PathBuf::from("templates"));
        assert_eq!(settings.poll_interval, Duration::from_millis(50));
        assert_eq!(settings.ready_timeout, Some(Duration::from_secs(600)));
        assert_eq!(settings.id_length, 8);
        assert!(settings.sequential);
        assert_eq!(settings.sbatch_program, "/opt/slurm/bin/sbatch");
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn test_rejects_garbage_numbers() {
        let err = settings(&[("SYNDEO_POLL_INTERVAL_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("SYNDEO_POLL_INTERVAL_MS"));

        assert!(settings(&[("SYNDEO_ID_LENGTH", "0")]).is_err());
    }
}
