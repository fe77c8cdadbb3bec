//! Role and role configuration types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Sentinel for an unset path or resource request.
pub const UNSET: &str = "n/a";

/// Suffix a container target image must carry.
pub const CONTAINER_IMAGE_SUFFIX: &str = ".sif";

/// Where the container image is copied on the compute node unless told otherwise.
pub const DEFAULT_CONTAINER_TGT_PATH: &str = "/tmp/ray_container.sif";

/// Host-side scratch directory.
pub const DEFAULT_TMPDIR: &str = "/tmp";

/// Wall-clock limit, `days-hours:min:secs`.
pub const DEFAULT_TIME_LIMIT: &str = "0-00:05:00";

/// Keys a persisted record must carry. `tmpdir` is optional and defaults.
pub const REQUIRED_KEYS: [&str; 10] = [
    "job_name",
    "output",
    "cpus_per_task",
    "nodes",
    "partition",
    "gres",
    "time",
    "hostenv",
    "container_src_path",
    "container_tgt_path",
];

/// Human labels for the record fields, in record order.
pub const PARAMETER_LABELS: [&str; 11] = [
    "Job Name",
    "Output File",
    "CPU/Task",
    "Nodes",
    "Partition",
    "GPUs",
    "Time Limit",
    "HostEnv",
    "TmpDir",
    "Container Source",
    "Container Target",
];

/// Flat key/value record as stored on disk.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A class of nodes in the provisioned cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Head,
    Cpu,
    Gpu,
}

impl Role {
    /// All roles in submission order.
    pub const ALL: [Role; 3] = [Role::Head, Role::Cpu, Role::Gpu];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Head => "head",
            Role::Cpu => "cpu",
            Role::Gpu => "gpu",
        }
    }

    /// Column title used when showing configuration.
    pub fn title(&self) -> &'static str {
        match self {
            Role::Head => "Head Node",
            Role::Cpu => "Worker Nodes - CPU",
            Role::Gpu => "Worker Nodes - GPU",
        }
    }

    fn default_job_name(&self) -> &'static str {
        match self {
            Role::Head => "ray_head_node",
            Role::Cpu => "ray_cpu_workers",
            Role::Gpu => "ray_gpu_workers",
        }
    }

    fn default_partition(&self) -> &'static str {
        match self {
            Role::Head | Role::Cpu => "normal",
            Role::Gpu => "gaia",
        }
    }

    fn default_gres(&self) -> &'static str {
        match self {
            Role::Head | Role::Cpu => UNSET,
            Role::Gpu => "gpu:volta:2",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "head" => Ok(Role::Head),
            "cpu" => Ok(Role::Cpu),
            "gpu" => Ok(Role::Gpu),
            other => Err(ValidationError::UnknownRole(other.to_string())),
        }
    }
}

/// Where the role's runtime executes on the compute node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostEnv {
    /// Inside a Singularity/Apptainer image.
    Container,
    /// Directly on the host.
    #[default]
    BareMetal,
}

impl HostEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostEnv::Container => "container",
            HostEnv::BareMetal => "bare_metal",
        }
    }
}

impl fmt::Display for HostEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostEnv {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "container" => Ok(HostEnv::Container),
            "bare_metal" => Ok(HostEnv::BareMetal),
            other => Err(ValidationError::UnknownHostEnv(other.to_string())),
        }
    }
}

fn default_tmpdir() -> String {
    DEFAULT_TMPDIR.to_string()
}

/// Configuration for one role's batch job.
///
/// Field names are the on-disk keys and, uppercased, the template tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Scheduler job name.
    pub job_name: String,

    /// Log base name; the job writes `<log_dir>/<output>.log`.
    pub output: String,

    pub cpus_per_task: u32,

    /// Number of nodes requested; also the readiness target.
    pub nodes: u32,

    pub partition: String,

    /// Generic resource request, e.g. `gpu:volta:2`.
    pub gres: String,

    /// Wall-clock limit.
    pub time: String,

    pub hostenv: HostEnv,

    #[serde(default = "default_tmpdir")]
    pub tmpdir: String,

    pub container_src_path: String,

    pub container_tgt_path: String,
}

impl RoleConfig {
    /// Defaults for a freshly set up role. `now` stamps the output name.
    pub fn defaults<Tz>(role: Role, now: DateTime<Tz>) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        Self {
            job_name: role.default_job_name().to_string(),
            output: format!("ray_{}_{}", role, now.format("%-m-%-d-%y_%H:%M:%S")),
            cpus_per_task: 1,
            nodes: 1,
            partition: role.default_partition().to_string(),
            gres: role.default_gres().to_string(),
            time: DEFAULT_TIME_LIMIT.to_string(),
            hostenv: HostEnv::BareMetal,
            tmpdir: default_tmpdir(),
            container_src_path: UNSET.to_string(),
            container_tgt_path: DEFAULT_CONTAINER_TGT_PATH.to_string(),
        }
    }

    /// Build a config from a stored record.
    ///
    /// Every key in [`REQUIRED_KEYS`] must be present; all missing keys are
    /// reported together.
    pub fn from_record(record: &Record) -> Result<Self, ValidationError> {
        let missing: Vec<String> = REQUIRED_KEYS
            .iter()
            .filter(|key| !record.contains_key(**key))
            .map(|key| key.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(ValidationError::MissingKeys(missing));
        }

        serde_json::from_value(serde_json::Value::Object(record.clone()))
            .map_err(|e| ValidationError::InvalidField(e.to_string()))
    }

    /// Serialize into the flat on-disk record.
    pub fn to_record(&self) -> Result<Record, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(record) => Ok(record),
            other => Err(serde::ser::Error::custom(format!(
                "role config serialized to non-object: {other}"
            ))),
        }
    }

    /// Check the container invariants.
    ///
    /// Bare-metal configs always pass. Container configs need an existing
    /// source image and a `.sif` target.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.hostenv != HostEnv::Container {
            return Ok(());
        }

        let src = self.container_src_path.trim();
        if src.is_empty() || src == UNSET {
            return Err(ValidationError::ContainerSourceUnset);
        }

        let path = expand_home(src);
        if !path.exists() {
            return Err(ValidationError::ContainerSourceMissing { path });
        }

        if !self.container_tgt_path.ends_with(CONTAINER_IMAGE_SUFFIX) {
            return Err(ValidationError::ContainerTargetSuffix {
                path: self.container_tgt_path.clone(),
            });
        }

        Ok(())
    }

    /// Key/value pairs for template substitution, values stringified.
    pub fn to_mapping(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("job_name".to_string(), self.job_name.clone()),
            ("output".to_string(), self.output.clone()),
            ("cpus_per_task".to_string(), self.cpus_per_task.to_string()),
            ("nodes".to_string(), self.nodes.to_string()),
            ("partition".to_string(), self.partition.clone()),
            ("gres".to_string(), self.gres.clone()),
            ("time".to_string(), self.time.clone()),
            ("hostenv".to_string(), self.hostenv.to_string()),
            ("tmpdir".to_string(), self.tmpdir.clone()),
            (
                "container_src_path".to_string(),
                self.container_src_path.clone(),
            ),
            (
                "container_tgt_path".to_string(),
                self.container_tgt_path.clone(),
            ),
        ])
    }

    /// Field values in [`PARAMETER_LABELS`] order.
    pub fn parameter_values(&self) -> [String; 11] {
        [
            self.job_name.clone(),
            self.output.clone(),
            self.cpus_per_task.to_string(),
            self.nodes.to_string(),
            self.partition.clone(),
            self.gres.clone(),
            self.time.clone(),
            self.hostenv.to_string(),
            self.tmpdir.clone(),
            self.container_src_path.clone(),
            self.container_tgt_path.clone(),
        ]
    }
}

/// Expand a leading `~` against `$HOME`.
fn expand_home(path: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (path, home) {
        ("~", Some(home)) => home,
        (p, Some(home)) if p.starts_with("~/") => home.join(&p[2..]),
        (p, _) => PathBuf::from(p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use rstest::rstest;
    use tempfile::tempdir;

    fn config(role: Role) -> RoleConfig {
        let now = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        RoleConfig::defaults(role, now)
    }

    #[test]
    fn test_defaults_per_role() {
        let head = config(Role::Head);
        assert_eq!(head.job_name, "ray_head_node");
        assert_eq!(head.output, "ray_head_3-7-24_09:05:02");
        assert_eq!(head.partition, "normal");
        assert_eq!(head.gres, UNSET);

        let gpu = config(Role::Gpu);
        assert_eq!(gpu.job_name, "ray_gpu_workers");
        assert_eq!(gpu.partition, "gaia");
        assert_eq!(gpu.gres, "gpu:volta:2");
        assert_eq!(gpu.container_tgt_path, DEFAULT_CONTAINER_TGT_PATH);
    }

    #[rstest]
    #[case("head", Role::Head)]
    #[case("CPU", Role::Cpu)]
    #[case(" gpu ", Role::Gpu)]
    fn test_role_from_str(#[case] input: &str, #[case] expected: Role) {
        assert_eq!(input.parse::<Role>().unwrap(), expected);
    }

    #[test]
    fn test_role_from_str_unknown() {
        let err = "login".parse::<Role>().unwrap_err();
        assert_eq!(err, ValidationError::UnknownRole("login".to_string()));
    }

    #[test]
    fn test_from_record_reports_all_missing_keys() {
        let mut record = config(Role::Cpu).to_record().unwrap();
        record.remove("nodes");
        record.remove("gres");

        let err = RoleConfig::from_record(&record).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingKeys(vec!["nodes".to_string(), "gres".to_string()])
        );
    }

    #[test]
    fn test_from_record_tmpdir_is_optional() {
        let mut record = config(Role::Cpu).to_record().unwrap();
        record.remove("tmpdir");

        let parsed = RoleConfig::from_record(&record).unwrap();
        assert_eq!(parsed.tmpdir, DEFAULT_TMPDIR);
    }

    #[test]
    fn test_from_record_rejects_wrong_type() {
        let mut record = config(Role::Cpu).to_record().unwrap();
        record.insert("nodes".to_string(), serde_json::json!("two"));

        let err = RoleConfig::from_record(&record).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField(_)));
    }

    #[test]
    fn test_record_uses_snake_case_hostenv() {
        let mut cfg = config(Role::Head);
        cfg.hostenv = HostEnv::BareMetal;
        let record = cfg.to_record().unwrap();
        assert_eq!(record["hostenv"], serde_json::json!("bare_metal"));
    }

    #[test]
    fn test_bare_metal_ignores_container_paths() {
        let mut cfg = config(Role::Cpu);
        cfg.container_src_path = "/does/not/exist".to_string();
        cfg.container_tgt_path = "/tmp/image.img".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[rstest]
    #[case(UNSET)]
    #[case("")]
    fn test_container_requires_source(#[case] src: &str) {
        let mut cfg = config(Role::Cpu);
        cfg.hostenv = HostEnv::Container;
        cfg.container_src_path = src.to_string();
        assert_eq!(cfg.validate(), Err(ValidationError::ContainerSourceUnset));
    }

    #[test]
    fn test_container_requires_existing_source() {
        let dir = tempdir().unwrap();
        let mut cfg = config(Role::Cpu);
        cfg.hostenv = HostEnv::Container;
        cfg.container_src_path = dir.path().join("missing.sif").display().to_string();

        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ValidationError::ContainerSourceMissing { .. }));
        assert!(err.is_container_error());
    }

    #[test]
    fn test_container_requires_sif_target() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("ray.sif");
        std::fs::write(&image, b"image").unwrap();

        let mut cfg = config(Role::Gpu);
        cfg.hostenv = HostEnv::Container;
        cfg.container_src_path = image.display().to_string();
        cfg.container_tgt_path = "/tmp/ray_container.img".to_string();

        assert_eq!(
            cfg.validate(),
            Err(ValidationError::ContainerTargetSuffix {
                path: "/tmp/ray_container.img".to_string()
            })
        );

        cfg.container_tgt_path = DEFAULT_CONTAINER_TGT_PATH.to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_mapping_stringifies_numbers() {
        let mut cfg = config(Role::Cpu);
        cfg.nodes = 4;
        cfg.cpus_per_task = 16;
        let mapping = cfg.to_mapping();
        assert_eq!(mapping["nodes"], "4");
        assert_eq!(mapping["cpus_per_task"], "16");
        assert_eq!(mapping["hostenv"], "bare_metal");
        assert_eq!(mapping.len(), PARAMETER_LABELS.len());
    }
}
