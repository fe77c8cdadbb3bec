//! On-disk layout and role record persistence.
//!
//! Records are plain JSON objects, one file per role. Writes overwrite; there
//! is no history. Reads of a missing file yield an empty record.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::StoreError;
use crate::resources::ResourceTable;
use crate::types::{Record, Role, RoleConfig};

/// Default directory for role records, runtime record and rendered scripts.
pub const DEFAULT_STATE_DIR: &str = ".syndeo";

/// Default directory holding the source batch-script templates.
pub const DEFAULT_TEMPLATE_DIR: &str = "templates";

/// Default directory the scheduler writes role logs to.
pub const DEFAULT_LOG_DIR: &str = "logs";

const RESOURCES_FILE: &str = "resources.json";
const RUNTIME_FILE: &str = "misc.json";

/// Where every role-keyed file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub state_dir: PathBuf,
    pub template_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR, DEFAULT_TEMPLATE_DIR, DEFAULT_LOG_DIR)
    }
}

impl Layout {
    pub fn new(
        state_dir: impl Into<PathBuf>,
        template_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state_dir: state_dir.into(),
            template_dir: template_dir.into(),
            log_dir: log_dir.into(),
        }
    }

    /// Default layout with every directory under `root`.
    pub fn rooted(root: &Path) -> Self {
        Self::new(
            root.join(DEFAULT_STATE_DIR),
            root.join(DEFAULT_TEMPLATE_DIR),
            root.join(DEFAULT_LOG_DIR),
        )
    }

    pub fn config_path(&self, role: Role) -> PathBuf {
        self.state_dir.join(format!("{role}.json"))
    }

    pub fn resources_path(&self) -> PathBuf {
        self.state_dir.join(RESOURCES_FILE)
    }

    /// Transient record of the current run's runtime context.
    pub fn runtime_path(&self) -> PathBuf {
        self.state_dir.join(RUNTIME_FILE)
    }

    pub fn source_template(&self, role: Role) -> PathBuf {
        self.template_dir.join(format!("template_{role}.sh"))
    }

    pub fn rendered_script(&self, role: Role) -> PathBuf {
        self.state_dir.join(format!("template_{role}.sh"))
    }

    /// Log file the scheduler writes for a job with this output name.
    pub fn log_path(&self, output: &str) -> PathBuf {
        self.log_dir.join(format!("{output}.log"))
    }
}

/// Write `config` to `path`, creating parent directories.
pub fn save(config: &RoleConfig, path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StoreError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let contents = serde_json::to_string_pretty(&config.to_record()?)?;
    fs::write(path, contents).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(path = %path.display(), "Saved role record");
    Ok(())
}

/// Read the record at `path`. A missing file is an empty record.
pub fn load(path: &Path) -> Result<Record, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Record::new()),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Remove the record at `path` if present. Returns whether a file was removed.
pub fn delete(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::Delete {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Role-level access to the persisted configuration.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    layout: Layout,
}

impl ConfigStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Turn a raw record into a validated config.
    ///
    /// Required keys and container invariants are checked first; then, if a
    /// resource table exists, its `cpus_per_task` entry for the partition wins.
    pub fn validate(&self, record: &Record) -> Result<RoleConfig, StoreError> {
        let mut config = RoleConfig::from_record(record)?;
        config.validate()?;

        if let Some(table) = ResourceTable::load(&self.layout.resources_path())? {
            table.apply(&mut config);
        }

        Ok(config)
    }

    /// Validate and persist a role's config, replacing any previous one.
    pub fn setup(&self, role: Role, record: &Record) -> Result<RoleConfig, StoreError> {
        let config = self.validate(record)?;
        save(&config, &self.layout.config_path(role))?;
        info!(role = %role, job_name = %config.job_name, "Role configured");
        Ok(config)
    }

    pub fn exists(&self, role: Role) -> bool {
        self.layout.config_path(role).is_file()
    }

    pub fn load_record(&self, role: Role) -> Result<Record, StoreError> {
        load(&self.layout.config_path(role))
    }

    /// Load and validate a role's config; `None` if the role is not set up.
    pub fn load_role(&self, role: Role) -> Result<Option<RoleConfig>, StoreError> {
        if !self.exists(role) {
            return Ok(None);
        }
        let record = self.load_record(role)?;
        self.validate(&record).map(Some)
    }

    pub fn delete(&self, role: Role) -> Result<bool, StoreError> {
        let removed = delete(&self.layout.config_path(role))?;
        if removed {
            info!(role = %role, "Role config deleted");
        }
        Ok(removed)
    }

    pub fn delete_all(&self) -> Result<(), StoreError> {
        for role in Role::ALL {
            self.delete(role)?;
        }
        Ok(())
    }

    /// Stored configs for display, without re-running container checks.
    pub fn snapshot(&self) -> Result<Vec<(Role, Option<RoleConfig>)>, StoreError> {
        Role::ALL
            .iter()
            .map(|&role| -> Result<(Role, Option<RoleConfig>), StoreError> {
                if !self.exists(role) {
                    return Ok((role, None));
                }
                let record = self.load_record(role)?;
                Ok((role, Some(RoleConfig::from_record(&record)?)))
            })
            .collect()
    }
}
