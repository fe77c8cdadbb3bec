//! Partition resource table.
//!
//! Sites can drop a `resources.json` next to the role configs to pin the
//! CPUs-per-task used on each partition:
//!
//! ```json
//! { "cpus_per_task": { "normal": 48, "gaia": 40 } }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StoreError;
use crate::types::RoleConfig;

/// Partition name to default resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTable {
    #[serde(default)]
    pub cpus_per_task: BTreeMap<String, u32>,
}

impl ResourceTable {
    /// Load the table, or `None` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, StoreError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| StoreError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn cpus_for(&self, partition: &str) -> Option<u32> {
        self.cpus_per_task.get(partition).copied()
    }

    /// Override `cpus_per_task` from the table. A partition the table does not
    /// list leaves the config untouched. Returns whether a value was applied.
    pub fn apply(&self, config: &mut RoleConfig) -> bool {
        let Some(cpus) = self.cpus_for(&config.partition) else {
            return false;
        };

        if cpus != config.cpus_per_task {
            info!(
                partition = %config.partition,
                from = config.cpus_per_task,
                to = cpus,
                "Updating cpus_per_task from resource table"
            );
        }
        config.cpus_per_task = cpus;
        true
    }
}
