//! Per-run runtime context.
//!
//! Every run gets a fresh staging directory on the shared filesystem. The head
//! job drops its address there and workers pick it up. The directory name is
//! short and random; it is not a secret and collisions between concurrent runs
//! are possible.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use syndeo_config::StoreError;
use tracing::debug;

/// Default length of the staging identifier.
pub const DEFAULT_ID_LENGTH: usize = 3;

/// Parent of every staging directory, expanded by the shell on the nodes.
pub const STAGING_ROOT: &str = "$HOME/tmp";

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `length` characters drawn uniformly from `[0-9a-z]`.
pub fn random_id(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Values shared by every role of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeContext {
    pub ray_ip_dir: String,
}

impl RuntimeContext {
    pub fn generate(id_length: usize) -> Self {
        Self {
            ray_ip_dir: format!("{STAGING_ROOT}/{}", random_id(id_length)),
        }
    }

    /// The random part of the staging directory.
    pub fn id(&self) -> &str {
        self.ray_ip_dir
            .rsplit_once('/')
            .map_or(self.ray_ip_dir.as_str(), |(_, id)| id)
    }

    pub fn persist(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), ray_ip_dir = %self.ray_ip_dir, "Saved runtime context");
        Ok(())
    }

    /// Read a persisted context, `None` if there is none.
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

    pub fn to_mapping(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("ray_ip_dir".to_string(), self.ray_ip_dir.clone())])
    }
}
