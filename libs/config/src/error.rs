//! Error types for role configuration.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A role record that cannot be turned into a usable [`crate::RoleConfig`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// One or more required keys are absent from the record.
    #[error("missing keys in config: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    /// A key is present but its value has the wrong shape.
    #[error("invalid config field: {0}")]
    InvalidField(String),

    /// Container mode without a container source path.
    #[error("container_src_path must be set when hostenv is container")]
    ContainerSourceUnset,

    /// Container source path does not exist on this host.
    #[error("container source does not exist: {}", .path.display())]
    ContainerSourceMissing { path: PathBuf },

    /// Container target is not an image file.
    #[error("container_tgt_path must be a .sif file: {path}")]
    ContainerTargetSuffix { path: String },

    /// Unrecognised role name.
    #[error("unknown role '{0}' (expected head, cpu or gpu)")]
    UnknownRole(String),

    /// Unrecognised host environment mode.
    #[error("unknown host environment '{0}' (expected container or bare_metal)")]
    UnknownHostEnv(String),
}

impl ValidationError {
    /// Returns true if this error comes from the container path checks.
    pub fn is_container_error(&self) -> bool {
        matches!(
            self,
            ValidationError::ContainerSourceUnset
                | ValidationError::ContainerSourceMissing { .. }
                | ValidationError::ContainerTargetSuffix { .. }
        )
    }
}

/// Errors from reading or writing records on disk.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to delete {}: {source}", .path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl StoreError {
    /// The validation failure behind this error, if that is what it is.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            StoreError::Validation(err) => Some(err),
            _ => None,
        }
    }
}
