//! Error types for a provisioning run.

use std::io;
use std::path::PathBuf;

use syndeo_config::{Role, StoreError};
use syndeo_reconcile::ReadinessError;
use thiserror::Error;

use crate::scheduler::SubmissionError;

/// Errors that abort a provisioning run.
///
/// Validation failures and readiness timeouts are not here: they stay local to
/// their role and show up as a [`crate::RoleOutcome`] instead.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The scheduler refused a job or could not be run.
    #[error("{role}: submission failed: {source}")]
    Submission {
        role: Role,
        #[source]
        source: SubmissionError,
    },

    /// A role record could not be read or parsed.
    #[error("{role}: {source}")]
    Config {
        role: Role,
        #[source]
        source: StoreError,
    },

    /// The batch script template could not be read or the result written.
    #[error("{role}: failed to render {}: {source}", .path.display())]
    Template {
        role: Role,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The role log could not be read or cleared.
    #[error("{role}: {source}")]
    Readiness {
        role: Role,
        #[source]
        source: ReadinessError,
    },

    /// The runtime record could not be written.
    #[error("runtime context: {0}")]
    RuntimeContext(#[source] StoreError),

    /// A role task panicked or was aborted.
    #[error("role task failed: {0}")]
    Task(String),
}

impl ProvisionError {
    /// The role the error belongs to, when there is one.
    pub fn role(&self) -> Option<Role> {
        match self {
            ProvisionError::Submission { role, .. }
            | ProvisionError::Config { role, .. }
            | ProvisionError::Template { role, .. }
            | ProvisionError::Readiness { role, .. } => Some(*role),
            ProvisionError::RuntimeContext(_) | ProvisionError::Task(_) => None,
        }
    }

    pub fn is_submission(&self) -> bool {
        matches!(self, ProvisionError::Submission { .. })
    }
}
