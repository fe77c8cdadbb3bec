//! Error handling and display for the CLI.

use colored::Colorize;
use syndeo_config::{StoreError, ValidationError};
use syndeo_provisioner::{ProvisionError, SubmissionError};
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("No roles configured. Run `syndeo setup head` to configure one.")]
    NothingConfigured,

    #[error("Unknown output format '{0}' (expected table or json)")]
    UnknownFormat(String),
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(hint) = hint_for(err) {
        eprintln!("\n{}", format!("Hint: {hint}").yellow());
    }
}

fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    if let Some(err) = err.downcast_ref::<ProvisionError>() {
        return match err {
            ProvisionError::Submission {
                source: SubmissionError::Spawn { .. },
                ..
            } => Some(
                "Is Slurm available on this host? Point SYNDEO_SBATCH at sbatch, or try `syndeo run --simulate`.",
            ),
            ProvisionError::Submission { .. } => {
                Some("Check partition, time limit and GPUs with `syndeo show`.")
            }
            ProvisionError::Template { .. } => {
                Some("Templates are read from SYNDEO_TEMPLATE_DIR (default ./templates).")
            }
            ProvisionError::Config { source, .. } => store_hint(source),
            _ => None,
        };
    }

    if let Some(err) = err.downcast_ref::<StoreError>() {
        return store_hint(err);
    }

    match err.downcast_ref::<CliError>() {
        Some(CliError::UnknownFormat(_)) => Some("Use --format table or --format json."),
        _ => None,
    }
}

fn store_hint(err: &StoreError) -> Option<&'static str> {
    match err.as_validation()? {
        ValidationError::MissingKeys(_) | ValidationError::InvalidField(_) => {
            Some("The stored record is incomplete. Run `syndeo setup <role>` again.")
        }
        e if e.is_container_error() => Some(
            "Build the container image first and pass --container-src-path and a .sif --container-tgt-path.",
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syndeo_config::Role;

    #[test]
    fn test_hint_for_missing_sbatch() {
        let err = anyhow::Error::new(ProvisionError::Submission {
            role: Role::Head,
            source: SubmissionError::Spawn {
                program: "sbatch".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
        });
        assert!(hint_for(&err).is_some_and(|h| h.contains("SYNDEO_SBATCH")));
    }

    #[test]
    fn test_hint_for_container_error() {
        let err = anyhow::Error::new(StoreError::Validation(ValidationError::ContainerSourceUnset));
        assert!(hint_for(&err).is_some_and(|h| h.contains("--container-src-path")));
    }

    #[test]
    fn test_no_hint_for_other_errors() {
        assert_eq!(hint_for(&anyhow::anyhow!("boom")), None);
    }
}
