//! syndeo provisioner
//!
//! Brings up a Ray cluster on a Slurm-managed machine from up to three role
//! configurations: a head node, CPU workers and GPU workers.
//!
//! ## Flow
//!
//! - **Runtime context**: one random staging directory per run, shared by all roles
//! - **Pipeline**: per role, render the batch script, submit it, then watch the
//!   role's log until every requested node has started
//! - **Orchestrator**: runs the role pipelines concurrently (or in order) and
//!   aborts the whole run on the first submission failure
//! - **Cluster info**: head node id, IP and address read from the head log
//!
//! The scheduler sits behind the [`Scheduler`] trait: [`SlurmScheduler`] in
//! production, [`MockScheduler`] and [`SimulatedScheduler`] for tests and dry
//! runs.

pub mod cluster_info;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod scheduler;
pub mod template;

pub use cluster_info::{ClusterInfo, ParseError};
pub use config::Settings;
pub use context::RuntimeContext;
pub use error::ProvisionError;
pub use orchestrator::{Provisioner, RoleReport, RunReport};
pub use pipeline::{RoleOutcome, RoleProgress};
pub use scheduler::{
    JobSubmitter, MockScheduler, Scheduler, SimulatedScheduler, SlurmScheduler, SubmissionError,
    SubmittedJob,
};
