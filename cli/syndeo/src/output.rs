//! Output formatting for CLI commands.

use std::str::FromStr;

use colored::Colorize;
use serde::Serialize;
use syndeo_config::{Role, RoleConfig, PARAMETER_LABELS};
use syndeo_provisioner::{ClusterInfo, RoleOutcome, RoleProgress, RoleReport};
use tabled::{Table, Tabled};

use crate::error::CliError;

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

impl FromStr for OutputFormat {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

/// Print any serializable value as pretty JSON.
pub fn print_json<T: Serialize>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("{} failed to encode output: {e}", "Error:".red().bold()),
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "Warning:".yellow().bold(), message);
}

/// One configuration parameter across the three roles.
#[derive(Debug, Tabled)]
pub struct ParameterRow {
    #[tabled(rename = "Parameter")]
    pub parameter: &'static str,
    #[tabled(rename = "Head Node")]
    pub head: String,
    #[tabled(rename = "Worker Nodes - CPU")]
    pub cpu: String,
    #[tabled(rename = "Worker Nodes - GPU")]
    pub gpu: String,
}

/// Parameters by role; roles without a config show `-`.
pub fn parameter_rows(snapshot: &[(Role, Option<RoleConfig>)]) -> Vec<ParameterRow> {
    let values = |role: Role| {
        snapshot
            .iter()
            .find(|(r, _)| *r == role)
            .and_then(|(_, config)| config.as_ref())
            .map(RoleConfig::parameter_values)
    };
    let (head, cpu, gpu) = (values(Role::Head), values(Role::Cpu), values(Role::Gpu));
    let cell = |values: &Option<[String; 11]>, idx: usize| {
        values
            .as_ref()
            .map_or_else(|| "-".to_string(), |v| v[idx].clone())
    };

    PARAMETER_LABELS
        .iter()
        .enumerate()
        .map(|(idx, &label)| ParameterRow {
            parameter: label,
            head: cell(&head, idx),
            cpu: cell(&cpu, idx),
            gpu: cell(&gpu, idx),
        })
        .collect()
}

pub fn print_config_table(snapshot: &[(Role, Option<RoleConfig>)]) {
    println!("{}", Table::new(parameter_rows(snapshot)));
}

#[derive(Debug, Tabled)]
struct ClusterRow {
    #[tabled(rename = "Ray Cluster")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

pub fn print_cluster_table(info: &ClusterInfo) {
    let rows: Vec<ClusterRow> = info
        .rows()
        .into_iter()
        .map(|(field, value)| ClusterRow { field, value })
        .collect();
    println!("{}", Table::new(rows));
}

/// One line per role with a coloured status.
pub fn print_outcome(report: &RoleReport) {
    let status = match &report.outcome {
        RoleOutcome::Ready { .. } => report.outcome.label().green().bold(),
        RoleOutcome::Skipped => report.outcome.label().dimmed(),
        RoleOutcome::TimedOut { .. }
        | RoleOutcome::Cancelled { .. }
        | RoleOutcome::Aborted { .. } => {
            report.outcome.label().yellow().bold()
        }
        RoleOutcome::Invalid(_) => report.outcome.label().red().bold(),
    };
    println!("{:<20} {:<10} {}", report.role.title(), status, report.outcome);
}

pub fn print_progress(update: &RoleProgress) {
    println!(
        "{} {} {}/{} node(s) started",
        "..".dimmed(),
        update.role.title(),
        update.progress.ready,
        update.progress.requested
    );
}
