//! Delete role configurations.

use anyhow::Result;
use clap::{Args, ValueEnum};
use syndeo_config::Role;

use crate::output::{print_info, print_success, OutputFormat};

use super::{show::print_snapshot, CommandContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Target {
    Head,
    Cpu,
    Gpu,
    All,
}

impl Target {
    fn roles(self) -> Vec<Role> {
        match self {
            Target::Head => vec![Role::Head],
            Target::Cpu => vec![Role::Cpu],
            Target::Gpu => vec![Role::Gpu],
            Target::All => Role::ALL.to_vec(),
        }
    }
}

/// Remove one role's configuration, or all of them.
#[derive(Debug, Args)]
pub struct DeleteCommand {
    /// Role to delete (head, cpu, gpu or all).
    #[arg(value_enum)]
    target: Target,
}

impl DeleteCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let store = ctx.store();

        for role in self.target.roles() {
            let removed = store.delete(role)?;
            if ctx.format == OutputFormat::Table {
                if removed {
                    print_success(&format!("Deleted {role} configuration"));
                } else {
                    print_info(&format!("No {role} configuration to delete"));
                }
            }
        }

        print_snapshot(&store.snapshot()?, ctx.format)
    }
}
