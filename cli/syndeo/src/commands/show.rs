//! Show the stored configuration.

use anyhow::Result;
use serde_json::{Map, Value};
use syndeo_config::{Role, RoleConfig};

use crate::output::{print_config_table, print_json, OutputFormat};

use super::CommandContext;

pub async fn run(ctx: CommandContext) -> Result<()> {
    let snapshot = ctx.store().snapshot()?;
    print_snapshot(&snapshot, ctx.format)
}

/// Print every role's config, absent roles as `-` (table) or `null` (json).
pub fn print_snapshot(snapshot: &[(Role, Option<RoleConfig>)], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => print_config_table(snapshot),
        OutputFormat::Json => {
            let mut view = Map::new();
            for (role, config) in snapshot {
                view.insert(role.to_string(), serde_json::to_value(config)?);
            }
            print_json(&Value::Object(view));
        }
    }
    Ok(())
}
