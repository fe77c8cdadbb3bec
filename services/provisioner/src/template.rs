//! Batch script rendering.
//!
//! Templates carry `{TOKEN}` placeholders where `TOKEN` is an uppercased
//! mapping key. Rendering is a single left-to-right pass: substituted text is
//! never scanned again, and tokens without a mapping entry stay as they are.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use syndeo_config::RoleConfig;

use crate::context::RuntimeContext;

/// Lowercase key to substitution value.
pub type Mapping = BTreeMap<String, String>;

/// Everything a role script can refer to: the role's config, the run's
/// runtime context and the log directory. Runtime values win on collision.
pub fn merged_mapping(config: &RoleConfig, context: &RuntimeContext, log_dir: &Path) -> Mapping {
    let mut mapping = config.to_mapping();
    mapping.insert("log_dir".to_string(), log_dir.display().to_string());
    mapping.extend(context.to_mapping());
    mapping
}

/// Substitutes `{TOKEN}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    tokens: BTreeMap<String, String>,
}

impl TemplateRenderer {
    pub fn new(mapping: &Mapping) -> Self {
        let tokens = mapping
            .iter()
            .map(|(key, value)| (key.to_uppercase(), value.clone()))
            .collect();
        Self { tokens }
    }

    pub fn render_str(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];

            let hit = after.find('}').and_then(|close| {
                let name = &after[..close];
                self.tokens.get(name).map(|value| (close, value))
            });

            match hit {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }

    /// Render `src` into `dest`, creating parent directories. Returns the
    /// rendered text.
    pub async fn render(&self, src: &Path, dest: &Path) -> io::Result<String> {
        let text = tokio::fs::read_to_string(src).await?;
        let rendered = self.render_str(&text);

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &rendered).await?;

        Ok(rendered)
    }
}

/// Render with a one-off renderer.
pub fn render_str(mapping: &Mapping, text: &str) -> String {
    TemplateRenderer::new(mapping).render_str(text)
}

pub async fn render(mapping: &Mapping, src: &Path, dest: &Path) -> io::Result<String> {
    TemplateRenderer::new(mapping).render(src, dest).await
}

/// Placeholder-shaped tokens (`{UPPER_CASE}`) still present in `text`.
///
/// Shell expansions such as `${SLURM_JOB_ID}` are not placeholders and are
/// skipped. Each token is listed once, in order of first appearance.
pub fn untouched_tokens(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let open = search_from + offset;
        search_from = open + 1;

        if text[..open].ends_with('$') {
            continue;
        }
        let Some(close) = text[open + 1..].find('}') else {
            break;
        };
        let name = &text[open + 1..open + 1 + close];
        if is_token_name(name) {
            let token = format!("{{{name}}}");
            if !found.contains(&token) {
                found.push(token);
            }
        }
    }

    found
}

fn is_token_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
