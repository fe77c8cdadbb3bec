//! Head node connection details from the head role's log.
//!
//! The head script announces itself with `syndeo::<key>=<value>` lines. Older
//! scripts print `HEAD Node ID=...` style lines instead; those are still read,
//! but only fill fields the structured lines left empty.

use std::io;

use serde::Serialize;
use syndeo_config::{load, Layout, Role, StoreError};
use thiserror::Error;
use tracing::{debug, warn};

/// Prefix of a structured log event.
pub const EVENT_PREFIX: &str = "syndeo::";

pub const HEAD_ID_MARKER: &str = "HEAD Node ID";
pub const HEAD_IP_MARKER: &str = "HEAD Node IP";
pub const HEAD_ADDR_MARKER: &str = "HEAD Node Address";

/// What a client needs to connect to the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterInfo {
    pub head_id: Option<String>,
    pub head_ip: Option<String>,
    pub head_addr: Option<String>,
    pub ray_ip_dir: String,
}

impl ClusterInfo {
    pub fn new(head: HeadInfo, ray_ip_dir: impl Into<String>) -> Self {
        Self {
            head_id: head.head_id,
            head_ip: head.head_ip,
            head_addr: head.head_addr,
            ray_ip_dir: ray_ip_dir.into(),
        }
    }

    /// Every head field is present and non-empty.
    pub fn is_complete(&self) -> bool {
        [&self.head_id, &self.head_ip, &self.head_addr]
            .iter()
            .all(|field| field.as_deref().is_some_and(|v| !v.is_empty()))
    }

    /// Label/value pairs for display; absent fields show as `-`.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        let show = |field: &Option<String>| field.clone().unwrap_or_else(|| "-".to_string());
        vec![
            ("Head Node ID", show(&self.head_id)),
            ("Head Node IP", show(&self.head_ip)),
            ("Head Node Address", show(&self.head_addr)),
            ("Ray IP Directory", self.ray_ip_dir.clone()),
        ]
    }
}

/// Head fields found in a log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadInfo {
    pub head_id: Option<String>,
    pub head_ip: Option<String>,
    pub head_addr: Option<String>,
}

impl HeadInfo {
    fn field_mut(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Id => &mut self.head_id,
            Field::Ip => &mut self.head_ip,
            Field::Addr => &mut self.head_addr,
        }
    }

    /// Fill empty fields from `fallback`.
    fn or(self, fallback: HeadInfo) -> HeadInfo {
        HeadInfo {
            head_id: self.head_id.or(fallback.head_id),
            head_ip: self.head_ip.or(fallback.head_ip),
            head_addr: self.head_addr.or(fallback.head_addr),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Id,
    Ip,
    Addr,
}

const LEGACY_MARKERS: [(&str, Field); 3] = [
    (HEAD_ID_MARKER, Field::Id),
    (HEAD_IP_MARKER, Field::Ip),
    (HEAD_ADDR_MARKER, Field::Addr),
];

/// A head info line that could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line_number}: '{marker}' line has no '=': {line}")]
pub struct ParseError {
    pub line_number: usize,
    pub marker: String,
    pub line: String,
}

/// Head info plus the lines that could not be read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub head: HeadInfo,
    pub errors: Vec<ParseError>,
}

/// Scan a head log. Later lines overwrite earlier ones for the same field.
pub fn parse_log(content: &str) -> Extraction {
    let mut structured = HeadInfo::default();
    let mut legacy = HeadInfo::default();
    let mut errors = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_number = idx + 1;

        if let Some(event) = line.trim_start().strip_prefix(EVENT_PREFIX) {
            let Some((key, value)) = event.split_once('=') else {
                errors.push(ParseError {
                    line_number,
                    marker: EVENT_PREFIX.to_string(),
                    line: line.to_string(),
                });
                continue;
            };
            let field = match key.trim() {
                "head_id" => Field::Id,
                "head_ip" => Field::Ip,
                "head_addr" => Field::Addr,
                other => {
                    debug!(key = other, line_number, "Ignoring unknown log event");
                    continue;
                }
            };
            *structured.field_mut(field) = Some(value.trim().to_string());
            continue;
        }

        for (marker, field) in LEGACY_MARKERS {
            if !line.contains(marker) {
                continue;
            }
            match line.rsplit_once('=') {
                Some((_, value)) => *legacy.field_mut(field) = Some(value.trim().to_string()),
                None => errors.push(ParseError {
                    line_number,
                    marker: marker.to_string(),
                    line: line.to_string(),
                }),
            }
        }
    }

    Extraction {
        head: structured.or(legacy),
        errors,
    }
}

/// Read head info from the head role's log.
///
/// Nothing is read when the head role is not configured. A configured head
/// whose log does not exist yet gives an empty extraction as well.
pub async fn extract(layout: &Layout) -> Result<Extraction, StoreError> {
    let config_path = layout.config_path(Role::Head);
    if !config_path.is_file() {
        debug!("Head role not configured, no cluster info to extract");
        return Ok(Extraction::default());
    }

    let record = load(&config_path)?;
    let Some(output) = record.get("output").and_then(|v| v.as_str()) else {
        warn!(path = %config_path.display(), "Head record has no output name");
        return Ok(Extraction::default());
    };

    let log_path = layout.log_path(output);
    let bytes = match tokio::fs::read(&log_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(log = %log_path.display(), "Head log not found");
            return Ok(Extraction::default());
        }
        Err(source) => {
            return Err(StoreError::Read {
                path: log_path,
                source,
            })
        }
    };

    Ok(parse_log(&String::from_utf8_lossy(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use syndeo_config::{save, RoleConfig};
    use tempfile::tempdir;

    #[rstest]
    #[case("HEAD Node IP=10.0.0.5", None, Some("10.0.0.5"), None)]
    #[case("HEAD Node ID=node017", Some("node017"), None, None)]
    #[case("2024-05-01 HEAD Node Address = 10.0.0.5:6379", None, None, Some("10.0.0.5:6379"))]
    #[case("syndeo::head_ip=10.1.2.3", None, Some("10.1.2.3"), None)]
    #[case("  syndeo::head_addr=a=b", None, None, Some("a=b"))]
    fn test_single_line(
        #[case] line: &str,
        #[case] id: Option<&str>,
        #[case] ip: Option<&str>,
        #[case] addr: Option<&str>,
    ) {
        let extraction = parse_log(line);
        assert!(extraction.errors.is_empty());
        assert_eq!(extraction.head.head_id.as_deref(), id);
        assert_eq!(extraction.head.head_ip.as_deref(), ip);
        assert_eq!(extraction.head.head_addr.as_deref(), addr);
    }

    #[test]
    fn test_structured_lines_win_over_legacy() {
        let log = "HEAD Node IP=192.168.0.1\n\
                   syndeo::head_ip=10.0.0.5\n\
                   HEAD Node ID=node001\n";

        let head = parse_log(log).head;
        assert_eq!(head.head_ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(head.head_id.as_deref(), Some("node001"));
    }

    #[test]
    fn test_last_occurrence_wins() {
        let head = parse_log("HEAD Node ID=a\nHEAD Node ID=b\n").head;
        assert_eq!(head.head_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_malformed_line_keeps_other_fields() {
        let log = "HEAD Node ID=node001\n\
                   HEAD Node IP 10.0.0.5\n\
                   HEAD Node Address=10.0.0.5:6379\n";

        let extraction = parse_log(log);
        assert_eq!(extraction.head.head_id.as_deref(), Some("node001"));
        assert_eq!(extraction.head.head_ip, None);
        assert_eq!(extraction.head.head_addr.as_deref(), Some("10.0.0.5:6379"));
        assert_eq!(
            extraction.errors,
            vec![ParseError {
                line_number: 2,
                marker: HEAD_IP_MARKER.to_string(),
                line: "HEAD Node IP 10.0.0.5".to_string(),
            }]
        );
    }

    #[test]
    fn test_malformed_event_is_reported() {
        let extraction = parse_log("syndeo::head_ip\n");
        assert_eq!(extraction.errors.len(), 1);
        assert_eq!(extraction.errors[0].marker, EVENT_PREFIX);
    }

    #[test]
    fn test_cluster_info_completeness() {
        let mut info = ClusterInfo::new(
            HeadInfo {
                head_id: Some("node001".into()),
                head_ip: Some("10.0.0.5".into()),
                head_addr: Some(String::new()),
            },
            "$HOME/tmp/abc",
        );
        assert!(!info.is_complete());

        info.head_addr = Some("10.0.0.5:6379".into());
        assert!(info.is_complete());
        assert_eq!(info.rows()[3], ("Ray IP Directory", "$HOME/tmp/abc".to_string()));
    }

    #[tokio::test]
    async fn test_extract_without_head_config_is_empty() {
        let dir = tempdir().unwrap();
        let layout = Layout::rooted(dir.path());

        let extraction = extract(&layout).await.unwrap();
        assert_eq!(extraction, Extraction::default());
    }

    #[tokio::test]
    async fn test_extract_reads_head_log() {
        let dir = tempdir().unwrap();
        let layout = Layout::rooted(dir.path());

        let mut head = RoleConfig::defaults(Role::Head, chrono::Local::now());
        head.output = "ray_head_test".to_string();
        save(&head, &layout.config_path(Role::Head)).unwrap();

        tokio::fs::create_dir_all(&layout.log_dir).await.unwrap();
        tokio::fs::write(
            layout.log_path("ray_head_test"),
            "Ray runtime started.\nHEAD Node ID=node042\nHEAD Node IP=10.0.0.42\n",
        )
        .await
        .unwrap();

        let head = extract(&layout).await.unwrap().head;
        assert_eq!(head.head_id.as_deref(), Some("node042"));
        assert_eq!(head.head_ip.as_deref(), Some("10.0.0.42"));
        assert_eq!(head.head_addr, None);
    }
}
