//! Manifest files
//!
//! `apply` reads one JSON object per file. The `kind` field, when present,
//! must match the command it was handed to.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;

/// Reads and parses a manifest of the given kind from disk
pub fn load<T: DeserializeOwned>(path: &Path, kind: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;

    parse(&content, kind).with_context(|| format!("Invalid manifest {}", path.display()))
}

/// Parses a manifest, rejecting objects of another kind
pub fn parse<T: DeserializeOwned>(content: &str, kind: &str) -> Result<T> {
    let value: serde_json::Value = serde_json::from_str(content).context("Malformed JSON")?;

    match value.get("kind").and_then(|k| k.as_str()) {
        Some(found) if found != kind => bail!("expected kind {}, found {}", kind, found),
        _ => {}
    }

    serde_json::from_value(value).with_context(|| format!("Not a valid {}", kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use canary_core::domain::release::{self, ChartSource, Release};
    use canary_core::domain::test_job::{self, ScheduleKind, TestJob};

    #[test]
    fn test_parse_release() {
        let release: Release = parse(
            r#"{
                "kind": "Release",
                "metadata": { "name": "shop", "namespace": "qa" },
                "spec": {
                    "chart": { "source": "local", "local": { "path": "./charts/shop" } }
                }
            }"#,
            release::KIND,
        )
        .unwrap();

        assert_eq!(release.metadata.name, "shop");
        assert_eq!(release.spec.chart.source, ChartSource::Local);
    }

    #[test]
    fn test_parse_job_without_kind() {
        let job: TestJob = parse(
            r#"{
                "metadata": { "name": "nightly", "namespace": "qa" },
                "spec": {
                    "releaseRef": { "name": "shop" },
                    "schedule": { "type": "cron", "cron": "0 2 * * *" }
                }
            }"#,
            test_job::KIND,
        )
        .unwrap();

        assert_eq!(job.spec.schedule.kind, ScheduleKind::Cron);
    }

    #[test]
    fn test_parse_rejects_wrong_kind() {
        let err = parse::<TestJob>(
            r#"{ "kind": "Release", "metadata": { "name": "shop" } }"#,
            test_job::KIND,
        )
        .unwrap_err();

        assert!(err.to_string().contains("expected kind TestJob"));
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(parse::<Release>("{ not json", release::KIND).is_err());
    }
}
