//! Cached project analysis (`.ralph/project_analysis.json`).
//!
//! The document is produced by an external analysis step. The gate only reads
//! it, validating the shape against the bundled schema before trusting it.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::readiness::ProjectAnalysis;

const ANALYSIS_SCHEMA: &str = include_str!("../../schemas/project_analysis.schema.json");

/// Load the analysis at `path`, or `None` if it is missing or older than `ttl`.
///
/// Freshness uses `analyzed_at` when present, otherwise the file's mtime.
#[instrument(skip_all, fields(path = %path.display(), ttl_secs = ttl.as_secs()))]
pub fn load_analysis(
    path: &Path,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<Option<ProjectAnalysis>> {
    if !path.exists() {
        debug!("no cached analysis");
        return Ok(None);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let analysis = parse_analysis(&raw).with_context(|| format!("parse {}", path.display()))?;

    let analyzed_at = match analysis.analyzed_at {
        Some(at) => at,
        None => fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .with_context(|| format!("stat {}", path.display()))?,
    };
    let age = now.signed_duration_since(analyzed_at);
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    if age > ttl {
        debug!(age_secs = age.num_seconds(), "cached analysis is stale");
        return Ok(None);
    }
    Ok(Some(analysis))
}

/// Validate and deserialize an analysis document.
pub fn parse_analysis(raw: &str) -> Result<ProjectAnalysis> {
    let instance: Value = serde_json::from_str(raw).context("parse analysis json")?;
    let schema: Value = serde_json::from_str(ANALYSIS_SCHEMA).context("parse analysis schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile analysis schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("analysis schema validation failed:\n- {}", messages.join("\n- "));
    }
    let analysis = serde_json::from_value(instance).context("parse analysis as struct")?;
    Ok(analysis)
}

/// Atomically write an analysis document (temp file + rename).
pub fn write_analysis(path: &Path, analysis: &ProjectAnalysis) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("analysis path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = serde_json::to_string_pretty(analysis).context("serialize analysis")?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
