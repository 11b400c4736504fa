//! Baseline storage for TDD mode (`.ralph/test_baseline.json`).
//!
//! Every capture overwrites the whole file. There is no cross-process
//! locking: one gate per project directory may use a baseline file at a time.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::baseline::TestBaseline;

/// Load the baseline at `path`; `None` when no baseline has been captured.
pub fn load_baseline(path: &Path) -> Result<Option<TestBaseline>> {
    if !path.exists() {
        debug!(path = %path.display(), "no baseline on disk");
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read baseline {}", path.display()))?;
    let baseline: TestBaseline = serde_json::from_str(&contents)
        .with_context(|| format!("parse baseline {}", path.display()))?;
    debug!(
        path = %path.display(),
        passing = baseline.passing.len(),
        failing = baseline.failing.len(),
        "baseline loaded"
    );
    Ok(Some(baseline))
}

/// Atomically write the baseline (temp file + rename), creating parent dirs.
pub fn write_baseline(path: &Path, baseline: &TestBaseline) -> Result<()> {
    debug!(path = %path.display(), scope = %baseline.scope, "writing baseline");
    let mut buf = serde_json::to_string_pretty(baseline).context("serialize baseline")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("baseline path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp baseline {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace baseline {}", path.display()))?;
    Ok(())
}

/// Remove the baseline so the next TDD evaluation captures a fresh one.
/// Returns whether a file was removed.
pub fn clear_baseline(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(path).with_context(|| format!("remove baseline {}", path.display()))?;
    Ok(true)
}
