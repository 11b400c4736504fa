//! Gate configuration stored under `.ralph/gate.toml`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::baseline::BaselineScope;
use crate::core::readiness::DetectionMode;
use crate::error::GateError;

/// Directory under the project root that holds gate state.
pub const STATE_DIR: &str = ".ralph";

/// Path of the config file for a project root.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("gate.toml")
}

/// Test-stage policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    /// Any failing test fails the gate.
    #[default]
    Gate,
    /// Only regressions against the baseline fail the gate.
    Tdd,
    /// Test outcomes are reported but never fail the gate.
    Report,
}

impl TestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TestMode::Gate => "gate",
            TestMode::Tdd => "tdd",
            TestMode::Report => "report",
        }
    }

    /// Unknown or empty values select [`TestMode::Gate`].
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "tdd" => TestMode::Tdd,
            "report" => TestMode::Report,
            "gate" | "" => TestMode::Gate,
            other => {
                warn!(mode = other, "unknown test mode, using gate");
                TestMode::Gate
            }
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gate configuration (TOML).
///
/// Missing fields default to values that work for a fresh project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GateConfig {
    /// Keep at most this many bytes of build/test output per command.
    pub output_limit_bytes: usize,

    /// Project analysis document, relative to the project root.
    pub analysis_path: PathBuf,

    /// Analysis older than this is treated as absent.
    pub analysis_ttl_secs: u64,

    pub bootstrap: BootstrapConfig,
    pub build: BuildConfig,
    pub test: TestConfig,
    pub tdd: TddConfig,
    pub timeout: TimeoutConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootstrapConfig {
    /// `auto`, `manual` or `disabled`.
    pub detection: String,
    /// Probe for `manual` detection. Exit code 0 means still bootstrapping.
    pub check_command: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Overrides the command detected by project analysis.
    pub command: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestConfig {
    /// Overrides the command detected by project analysis.
    pub command: Option<String>,
    /// `gate`, `tdd` or `report`.
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TddConfig {
    /// Baseline file, relative to the project root.
    pub baseline_path: PathBuf,
    /// `global`, `session` or `task`.
    pub baseline_scope: String,
    pub session_id: Option<String>,
}

impl Default for TddConfig {
    fn default() -> Self {
        Self {
            baseline_path: PathBuf::from(STATE_DIR).join("test_baseline.json"),
            baseline_scope: BaselineScope::Global.as_str().to_string(),
            session_id: None,
        }
    }
}

/// Smart timeout budgets applied by callers around the gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Hard cap on total runtime.
    pub active_secs: u64,
    /// Maximum silence before a command counts as stuck.
    pub stuck_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            active_secs: 30 * 60,
            stuck_secs: 5 * 60,
        }
    }
}

impl TimeoutConfig {
    pub fn active(&self) -> Duration {
        Duration::from_secs(self.active_secs)
    }

    pub fn stuck(&self) -> Duration {
        Duration::from_secs(self.stuck_secs)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            output_limit_bytes: 1_000_000,
            analysis_path: PathBuf::from(STATE_DIR).join("project_analysis.json"),
            analysis_ttl_secs: 24 * 60 * 60,
            bootstrap: BootstrapConfig::default(),
            build: BuildConfig::default(),
            test: TestConfig::default(),
            tdd: TddConfig::default(),
            timeout: TimeoutConfig::default(),
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<()> {
        let mode = self.detection_mode()?;
        if mode == DetectionMode::Manual && self.check_command().is_none() {
            return Err(GateError::MissingCheckCommand.into());
        }
        self.baseline_scope()?;
        if self.output_limit_bytes == 0 {
            return Err(GateError::InvalidConfig("output_limit_bytes must be > 0".to_string()).into());
        }
        if self.timeout.active_secs == 0 || self.timeout.stuck_secs == 0 {
            return Err(GateError::InvalidConfig(
                "timeout.active_secs and timeout.stuck_secs must be > 0".to_string(),
            )
            .into());
        }
        Ok(())
    }

    pub fn detection_mode(&self) -> Result<DetectionMode, GateError> {
        self.bootstrap.detection.parse()
    }

    pub fn baseline_scope(&self) -> Result<BaselineScope, GateError> {
        self.tdd.baseline_scope.parse()
    }

    pub fn test_mode(&self) -> TestMode {
        TestMode::parse_lenient(&self.test.mode)
    }

    /// Probe command, ignoring blank values.
    pub fn check_command(&self) -> Option<&str> {
        non_blank(self.bootstrap.check_command.as_deref())
    }

    pub fn build_command(&self) -> Option<&str> {
        non_blank(self.build.command.as_deref())
    }

    pub fn test_command(&self) -> Option<&str> {
        non_blank(self.test.command.as_deref())
    }

    pub fn analysis_ttl(&self) -> Duration {
        Duration::from_secs(self.analysis_ttl_secs)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GateConfig::default()`.
pub fn load_config(path: &Path) -> Result<GateConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        let cfg = GateConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GateConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GateConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
