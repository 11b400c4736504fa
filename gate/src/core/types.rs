//! Shared deterministic types for gate core logic.
//!
//! These types define stable contracts between the verifiers, the TDD engine
//! and the orchestrator. They carry no I/O and serialize to the JSON consumed
//! by the calling task loop.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One diagnostic recovered from build output.
///
/// Location fields are optional: keyword-only matches carry a message only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub message: String,
}

impl BuildError {
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            file: None,
            line: None,
            column: None,
            message: message.into(),
        }
    }

    /// `file:line:col: message`, dropping whatever location parts are absent.
    pub fn summary(&self) -> String {
        let mut location = String::new();
        if let Some(file) = &self.file {
            location.push_str(file);
            if let Some(line) = self.line {
                location.push_str(&format!(":{line}"));
                if let Some(column) = self.column {
                    location.push_str(&format!(":{column}"));
                }
            }
        }
        if location.is_empty() {
            self.message.clone()
        } else {
            format!("{location}: {}", self.message)
        }
    }
}

/// One failing test recovered from test output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub message: String,
}

impl TestFailure {
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            test_name: None,
            package: None,
            file: None,
            line: None,
            message: message.into(),
        }
    }

    /// Stable identifier used by baseline comparison: `package/testName`, or
    /// the bare test name when no package was seen. `None` for keyword-only
    /// failures.
    pub fn identifier(&self) -> Option<String> {
        let name = self.test_name.as_deref()?;
        match self.package.as_deref() {
            Some(package) if !package.is_empty() => Some(format!("{package}/{name}")),
            _ => Some(name.to_string()),
        }
    }
}

/// Outcome of the build stage.
///
/// `skipped` implies `success`: a skipped stage never blocks the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub command: String,
    pub output: String,
    pub duration_ms: u64,
    pub exit_code: i32,
    pub errors: Vec<BuildError>,
}

impl BuildResult {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            skipped: true,
            skip_reason: Some(reason.into()),
            command: String::new(),
            output: String::new(),
            duration_ms: 0,
            exit_code: 0,
            errors: Vec::new(),
        }
    }
}

/// Pass/fail tallies and test names recovered from test output summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passed_tests: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_tests: Vec<String>,
}

/// Outcome of the test stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub success: bool,
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub command: String,
    pub output: String,
    pub duration_ms: u64,
    pub exit_code: i32,
    pub failures: Vec<TestFailure>,
    #[serde(default)]
    pub summary: TestSummary,
}

impl TestResult {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            skipped: true,
            skip_reason: Some(reason.into()),
            command: String::new(),
            output: String::new(),
            duration_ms: 0,
            exit_code: 0,
            failures: Vec::new(),
            summary: TestSummary::default(),
        }
    }

    /// Number of failing tests: the parsed tally when present, otherwise the
    /// number of recovered failures.
    pub fn failure_count(&self) -> usize {
        self.summary.failed.max(self.failures.len())
    }
}

/// Outcome of a TDD baseline comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TddResult {
    pub passed: bool,
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub baseline_captured: bool,
    pub regressions: Vec<String>,
    pub newly_passing: Vec<String>,
    pub baseline_passing: usize,
    pub baseline_failing: usize,
    pub current_passing: usize,
    pub current_failing: usize,
    pub message: String,
}

/// Overall gate verdict.
///
/// Variants are declared in escalation order so `Ord` encodes severity:
/// a result only ever moves towards `Failed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Passed,
    Skipped,
    SkippedByTask,
    Failed,
}

impl GateStatus {
    /// Return the more severe of `self` and `next`.
    pub fn escalate(self, next: GateStatus) -> GateStatus {
        self.max(next)
    }

    pub fn is_blocking(self) -> bool {
        self == GateStatus::Failed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GateStatus::Passed => "passed",
            GateStatus::Skipped => "skipped",
            GateStatus::SkippedByTask => "skipped_by_task",
            GateStatus::Failed => "failed",
        }
    }
}

/// Unified result of one gate verification.
///
/// Stage results are `None` when the stage never ran. Stage skip flags are
/// independent of `status`: a stage may be skipped while the gate passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub status: GateStatus,
    pub reason: String,
    pub build_result: Option<BuildResult>,
    pub test_result: Option<TestResult>,
    pub tdd_result: Option<TddResult>,
    pub build_skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_skip_reason: Option<String>,
    pub test_skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_skip_reason: Option<String>,
}

/// The slice of an externally stored task the gate reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
