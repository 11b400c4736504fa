//! Test baseline model and comparison rules for TDD mode.
//!
//! Identifiers are deliberately coarse. Most test runners only report counts,
//! so when no test names are available the identifiers are indexed
//! placeholders (`test_N`, `failed_test_N`) or a single sentinel. Placeholder
//! comparisons are only meaningful while both runs use the same scheme (same
//! total test count); named identifiers are preferred whenever the output
//! carries them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::TestResult;
use crate::error::GateError;

/// Passing sentinel used when a successful run reported neither names nor counts.
pub const ALL_TESTS_PASSED_SENTINEL: &str = "_all_tests_passed_";
/// Failing sentinel used when a failed run reported neither names nor counts.
pub const SOME_TESTS_FAILED_SENTINEL: &str = "_some_tests_failed_";

/// How long a captured baseline stays authoritative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineScope {
    /// Captured once per project; never re-captured automatically.
    #[default]
    Global,
    /// Re-captured whenever the session id changes.
    Session,
    /// Re-captured on every evaluation.
    Task,
}

impl BaselineScope {
    pub fn as_str(self) -> &'static str {
        match self {
            BaselineScope::Global => "global",
            BaselineScope::Session => "session",
            BaselineScope::Task => "task",
        }
    }
}

impl fmt::Display for BaselineScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaselineScope {
    type Err = GateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "" | "global" => Ok(BaselineScope::Global),
            "session" => Ok(BaselineScope::Session),
            "task" => Ok(BaselineScope::Task),
            other => Err(GateError::UnknownBaselineScope(other.to_string())),
        }
    }
}

/// Persisted snapshot of which tests passed and failed at a reference point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestBaseline {
    pub captured_at: DateTime<Utc>,
    pub scope: BaselineScope,
    pub passing: BTreeSet<String>,
    pub failing: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: String,
}

/// Identifier sets extracted from one test run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestIdentifiers {
    pub passing: BTreeSet<String>,
    pub failing: BTreeSet<String>,
    pub skipped: BTreeSet<String>,
}

impl TestIdentifiers {
    /// Build a fresh baseline from these identifiers.
    pub fn into_baseline(
        self,
        scope: BaselineScope,
        session_id: &str,
        captured_at: DateTime<Utc>,
        bootstrap_completed_at: Option<DateTime<Utc>>,
    ) -> TestBaseline {
        TestBaseline {
            captured_at,
            scope,
            passing: self.passing,
            failing: self.failing,
            skipped: (!self.skipped.is_empty()).then_some(self.skipped),
            bootstrap_completed_at,
            session_id: session_id.to_string(),
        }
    }
}

/// Whether the next evaluation must capture instead of compare.
pub fn should_capture_new_baseline(
    existing: Option<&TestBaseline>,
    scope: BaselineScope,
    session_id: &str,
) -> bool {
    let Some(existing) = existing else {
        return true;
    };
    match scope {
        BaselineScope::Task => true,
        BaselineScope::Session => existing.session_id != session_id,
        BaselineScope::Global => false,
    }
}

/// Extract passing/failing identifiers from a test result.
///
/// Preference order per set: parsed test names, then indexed placeholders from
/// counts, then a single sentinel derived from overall success.
pub fn extract_identifiers(result: &TestResult) -> TestIdentifiers {
    let summary = &result.summary;

    let passing: BTreeSet<String> = if !summary.passed_tests.is_empty() {
        summary.passed_tests.iter().cloned().collect()
    } else if summary.passed > 0 {
        (1..=summary.passed).map(|n| format!("test_{n}")).collect()
    } else if result.success {
        BTreeSet::from([ALL_TESTS_PASSED_SENTINEL.to_string()])
    } else {
        BTreeSet::new()
    };

    let named_failures: BTreeSet<String> = result
        .failures
        .iter()
        .filter_map(|failure| failure.identifier())
        .collect();
    let failing = if !named_failures.is_empty() {
        named_failures
    } else if result.failure_count() > 0 {
        (1..=result.failure_count())
            .map(|n| format!("failed_test_{n}"))
            .collect()
    } else if !result.success {
        BTreeSet::from([SOME_TESTS_FAILED_SENTINEL.to_string()])
    } else {
        BTreeSet::new()
    };

    TestIdentifiers {
        passing,
        failing,
        skipped: summary.skipped_tests.iter().cloned().collect(),
    }
}

/// Baseline-passing identifiers absent from the current passing set.
pub fn find_regressions(
    baseline_passing: &BTreeSet<String>,
    current_passing: &BTreeSet<String>,
) -> Vec<String> {
    baseline_passing
        .iter()
        .filter(|id| !contains_test(current_passing, id))
        .cloned()
        .collect()
}

/// Baseline-failing identifiers that now pass.
pub fn find_newly_passing(
    baseline_failing: &BTreeSet<String>,
    current_passing: &BTreeSet<String>,
) -> Vec<String> {
    baseline_failing
        .iter()
        .filter(|id| contains_test(current_passing, id))
        .cloned()
        .collect()
}

fn contains_test(set: &BTreeSet<String>, id: &str) -> bool {
    set.contains(id) || set.iter().any(|other| same_test(other, id))
}

/// Failures carry `package/name` once a package is known while pass markers
/// carry the bare name, so a package prefix on either side is ignored.
fn same_test(a: &str, b: &str) -> bool {
    a == b || has_package_prefix(a, b) || has_package_prefix(b, a)
}

fn has_package_prefix(qualified: &str, name: &str) -> bool {
    qualified
        .strip_suffix(name)
        .is_some_and(|prefix| prefix.len() > 1 && prefix.ends_with('/'))
}
