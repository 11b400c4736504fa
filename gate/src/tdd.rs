//! TDD baseline engine.
//!
//! The first qualifying run captures a baseline of passing/failing test
//! identifiers and passes. Later runs compare against it and fail only on
//! regressions: tests that passed in the baseline and no longer pass.
//! Pre-existing failures are tolerated; newly passing tests are informational.
//!
//! Identifiers are only as precise as the test output allows (see
//! [`extract_identifiers`]). Placeholder identifiers (`test_N`) only compare
//! meaningfully between runs with the same test count.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::core::baseline::{
    BaselineScope, TestBaseline, extract_identifiers, find_newly_passing, find_regressions,
    should_capture_new_baseline,
};
use crate::core::readiness::ProjectAnalysis;
use crate::core::types::{TddResult, TestResult};
use crate::io::baseline_store::{load_baseline, write_baseline};
use crate::io::config::GateConfig;

pub const TEST_BOOTSTRAP_SKIP: &str = "project is still in test bootstrap phase";

#[derive(Debug, Clone)]
pub struct TddEngine {
    baseline_path: PathBuf,
    scope: BaselineScope,
    session_id: String,
    analysis: Option<ProjectAnalysis>,
}

impl TddEngine {
    pub fn new(baseline_path: impl Into<PathBuf>, scope: BaselineScope) -> Self {
        Self {
            baseline_path: baseline_path.into(),
            scope,
            session_id: String::new(),
            analysis: None,
        }
    }

    /// Baseline path from config, resolved against the project root.
    pub fn from_config(cfg: &GateConfig, root: &Path) -> Result<Self> {
        let mut engine = Self::new(root.join(&cfg.tdd.baseline_path), cfg.baseline_scope()?);
        if let Some(session_id) = &cfg.tdd.session_id {
            engine.session_id.clone_from(session_id);
        }
        Ok(engine)
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_analysis(mut self, analysis: Option<ProjectAnalysis>) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn baseline_path(&self) -> &Path {
        &self.baseline_path
    }

    /// Decided by the configured scope. The scope stored with `existing` is
    /// ignored, so switching to `global` keeps comparing against whatever the
    /// last capture under the old scope recorded; clear the baseline to reset.
    pub fn should_capture_new_baseline(&self, existing: Option<&TestBaseline>) -> bool {
        if let Some(existing) = existing
            && existing.scope != self.scope
        {
            debug!(
                stored = %existing.scope,
                configured = %self.scope,
                "baseline was captured under a different scope"
            );
        }
        should_capture_new_baseline(existing, self.scope, &self.session_id)
    }

    pub fn evaluate(&self, result: &TestResult) -> Result<TddResult> {
        self.evaluate_at(result, Utc::now())
    }

    #[instrument(skip_all, fields(scope = %self.scope, path = %self.baseline_path.display()))]
    pub fn evaluate_at(&self, result: &TestResult, now: DateTime<Utc>) -> Result<TddResult> {
        if self
            .analysis
            .as_ref()
            .is_some_and(ProjectAnalysis::in_test_bootstrap)
        {
            debug!("test bootstrap phase, skipping baseline");
            return Ok(skipped(TEST_BOOTSTRAP_SKIP.to_string()));
        }
        if result.skipped {
            let reason = result
                .skip_reason
                .clone()
                .unwrap_or_else(|| "tests skipped".to_string());
            return Ok(skipped(reason));
        }

        let existing = load_baseline(&self.baseline_path)?;
        match existing {
            Some(baseline) if !self.should_capture_new_baseline(Some(&baseline)) => {
                Ok(compare(&baseline, result))
            }
            previous => self.capture(previous.as_ref(), result, now),
        }
    }

    fn capture(
        &self,
        previous: Option<&TestBaseline>,
        result: &TestResult,
        now: DateTime<Utc>,
    ) -> Result<TddResult> {
        let bootstrap_completed_at = previous
            .and_then(|b| b.bootstrap_completed_at)
            .unwrap_or(now);
        let baseline = extract_identifiers(result).into_baseline(
            self.scope,
            &self.session_id,
            now,
            Some(bootstrap_completed_at),
        );
        write_baseline(&self.baseline_path, &baseline)?;
        info!(
            passing = baseline.passing.len(),
            failing = baseline.failing.len(),
            "baseline captured"
        );
        Ok(TddResult {
            passed: true,
            baseline_captured: true,
            baseline_passing: baseline.passing.len(),
            baseline_failing: baseline.failing.len(),
            current_passing: baseline.passing.len(),
            current_failing: baseline.failing.len(),
            message: format!(
                "baseline captured: {} passing, {} failing",
                baseline.passing.len(),
                baseline.failing.len()
            ),
            ..TddResult::default()
        })
    }
}

fn skipped(reason: String) -> TddResult {
    TddResult {
        passed: true,
        skipped: true,
        message: reason.clone(),
        skip_reason: Some(reason),
        ..TddResult::default()
    }
}

fn compare(baseline: &TestBaseline, result: &TestResult) -> TddResult {
    let current = extract_identifiers(result);
    let regressions = find_regressions(&baseline.passing, &current.passing);
    let newly_passing = find_newly_passing(&baseline.failing, &current.passing);

    let message = if regressions.is_empty() {
        let mut message = format!(
            "no regressions ({} passing, {} failing)",
            current.passing.len(),
            current.failing.len()
        );
        if !newly_passing.is_empty() {
            message.push_str(&format!(", {} newly passing", newly_passing.len()));
        }
        message
    } else {
        warn!(regressions = regressions.len(), "regressions detected");
        format!(
            "{} regression(s): {}",
            regressions.len(),
            regressions.join(", ")
        )
    };

    TddResult {
        passed: regressions.is_empty(),
        skipped: false,
        skip_reason: None,
        baseline_captured: false,
        baseline_passing: baseline.passing.len(),
        baseline_failing: baseline.failing.len(),
        current_passing: current.passing.len(),
        current_failing: current.failing.len(),
        regressions,
        newly_passing,
        message,
    }
}
