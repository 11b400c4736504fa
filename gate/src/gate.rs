//! Gate orchestration: build stage, then test stage, under task overrides.
//!
//! The build always runs before the tests, and a failed build ends the gate
//! before any test command starts. The test stage result is interpreted by
//! the configured [`TestMode`].

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::overrides::{TaskGateOverride, derive_override};
use crate::core::readiness::{DetectionMode, ProjectAnalysis, ProjectState};
use crate::core::types::{BuildResult, GateResult, GateStatus, Task, TddResult, TestResult};
use crate::detector::ProjectStateDetector;
use crate::io::analysis::load_analysis;
use crate::io::config::{GateConfig, TestMode};
use crate::io::context::ExecContext;
use crate::io::process::OutputObserver;
use crate::tdd::TddEngine;
use crate::verify::{BuildVerifier, TestVerifier, Verifier};

pub const BUILD_NOT_REQUIRED_REASON: &str = "build not required by task";
pub const TESTS_NOT_REQUIRED_REASON: &str = "tests not required by task";
pub const READINESS_UNCHECKED_NOTE: &str = "readiness not checked: no project analysis";

/// Build diagnostics quoted in a failure reason.
const REASON_DIAGNOSTIC_LIMIT: usize = 3;

pub struct Gate<B = BuildVerifier, T = TestVerifier> {
    build: B,
    test: T,
    mode: TestMode,
    tdd: TddEngine,
    detector: Option<ProjectStateDetector>,
    readiness_unchecked: bool,
}

impl Gate {
    /// Wire the real verifiers from config. `analysis` is the cached project
    /// analysis, if any; see [`load_project_analysis`].
    pub fn from_config(
        cfg: &GateConfig,
        root: &Path,
        analysis: Option<ProjectAnalysis>,
    ) -> Result<Self> {
        let build = BuildVerifier::new(root)
            .with_command(cfg.build_command())
            .with_analysis(analysis.clone())
            .with_output_limit(cfg.output_limit_bytes);
        let test = TestVerifier::new(root)
            .with_command(cfg.test_command())
            .with_analysis(analysis.clone())
            .with_output_limit(cfg.output_limit_bytes);
        let tdd = TddEngine::from_config(cfg, root)?.with_analysis(analysis.clone());

        let mut detector = ProjectStateDetector::from_config(cfg, root)?;
        let detector = match (detector.mode(), analysis) {
            (DetectionMode::Auto, None) => {
                warn!("no project analysis available; readiness detection skipped");
                let gate = Self::new(build, test, cfg.test_mode(), tdd);
                return Ok(gate.with_readiness_unchecked());
            }
            (_, Some(analysis)) => {
                detector.set_analysis(analysis);
                Some(detector)
            }
            (_, None) => Some(detector),
        };

        Ok(Self::new(build, test, cfg.test_mode(), tdd).with_detector(detector))
    }

    /// Report every chunk of build/test output to `observer`.
    pub fn with_output_observer(mut self, observer: Arc<dyn OutputObserver>) -> Self {
        self.build = self.build.with_observer(Some(Arc::clone(&observer)));
        self.test = self.test.with_observer(Some(observer));
        self
    }
}

impl<B, T> Gate<B, T>
where
    B: Verifier<Output = BuildResult>,
    T: Verifier<Output = TestResult>,
{
    pub fn new(build: B, test: T, mode: TestMode, tdd: TddEngine) -> Self {
        Self {
            build,
            test,
            mode,
            tdd,
            detector: None,
            readiness_unchecked: false,
        }
    }

    pub fn with_detector(mut self, detector: Option<ProjectStateDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Note in every non-failing reason that readiness was never detected.
    pub fn with_readiness_unchecked(mut self) -> Self {
        self.detector = None;
        self.readiness_unchecked = true;
        self
    }

    pub fn mode(&self) -> TestMode {
        self.mode
    }

    /// Verify the project for `task`, honouring overrides in its description
    /// and `build_gate` / `test_gate` metadata.
    pub fn verify(&self, ctx: &ExecContext, task: &Task) -> Result<GateResult> {
        let task_override = derive_override(task);
        if !task_override.is_empty() {
            debug!(task = %task.id, ?task_override, "task gate override");
        }
        self.verify_with_override(ctx, task_override)
    }

    #[instrument(skip_all, fields(mode = %self.mode))]
    pub fn verify_with_override(
        &self,
        ctx: &ExecContext,
        task_override: TaskGateOverride,
    ) -> Result<GateResult> {
        let readiness = match &self.detector {
            Some(detector) => Some(detector.detect(ctx)?),
            None => None,
        };
        let mut outcome = Outcome {
            note: self.readiness_unchecked.then(|| READINESS_UNCHECKED_NOTE.to_string()),
            ..Outcome::default()
        };

        // Build stage.
        if task_override.build_not_required {
            outcome.skip_build(BUILD_NOT_REQUIRED_REASON);
            outcome.escalate(GateStatus::SkippedByTask);
        } else if let Some(state) = not_ready(readiness.as_ref(), |s| s.build_ready) {
            outcome.skip_build(&state.reason);
        } else {
            let build = self.build.verify(ctx)?;
            if build.skipped {
                outcome.skip_build(build.skip_reason.as_deref().unwrap_or("build skipped"));
            } else if !build.success {
                let reason = build_failure_reason(&build);
                info!(%reason, "gate failed at build stage");
                outcome.escalate(GateStatus::Failed);
                outcome.reasons.push(reason);
                outcome.build_result = Some(build);
                return Ok(outcome.finish());
            }
            outcome.build_result = Some(build);
        }

        // Test stage.
        if task_override.test_not_required {
            outcome.skip_tests(TESTS_NOT_REQUIRED_REASON);
            outcome.escalate(GateStatus::SkippedByTask);
        } else if let Some(state) = not_ready(readiness.as_ref(), |s| s.test_ready) {
            outcome.skip_tests(&state.reason);
            outcome.escalate(GateStatus::Skipped);
        } else {
            let tests = self.test.verify(ctx)?;
            match self.mode {
                TestMode::Gate => apply_gate_mode(&mut outcome, &tests),
                TestMode::Tdd => {
                    if tests.skipped {
                        forward_test_skip(&mut outcome, &tests);
                    } else {
                        let tdd = self.tdd.evaluate(&tests)?;
                        if !tdd.passed {
                            outcome.escalate(GateStatus::Failed);
                        } else if tdd.skipped {
                            outcome.escalate(GateStatus::Skipped);
                        }
                        outcome.reasons.push(tdd.message.clone());
                        outcome.tdd_result = Some(tdd);
                    }
                }
                TestMode::Report => apply_report_mode(&mut outcome, &tests),
            }
            outcome.test_result = Some(tests);
        }

        let result = outcome.finish();
        info!(status = result.status.as_str(), reason = %result.reason, "gate finished");
        Ok(result)
    }
}

fn not_ready<'a>(
    readiness: Option<&'a ProjectState>,
    ready: impl Fn(&ProjectState) -> bool,
) -> Option<&'a ProjectState> {
    readiness.filter(|state| !ready(state))
}

fn apply_gate_mode(outcome: &mut Outcome, tests: &TestResult) {
    if tests.skipped {
        forward_test_skip(outcome, tests);
    } else if !tests.success {
        outcome.escalate(GateStatus::Failed);
        outcome.reasons.push(test_failure_reason(tests));
    }
}

/// Report mode never changes the status.
fn apply_report_mode(outcome: &mut Outcome, tests: &TestResult) {
    if tests.skipped {
        let reason = tests.skip_reason.as_deref().unwrap_or("tests skipped");
        outcome.test_skipped = true;
        outcome.test_skip_reason = Some(reason.to_string());
        outcome.reasons.push(format!("tests skipped: {reason}"));
    } else if tests.success {
        outcome.reasons.push("all tests passed".to_string());
    } else {
        outcome.reasons.push(format!(
            "report mode: {} (not blocking)",
            failed_tests_phrase(tests.failure_count().max(1))
        ));
    }
}

fn forward_test_skip(outcome: &mut Outcome, tests: &TestResult) {
    outcome.skip_tests(tests.skip_reason.as_deref().unwrap_or("tests skipped"));
    outcome.escalate(GateStatus::Skipped);
}

/// First few diagnostics joined by `"; "`, with a count of the rest.
pub fn build_failure_reason(build: &BuildResult) -> String {
    if build.errors.is_empty() {
        return format!("build failed (exit code {})", build.exit_code);
    }
    let shown: Vec<String> = build
        .errors
        .iter()
        .take(REASON_DIAGNOSTIC_LIMIT)
        .map(|e| e.summary())
        .collect();
    let mut reason = format!("build failed: {}", shown.join("; "));
    let hidden = build.errors.len().saturating_sub(REASON_DIAGNOSTIC_LIMIT);
    if hidden > 0 {
        reason.push_str(&format!(" (+{hidden} more)"));
    }
    reason
}

/// The failing test's name when exactly one failed, otherwise a count.
///
/// A lone unnamed diagnostic (a timeout, a keyword match) is quoted instead.
pub fn test_failure_reason(tests: &TestResult) -> String {
    let count = tests.failure_count();
    if count == 1
        && let Some(failure) = tests.failures.first()
    {
        return match failure.identifier() {
            Some(name) => format!("test failed: {name}"),
            None => format!("tests failed: {}", failure.message),
        };
    }
    if count == 0 {
        return format!("tests failed (exit code {})", tests.exit_code);
    }
    failed_tests_phrase(count)
}

fn failed_tests_phrase(count: usize) -> String {
    if count == 1 {
        "1 test failed".to_string()
    } else {
        format!("{count} tests failed")
    }
}

/// Accumulates a [`GateResult`] while the stages run.
#[derive(Default)]
struct Outcome {
    status: Option<GateStatus>,
    reasons: Vec<String>,
    build_result: Option<BuildResult>,
    test_result: Option<TestResult>,
    tdd_result: Option<TddResult>,
    build_skipped: bool,
    build_skip_reason: Option<String>,
    test_skipped: bool,
    test_skip_reason: Option<String>,
    /// Appended to a non-failing reason.
    note: Option<String>,
}

impl Outcome {
    fn escalate(&mut self, next: GateStatus) {
        self.status = Some(self.status.unwrap_or(GateStatus::Passed).escalate(next));
    }

    fn skip_build(&mut self, reason: &str) {
        self.build_skipped = true;
        self.build_skip_reason = Some(reason.to_string());
        self.reasons.push(format!("build skipped: {reason}"));
    }

    fn skip_tests(&mut self, reason: &str) {
        self.test_skipped = true;
        self.test_skip_reason = Some(reason.to_string());
        self.reasons.push(format!("tests skipped: {reason}"));
    }

    fn finish(self) -> GateResult {
        let status = self.status.unwrap_or(GateStatus::Passed);
        // A failure reason stands alone; skip notes before it are noise.
        let mut reason = if status == GateStatus::Failed {
            self.reasons.last().cloned().unwrap_or_default()
        } else if self.reasons.is_empty() {
            "build and tests passed".to_string()
        } else {
            self.reasons.join("; ")
        };
        if status != GateStatus::Failed
            && let Some(note) = self.note
        {
            reason = format!("{reason} ({note})");
        }
        GateResult {
            status,
            reason,
            build_result: self.build_result,
            test_result: self.test_result,
            tdd_result: self.tdd_result,
            build_skipped: self.build_skipped,
            build_skip_reason: self.build_skip_reason,
            test_skipped: self.test_skipped,
            test_skip_reason: self.test_skip_reason,
        }
    }
}

/// Load the cached analysis named by `cfg`, resolved against `root`.
pub fn load_project_analysis(cfg: &GateConfig, root: &Path) -> Result<Option<ProjectAnalysis>> {
    load_analysis(&root.join(&cfg.analysis_path), cfg.analysis_ttl(), Utc::now())
}
