//! Build stage verifier.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::build_parser::parse_build_errors;
use crate::core::readiness::ProjectAnalysis;
use crate::core::types::{BuildError, BuildResult};
use crate::io::context::ExecContext;
use crate::io::process::OutputObserver;
use crate::verify::{
    InterruptionWording, Verifier, interruption, resolve_command, run_stage_command,
};

pub const GREENFIELD_BUILD_SKIP: &str = "greenfield project - no code to build yet";
pub const NO_BUILD_COMMAND_SKIP: &str = "no build command configured or detected";

const WORDING: InterruptionWording = InterruptionWording {
    timed_out: "build timed out",
    canceled: "build was canceled",
};

#[derive(Clone)]
pub struct BuildVerifier {
    workdir: PathBuf,
    command: Option<String>,
    analysis: Option<ProjectAnalysis>,
    output_limit_bytes: usize,
    observer: Option<Arc<dyn OutputObserver>>,
}

impl BuildVerifier {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            command: None,
            analysis: None,
            output_limit_bytes: 1_000_000,
            observer: None,
        }
    }

    /// Explicit command; takes precedence over the analysis-detected one.
    pub fn with_command(mut self, command: Option<impl Into<String>>) -> Self {
        self.command = command.map(Into::into);
        self
    }

    pub fn with_analysis(mut self, analysis: Option<ProjectAnalysis>) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    pub fn with_observer(mut self, observer: Option<Arc<dyn OutputObserver>>) -> Self {
        self.observer = observer;
        self
    }

    /// First matching skip condition, or the command to run.
    fn plan(&self) -> Result<String, String> {
        if let Some(analysis) = &self.analysis {
            if analysis.is_greenfield {
                return Err(GREENFIELD_BUILD_SKIP.to_string());
            }
            if !analysis.build.ready {
                return Err(non_empty_or(&analysis.build.reason, "build not ready"));
            }
        }
        let detected = self
            .analysis
            .as_ref()
            .and_then(|a| a.build.command.as_deref());
        resolve_command(self.command.as_deref(), detected)
            .ok_or_else(|| NO_BUILD_COMMAND_SKIP.to_string())
    }
}

impl Verifier for BuildVerifier {
    type Output = BuildResult;

    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    fn verify(&self, ctx: &ExecContext) -> Result<BuildResult> {
        let command = match self.plan() {
            Ok(command) => command,
            Err(reason) => {
                info!(%reason, "build skipped");
                return Ok(BuildResult::skipped(reason));
            }
        };

        let output = run_stage_command(
            ctx,
            &self.workdir,
            &command,
            self.output_limit_bytes,
            self.observer.as_ref(),
        )?;

        let mut result = BuildResult {
            success: true,
            skipped: false,
            skip_reason: None,
            command,
            output: output.output_text(),
            duration_ms: output.duration_ms(),
            exit_code: 0,
            errors: Vec::new(),
        };

        if let Some(cause) = interruption(&output, ctx) {
            warn!(%cause, "build interrupted");
            result.success = false;
            result.errors = vec![BuildError::message_only(WORDING.message(cause))];
            return Ok(result);
        }

        if !output.status.success() {
            result.success = false;
            result.exit_code = output.exit_code();
            result.errors = parse_build_errors(&result.output);
            info!(
                exit_code = result.exit_code,
                errors = result.errors.len(),
                "build failed"
            );
            return Ok(result);
        }

        info!(duration_ms = result.duration_ms, "build passed");
        Ok(result)
    }
}

pub(crate) fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::readiness::BuildReadiness;
    use crate::error::GateError;
    use std::path::Path;
    use std::time::Duration;

    fn ready_analysis(command: Option<&str>) -> ProjectAnalysis {
        ProjectAnalysis {
            build: BuildReadiness {
                ready: true,
                command: command.map(str::to_string),
                reason: "ready".to_string(),
            },
            ..ProjectAnalysis::default()
        }
    }

    fn verifier(dir: &Path, command: &str) -> BuildVerifier {
        BuildVerifier::new(dir).with_command(Some(command))
    }

    #[test]
    fn greenfield_skips_before_anything_else() {
        let analysis = ProjectAnalysis {
            is_greenfield: true,
            ..ready_analysis(Some("make"))
        };
        let result = BuildVerifier::new(".")
            .with_command(Some("exit 1"))
            .with_analysis(Some(analysis))
            .verify(&ExecContext::background())
            .expect("verify");
        assert!(result.success);
        assert!(result.skipped);
        assert_eq!(result.skip_reason.as_deref(), Some(GREENFIELD_BUILD_SKIP));
    }

    #[test]
    fn not_ready_skips_with_analysis_reason() {
        let analysis = ProjectAnalysis {
            build: BuildReadiness {
                ready: false,
                command: None,
                reason: "no go.mod yet".to_string(),
            },
            ..ProjectAnalysis::default()
        };
        let result = BuildVerifier::new(".")
            .with_analysis(Some(analysis))
            .verify(&ExecContext::background())
            .expect("verify");
        assert!(result.skipped && result.success);
        assert_eq!(result.skip_reason.as_deref(), Some("no go.mod yet"));
    }

    #[test]
    fn missing_command_skips() {
        let result = BuildVerifier::new(".")
            .with_analysis(Some(ready_analysis(None)))
            .verify(&ExecContext::background())
            .expect("verify");
        assert!(result.skipped);
        assert_eq!(result.skip_reason.as_deref(), Some(NO_BUILD_COMMAND_SKIP));
    }

    #[test]
    fn detected_command_runs_when_no_override() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = BuildVerifier::new(temp.path())
            .with_analysis(Some(ready_analysis(Some("echo built"))))
            .verify(&ExecContext::background())
            .expect("verify");
        assert!(result.success);
        assert!(!result.skipped);
        assert_eq!(result.command, "echo built");
        assert!(result.output.contains("built"));
    }

    #[test]
    fn failing_build_is_classified() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = verifier(
            temp.path(),
            "echo 'main.go:10:5: undefined: foo' 1>&2; exit 2",
        )
        .verify(&ExecContext::background())
        .expect("verify");
        assert!(!result.success);
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].file.as_deref(), Some("main.go"));
        assert_eq!(result.errors[0].message, "undefined: foo");
    }

    #[test]
    fn deadline_is_reported_as_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = ExecContext::background().with_timeout(Duration::from_millis(100));
        let result = verifier(temp.path(), "sleep 5")
            .verify(&ctx)
            .expect("verify");
        assert!(!result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.errors, vec![BuildError::message_only("build timed out")]);
    }

    #[test]
    fn cancellation_is_reported_separately() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = ExecContext::background();
        ctx.cancel();
        let result = verifier(temp.path(), "sleep 5")
            .verify(&ctx)
            .expect("verify");
        assert!(!result.success);
        assert_eq!(
            result.errors,
            vec![BuildError::message_only("build was canceled")]
        );
    }

    #[test]
    fn missing_workdir_is_a_hard_error() {
        let err = verifier(Path::new("/definitely/not/here"), "true")
            .verify(&ExecContext::background())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GateError>(),
            Some(GateError::ShellUnavailable { .. })
        ));
    }
}
