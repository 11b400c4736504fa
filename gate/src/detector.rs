//! Project readiness detection (bootstrap / greenfield).
//!
//! - `disabled`: always ready.
//! - `manual`: runs a probe command. Exit code 0 means the project is *still
//!   bootstrapping*; any non-zero exit means it is ready.
//! - `auto`: reads the cached project analysis; never guesses without one.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::core::readiness::{
    DETECTION_DISABLED_REASON, DetectionMode, ProjectAnalysis, ProjectState, state_from_analysis,
};
use crate::error::GateError;
use crate::io::config::GateConfig;
use crate::io::context::ExecContext;
use crate::io::process::{ShellRequest, run_shell};

/// Probe output is only logged, so keep little of it.
const PROBE_OUTPUT_LIMIT_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct ProjectStateDetector {
    mode: DetectionMode,
    check_command: Option<String>,
    workdir: PathBuf,
    analysis: Option<ProjectAnalysis>,
}

impl ProjectStateDetector {
    pub fn new(mode: DetectionMode, workdir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            check_command: None,
            workdir: workdir.into(),
            analysis: None,
        }
    }

    pub fn from_config(cfg: &GateConfig, workdir: &Path) -> Result<Self> {
        let mut detector = Self::new(cfg.detection_mode()?, workdir);
        detector.check_command = cfg.check_command().map(str::to_string);
        Ok(detector)
    }

    pub fn with_check_command(mut self, command: impl Into<String>) -> Self {
        self.check_command = Some(command.into());
        self
    }

    pub fn set_analysis(&mut self, analysis: ProjectAnalysis) {
        self.analysis = Some(analysis);
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    #[instrument(skip_all, fields(mode = %self.mode))]
    pub fn detect(&self, ctx: &ExecContext) -> Result<ProjectState> {
        let state = match self.mode {
            DetectionMode::Disabled => ProjectState::ready(DETECTION_DISABLED_REASON),
            DetectionMode::Manual => self.detect_manual(ctx)?,
            DetectionMode::Auto => {
                let analysis = self.analysis.as_ref().ok_or(GateError::MissingAnalysis)?;
                state_from_analysis(analysis)
            }
        };
        info!(
            build_ready = state.build_ready,
            test_ready = state.test_ready,
            reason = %state.reason,
            "project state detected"
        );
        Ok(state)
    }

    fn detect_manual(&self, ctx: &ExecContext) -> Result<ProjectState> {
        let command = self
            .check_command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(GateError::MissingCheckCommand)?;

        let output = run_shell(
            ctx,
            &ShellRequest {
                workdir: &self.workdir,
                command,
                output_limit_bytes: PROBE_OUTPUT_LIMIT_BYTES,
                observer: None,
            },
        )?;
        if let Some(cause) = output.interrupted {
            return Err(GateError::ProbeInterrupted {
                command: command.to_string(),
                cause,
            }
            .into());
        }

        let code = output.exit_code();
        debug!(exit_code = code, "bootstrap probe finished");
        if code == 0 {
            Ok(ProjectState::not_ready(format!(
                "bootstrap check '{command}' exited 0: project is still bootstrapping"
            )))
        } else {
            Ok(ProjectState::ready(format!(
                "bootstrap check '{command}' exited {code}: project is ready"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::readiness::{BuildReadiness, GREENFIELD_REASON, TestReadiness};
    use crate::io::context::ContextError;

    fn manual(dir: &Path, command: &str) -> ProjectStateDetector {
        ProjectStateDetector::new(DetectionMode::Manual, dir).with_check_command(command)
    }

    #[test]
    fn disabled_is_always_ready() {
        let detector = ProjectStateDetector::new(DetectionMode::Disabled, ".");
        let state = detector.detect(&ExecContext::background()).expect("detect");
        assert_eq!(state, ProjectState::ready(DETECTION_DISABLED_REASON));
    }

    #[test]
    fn manual_exit_zero_means_bootstrapping() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = manual(temp.path(), "true")
            .detect(&ExecContext::background())
            .expect("detect");
        assert!(!state.build_ready);
        assert!(!state.test_ready);
        assert!(state.reason.contains("still bootstrapping"));
    }

    #[test]
    fn manual_non_zero_exit_means_ready() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = manual(temp.path(), "exit 3")
            .detect(&ExecContext::background())
            .expect("detect");
        assert!(state.build_ready);
        assert!(state.test_ready);
        assert!(state.reason.contains("exited 3"));
    }

    #[test]
    fn manual_probe_runs_in_project_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let detector = manual(temp.path(), "test ! -f go.mod");
        assert!(!detector.detect(&ExecContext::background()).expect("detect").build_ready);

        std::fs::write(temp.path().join("go.mod"), "module x\n").expect("write");
        assert!(detector.detect(&ExecContext::background()).expect("detect").build_ready);
    }

    #[test]
    fn manual_without_command_is_config_error() {
        let detector = ProjectStateDetector::new(DetectionMode::Manual, ".");
        let err = detector.detect(&ExecContext::background()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<GateError>(),
            Some(&GateError::MissingCheckCommand)
        );
    }

    #[test]
    fn interrupted_probe_is_an_error_not_a_verdict() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = ExecContext::background();
        ctx.cancel();
        let err = manual(temp.path(), "sleep 5").detect(&ctx).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GateError>(),
            Some(GateError::ProbeInterrupted {
                cause: ContextError::Canceled,
                ..
            })
        ));
    }

    #[test]
    fn auto_without_analysis_is_an_error() {
        let detector = ProjectStateDetector::new(DetectionMode::Auto, ".");
        let err = detector.detect(&ExecContext::background()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<GateError>(),
            Some(&GateError::MissingAnalysis)
        );
    }

    #[test]
    fn auto_reads_analysis() {
        let mut detector = ProjectStateDetector::new(DetectionMode::Auto, ".");
        detector.set_analysis(ProjectAnalysis {
            build: BuildReadiness {
                ready: true,
                command: None,
                reason: "Makefile".to_string(),
            },
            test: TestReadiness {
                ready: false,
                command: None,
                has_test_files: false,
                reason: "no tests".to_string(),
            },
            ..ProjectAnalysis::default()
        });
        let state = detector.detect(&ExecContext::background()).expect("detect");
        assert!(state.build_ready);
        assert!(!state.test_ready);
        assert_eq!(state.reason, "Makefile; no tests");

        detector.set_analysis(ProjectAnalysis {
            is_greenfield: true,
            ..ProjectAnalysis::default()
        });
        let state = detector.detect(&ExecContext::background()).expect("detect");
        assert_eq!(state.reason, GREENFIELD_REASON);
    }
}
