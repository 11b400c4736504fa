//! Typed errors for the gate.
//!
//! Operations return `anyhow::Result`; these variants are attached so callers
//! can tell configuration mistakes and launch failures apart with
//! `err.downcast_ref::<GateError>()`. A command exiting non-zero is never one
//! of these: it is reported as `success=false` in the stage result.

use thiserror::Error;

use crate::io::context::ContextError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("unknown bootstrap detection mode '{0}' (expected auto, manual or disabled)")]
    UnknownDetectionMode(String),

    #[error("unknown baseline scope '{0}' (expected global, session or task)")]
    UnknownBaselineScope(String),

    #[error("bootstrap detection is 'manual' but no check_command is configured")]
    MissingCheckCommand,

    #[error("bootstrap detection is 'auto' but no project analysis is available")]
    MissingAnalysis,

    #[error("failed to launch shell for '{command}': {message}")]
    ShellUnavailable { command: String, message: String },

    #[error("bootstrap check '{command}' was interrupted: {cause}")]
    ProbeInterrupted { command: String, cause: ContextError },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl GateError {
    /// Configuration errors are surfaced immediately and never defaulted.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            GateError::UnknownDetectionMode(_)
                | GateError::UnknownBaselineScope(_)
                | GateError::MissingCheckCommand
                | GateError::InvalidConfig(_)
        )
    }
}
