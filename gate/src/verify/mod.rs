//! Build and test stage verifiers.
//!
//! Both verifiers follow the same shape: resolve skip conditions before
//! running anything, run the command via `sh -c` in the project root under
//! the caller's context, then classify the outcome. They install no timeouts
//! of their own; callers bound the context (see [`crate::timeout`]).

pub mod build;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::io::context::{ContextError, ExecContext};
use crate::io::process::{OutputObserver, ShellOutput, ShellRequest, run_shell};

pub use build::BuildVerifier;
pub use test::TestVerifier;

/// One gate stage.
pub trait Verifier {
    type Output;

    fn verify(&self, ctx: &ExecContext) -> Result<Self::Output>;
}

/// Explicit command first, then the analysis-detected one; blanks count as absent.
pub(crate) fn resolve_command(explicit: Option<&str>, detected: Option<&str>) -> Option<String> {
    [explicit, detected]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

pub(crate) fn run_stage_command(
    ctx: &ExecContext,
    workdir: &Path,
    command: &str,
    output_limit_bytes: usize,
    observer: Option<&Arc<dyn OutputObserver>>,
) -> Result<ShellOutput> {
    run_shell(
        ctx,
        &ShellRequest {
            workdir,
            command,
            output_limit_bytes,
            observer: observer.cloned(),
        },
    )
}

/// Why the command did not finish on its own, if it didn't.
///
/// A kill by the context always counts; a non-zero exit racing an already
/// ended context is attributed to the context as well.
pub(crate) fn interruption(output: &ShellOutput, ctx: &ExecContext) -> Option<ContextError> {
    output
        .interrupted
        .or_else(|| (!output.status.success()).then(|| ctx.err()).flatten())
}

/// Synthetic diagnostic wording for an interrupted stage.
pub(crate) struct InterruptionWording {
    pub timed_out: &'static str,
    pub canceled: &'static str,
}

impl InterruptionWording {
    pub(crate) fn message(&self, cause: ContextError) -> &'static str {
        match cause {
            ContextError::DeadlineExceeded => self.timed_out,
            ContextError::Canceled => self.canceled,
        }
    }
}
