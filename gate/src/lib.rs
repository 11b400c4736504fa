//! Verification gate for an autonomous coding-agent loop.
//!
//! After an agent changes a project, the gate decides whether the change is
//! acceptable: it detects whether the project is ready to build and test,
//! runs the build and then the tests, and folds the outcomes, per-task
//! overrides and the configured test policy into one [`GateResult`].
//!
//! - **[`core`]**: Pure logic (output classifiers, override patterns,
//!   baseline comparison, result types). No I/O.
//! - **[`io`]**: Side effects (config, cached analysis, baseline file,
//!   cancellable subprocess execution).
//!
//! Orchestration ([`gate`], [`verify`], [`tdd`], [`detector`]) wires core
//! logic to I/O. [`timeout`] is orthogonal: callers wrap the execution
//! context with it.
//!
//! [`GateResult`]: core::types::GateResult

pub mod core;
pub mod detector;
pub mod error;
pub mod exit_codes;
pub mod feedback;
pub mod gate;
pub mod io;
pub mod logging;
pub mod tdd;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod timeout;
pub mod verify;
