//! Stable exit codes for the `gate` CLI.

/// Gate passed or was skipped; the loop may proceed.
pub const PASSED: i32 = 0;
/// Invalid config, unreadable state, or a command that could not be launched.
pub const ERROR: i32 = 1;
/// Gate failed; the change is not acceptable.
pub const FAILED: i32 = 2;
