//! Deterministic, pure logic shared by the gate.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod baseline;
pub mod build_parser;
pub mod overrides;
pub mod readiness;
pub mod test_parser;
pub mod types;
