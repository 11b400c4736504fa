//! I/O helpers for the gate: config, cached analysis, baseline file and
//! subprocess execution.

pub mod analysis;
pub mod baseline_store;
pub mod config;
pub mod context;
pub mod process;
