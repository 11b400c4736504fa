//! Per-task gate overrides derived from task free text.
//!
//! Overrides are declared as a table of (stage, pattern) rows so the matching
//! rules stay reviewable and testable in one place. They are recomputed on
//! every verification; nothing here is persisted.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Task;

/// Task metadata key that can waive the test stage.
pub const TEST_GATE_KEY: &str = "test_gate";
/// Task metadata key that can waive the build stage.
pub const BUILD_GATE_KEY: &str = "build_gate";

/// Gate stage an override pattern waives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideStage {
    Build,
    Test,
}

/// One declarative override rule. Patterns are matched case-insensitively.
#[derive(Debug, Clone, Copy)]
pub struct OverridePattern {
    pub stage: OverrideStage,
    pub pattern: &'static str,
}

pub const OVERRIDE_PATTERNS: &[OverridePattern] = &[
    OverridePattern {
        stage: OverrideStage::Test,
        pattern: r"tests?\s*:\s*(not\s+required|none|n/?a|skip)",
    },
    OverridePattern {
        stage: OverrideStage::Test,
        pattern: r"no\s+tests?\s+(needed|required)",
    },
    OverridePattern {
        stage: OverrideStage::Build,
        pattern: r"builds?\s*:\s*(not\s+required|none|n/?a|skip)",
    },
    OverridePattern {
        stage: OverrideStage::Build,
        pattern: r"no\s+builds?\s+(needed|required)",
    },
];

static COMPILED_PATTERNS: LazyLock<Vec<(OverrideStage, Regex)>> = LazyLock::new(|| {
    OVERRIDE_PATTERNS
        .iter()
        .map(|row| {
            let re = Regex::new(&format!("(?i){}", row.pattern)).unwrap();
            (row.stage, re)
        })
        .collect()
});

/// Stages a task declares it does not need.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskGateOverride {
    pub build_not_required: bool,
    pub test_not_required: bool,
}

impl TaskGateOverride {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !self.build_not_required && !self.test_not_required
    }
}

/// Derive overrides from the task description and its gate metadata.
///
/// Metadata values are read as if written `tests: <value>` / `build: <value>`
/// so they share the description's pattern table.
pub fn derive_override(task: &Task) -> TaskGateOverride {
    let mut result = TaskGateOverride::none();

    if matches_stage(&task.description, OverrideStage::Test) {
        result.test_not_required = true;
    }
    if matches_stage(&task.description, OverrideStage::Build) {
        result.build_not_required = true;
    }

    if let Some(value) = task.metadata.get(TEST_GATE_KEY)
        && matches_stage(&format!("tests: {value}"), OverrideStage::Test)
    {
        result.test_not_required = true;
    }
    if let Some(value) = task.metadata.get(BUILD_GATE_KEY)
        && matches_stage(&format!("build: {value}"), OverrideStage::Build)
    {
        result.build_not_required = true;
    }

    result
}

fn matches_stage(text: &str, stage: OverrideStage) -> bool {
    COMPILED_PATTERNS
        .iter()
        .filter(|(row_stage, _)| *row_stage == stage)
        .any(|(_, re)| re.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_test_waiver_is_detected() {
        let task = Task::new("Setup\nTests: Not required");
        let ov = derive_override(&task);
        assert!(ov.test_not_required);
        assert!(!ov.build_not_required);
    }

    #[test]
    fn waiver_variants_match() {
        for text in [
            "tests: none",
            "Test: N/A",
            "TESTS:na",
            "tests : skip",
            "No tests needed for docs",
            "no test required",
        ] {
            assert!(
                derive_override(&Task::new(text)).test_not_required,
                "expected test waiver for {text:?}"
            );
        }
    }

    #[test]
    fn build_waiver_is_independent() {
        let ov = derive_override(&Task::new("Update README\nBuild: not required"));
        assert!(ov.build_not_required);
        assert!(!ov.test_not_required);

        let ov = derive_override(&Task::new("no builds needed"));
        assert!(ov.build_not_required);
    }

    #[test]
    fn metadata_values_use_the_same_table() {
        let task = Task::new("Implement parser")
            .with_metadata(TEST_GATE_KEY, "skip")
            .with_metadata(BUILD_GATE_KEY, "Not Required");
        let ov = derive_override(&task);
        assert!(ov.test_not_required);
        assert!(ov.build_not_required);
    }

    #[test]
    fn ordinary_task_has_no_override() {
        let task = Task::new("Add tests for the parser\nTests: required")
            .with_metadata(TEST_GATE_KEY, "required");
        assert!(derive_override(&task).is_empty());
    }

    #[test]
    fn every_table_row_compiles() {
        assert_eq!(COMPILED_PATTERNS.len(), OVERRIDE_PATTERNS.len());
    }
}
