//! Project readiness model: the external analysis document and the
//! readiness verdict derived from it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Reason reported for every greenfield verdict.
pub const GREENFIELD_REASON: &str = "greenfield project: no buildable or testable code yet";
/// Reason reported when detection is disabled.
pub const DETECTION_DISABLED_REASON: &str = "bootstrap detection disabled";

/// How the detector decides whether the project is ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DetectionMode {
    #[default]
    Auto,
    Manual,
    Disabled,
}

impl DetectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionMode::Auto => "auto",
            DetectionMode::Manual => "manual",
            DetectionMode::Disabled => "disabled",
        }
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMode {
    type Err = GateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(DetectionMode::Auto),
            "manual" => Ok(DetectionMode::Manual),
            "disabled" => Ok(DetectionMode::Disabled),
            other => Err(GateError::UnknownDetectionMode(other.to_string())),
        }
    }
}

/// Readiness of the build stage as judged by project analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildReadiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub reason: String,
}

/// Readiness of the test stage as judged by project analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestReadiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub has_test_files: bool,
    pub reason: String,
}

/// Project analysis document produced by the external analysis step.
///
/// Read-only for the gate. Fields the gate does not use (lint, dependency and
/// task metadata) are kept as raw JSON so a round trip does not drop them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzed_at: Option<DateTime<Utc>>,
    pub project_type: String,
    pub languages: Vec<String>,
    pub is_greenfield: bool,
    pub is_monorepo: bool,
    pub build: BuildReadiness,
    pub test: TestReadiness,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lint: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<serde_json::Value>,
}

impl ProjectAnalysis {
    /// True while the project has nothing to test yet.
    pub fn in_test_bootstrap(&self) -> bool {
        self.is_greenfield || !self.test.ready || !self.test.has_test_files
    }
}

/// Detector verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    pub build_ready: bool,
    pub test_ready: bool,
    pub reason: String,
}

impl ProjectState {
    pub fn ready(reason: impl Into<String>) -> Self {
        Self {
            build_ready: true,
            test_ready: true,
            reason: reason.into(),
        }
    }

    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self {
            build_ready: false,
            test_ready: false,
            reason: reason.into(),
        }
    }
}

/// Derive readiness directly from an analysis snapshot.
pub fn state_from_analysis(analysis: &ProjectAnalysis) -> ProjectState {
    if analysis.is_greenfield {
        return ProjectState::not_ready(GREENFIELD_REASON);
    }
    ProjectState {
        build_ready: analysis.build.ready,
        test_ready: analysis.test.ready,
        reason: format!("{}; {}", analysis.build.reason, analysis.test.reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greenfield_uses_fixed_reason() {
        let analysis = ProjectAnalysis {
            is_greenfield: true,
            build: BuildReadiness {
                ready: true,
                command: Some("make".to_string()),
                reason: "has Makefile".to_string(),
            },
            ..ProjectAnalysis::default()
        };
        let state = state_from_analysis(&analysis);
        assert_eq!(state, ProjectState::not_ready(GREENFIELD_REASON));
    }

    #[test]
    fn reasons_are_joined() {
        let analysis = ProjectAnalysis {
            build: BuildReadiness {
                ready: true,
                command: Some("go build ./...".to_string()),
                reason: "go.mod present".to_string(),
            },
            test: TestReadiness {
                ready: false,
                command: None,
                has_test_files: false,
                reason: "no _test.go files".to_string(),
            },
            ..ProjectAnalysis::default()
        };
        let state = state_from_analysis(&analysis);
        assert!(state.build_ready);
        assert!(!state.test_ready);
        assert_eq!(state.reason, "go.mod present; no _test.go files");
    }

    #[test]
    fn analysis_parses_external_document() {
        let raw = r#"{
            "project_type": "go",
            "languages": ["go"],
            "is_greenfield": false,
            "is_monorepo": false,
            "build": {"ready": true, "command": "go build ./...", "reason": "go.mod"},
            "test": {"ready": true, "command": "go test ./...", "has_test_files": true, "reason": "tests found"},
            "lint": {"command": "golangci-lint run"},
            "task_list": []
        }"#;
        let analysis: ProjectAnalysis = serde_json::from_str(raw).expect("parse");
        assert_eq!(analysis.build.command.as_deref(), Some("go build ./..."));
        assert!(analysis.test.has_test_files);
        assert!(!analysis.in_test_bootstrap());
    }

    #[test]
    fn detection_mode_rejects_unknown_values() {
        assert_eq!("".parse::<DetectionMode>().expect("parse"), DetectionMode::Auto);
        assert_eq!(
            "MANUAL".parse::<DetectionMode>().expect("parse"),
            DetectionMode::Manual
        );
        let err = "sometimes".parse::<DetectionMode>().unwrap_err();
        assert_eq!(err, GateError::UnknownDetectionMode("sometimes".to_string()));
    }
}
