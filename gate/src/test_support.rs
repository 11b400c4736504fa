//! Test-only helpers: throwaway project directories and analysis documents.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::core::readiness::{BuildReadiness, ProjectAnalysis, TestReadiness};
use crate::io::analysis::write_analysis;
use crate::io::config::{GateConfig, config_path, write_config};

/// A project root in a temporary directory, removed on drop.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }

    /// Write `contents` to `relative`, creating parent directories.
    pub fn write_file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    /// Write `.ralph/gate.toml`.
    pub fn write_config(&self, cfg: &GateConfig) {
        write_config(&config_path(self.root()), cfg).expect("write config");
    }

    /// Write the analysis document where `cfg` expects it.
    pub fn write_analysis(&self, cfg: &GateConfig, analysis: &ProjectAnalysis) {
        write_analysis(&self.root().join(&cfg.analysis_path), analysis).expect("write analysis");
    }

    pub fn baseline_path(&self, cfg: &GateConfig) -> PathBuf {
        self.root().join(&cfg.tdd.baseline_path)
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Analysis for a project that can build and test with the given commands.
pub fn ready_analysis(build_command: &str, test_command: &str) -> ProjectAnalysis {
    ProjectAnalysis {
        project_type: "go".to_string(),
        languages: vec!["go".to_string()],
        build: BuildReadiness {
            ready: true,
            command: Some(build_command.to_string()),
            reason: "go.mod present".to_string(),
        },
        test: TestReadiness {
            ready: true,
            command: Some(test_command.to_string()),
            has_test_files: true,
            reason: "_test.go files present".to_string(),
        },
        ..ProjectAnalysis::default()
    }
}

/// Analysis for an empty project with nothing to build or test.
pub fn greenfield_analysis() -> ProjectAnalysis {
    ProjectAnalysis {
        is_greenfield: true,
        build: BuildReadiness {
            ready: false,
            command: None,
            reason: "no source files".to_string(),
        },
        test: TestReadiness {
            ready: false,
            command: None,
            has_test_files: false,
            reason: "no test files".to_string(),
        },
        ..ProjectAnalysis::default()
    }
}
