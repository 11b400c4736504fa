//! Markdown feedback for the agent's next iteration after a failed gate.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::{GateResult, GateStatus, TestFailure};

const FEEDBACK_TEMPLATE: &str = include_str!("templates/feedback.md");

/// Diagnostics listed per section; the rest are counted.
const FEEDBACK_ITEM_LIMIT: usize = 10;

/// Render the note for a failed gate. `None` for any other status.
pub fn render_feedback(result: &GateResult) -> Result<Option<String>> {
    if result.status != GateStatus::Failed {
        return Ok(None);
    }

    let build_errors: Vec<String> = result
        .build_result
        .as_ref()
        .map(|build| build.errors.iter().map(|e| e.summary()).collect())
        .unwrap_or_default();
    let test_failures: Vec<String> = result
        .test_result
        .as_ref()
        .filter(|tests| !tests.success)
        .map(|tests| tests.failures.iter().map(describe_failure).collect())
        .unwrap_or_default();
    let regressions: Vec<String> = result
        .tdd_result
        .as_ref()
        .map(|tdd| tdd.regressions.clone())
        .unwrap_or_default();

    let mut env = Environment::new();
    env.add_template("feedback", FEEDBACK_TEMPLATE)
        .context("load feedback template")?;
    let rendered = env
        .get_template("feedback")?
        .render(context! {
            reason => result.reason.trim(),
            build_errors => head(&build_errors),
            build_hidden => build_errors.len().saturating_sub(FEEDBACK_ITEM_LIMIT),
            test_failures => head(&test_failures),
            test_hidden => test_failures.len().saturating_sub(FEEDBACK_ITEM_LIMIT),
            regressions => regressions,
        })
        .context("render feedback")?;
    Ok(Some(rendered))
}

fn head(items: &[String]) -> &[String] {
    &items[..items.len().min(FEEDBACK_ITEM_LIMIT)]
}

fn describe_failure(failure: &TestFailure) -> String {
    let location = match (&failure.file, failure.line) {
        (Some(file), Some(line)) => format!(" ({file}:{line})"),
        (Some(file), None) => format!(" ({file})"),
        _ => String::new(),
    };
    match failure.identifier() {
        Some(name) => format!("{name}{location}: {}", failure.message),
        None => format!("{}{location}", failure.message),
    }
}
