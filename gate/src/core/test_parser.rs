//! Test output classification.
//!
//! Two layers run over the same lines: structured blocks (Go `--- FAIL:`
//! headers, cargo `test x ... FAILED` lines) first, then a generic keyword
//! pass over every line the structured layer did not consume.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{TestFailure, TestSummary};

/// Lines scanned after a `--- FAIL:` header looking for its detail.
const FAIL_BLOCK_SCAN_LINES: usize = 10;

const FAILURE_KEYWORDS: &[&str] = &[
    "fail:",
    "failed:",
    "failure:",
    "error:",
    "assertion failed",
    "expected",
    "actual",
    "not equal",
    "timeout",
];

/// Benign phrases that contain failure keywords but report success.
const BENIGN_PHRASES: &[&str] = &[
    "no test files",
    "build successful",
    "0 failures",
    "0 failed",
    "all tests passed",
    "tests passed",
];

static GO_TEST_LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\S+_test\.go):(\d+):\s*(.*)").unwrap());

static CARGO_TEST_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^test (\S+) \.\.\. (ok|FAILED|ignored)").unwrap());

static CARGO_RESULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed; (\d+) ignored").unwrap()
});

static COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) (passed|failed|skipped|errors?)").unwrap());

/// Extract failing tests from combined test output.
pub fn parse_test_failures(output: &str) -> Vec<TestFailure> {
    let lines: Vec<&str> = output.lines().collect();
    let mut processed = vec![false; lines.len()];
    let mut failures = Vec::new();
    let mut package: Option<String> = None;

    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.trim();

        if let Some(pkg) = go_failed_package(raw) {
            package = Some(pkg);
        }

        if line.starts_with("--- FAIL:") {
            let failure = parse_go_fail_block(&lines, idx, package.as_deref(), &mut processed);
            failures.push(failure);
            continue;
        }

        if let Some(caps) = CARGO_TEST_LINE_RE.captures(line)
            && &caps[2] == "FAILED"
        {
            processed[idx] = true;
            failures.push(TestFailure {
                test_name: Some(caps[1].to_string()),
                ..TestFailure::message_only(line)
            });
        }
    }

    for (idx, raw) in lines.iter().enumerate() {
        if processed[idx] {
            continue;
        }
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();
        if BENIGN_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
            continue;
        }
        if FAILURE_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
            failures.push(TestFailure::message_only(line));
        }
    }

    failures
}

/// `FAIL\t<package>[\t<duration>]` summary lines name the package whose
/// failures follow in the next blocks.
fn go_failed_package(raw: &str) -> Option<String> {
    let rest = raw.strip_prefix("FAIL\t")?;
    rest.split_whitespace().next().map(str::to_string)
}

fn parse_go_fail_block(
    lines: &[&str],
    header_idx: usize,
    package: Option<&str>,
    processed: &mut [bool],
) -> TestFailure {
    let header = lines[header_idx].trim();
    processed[header_idx] = true;

    let mut failure = TestFailure {
        test_name: header.split_whitespace().nth(2).map(str::to_string),
        package: package.map(str::to_string),
        ..TestFailure::message_only(String::new())
    };

    let mut located = false;
    let mut first_detail: Option<&str> = None;
    let end = (header_idx + 1 + FAIL_BLOCK_SCAN_LINES).min(lines.len());
    for idx in header_idx + 1..end {
        let line = lines[idx].trim();
        if line.is_empty() || line.starts_with("---") || line.starts_with("===") {
            break;
        }
        processed[idx] = true;

        if first_detail.is_none() {
            first_detail = Some(line);
        }
        if !located && let Some(caps) = GO_TEST_LOCATION_RE.captures(line) {
            failure.file = Some(caps[1].to_string());
            failure.line = caps[2].parse().ok();
            failure.message = caps[3].trim().to_string();
            located = true;
        }
    }

    if !located {
        failure.message = first_detail.unwrap_or(header).to_string();
    }
    failure
}

/// Recover pass/fail/skip tallies and test names from summary output.
///
/// Aggregate summary lines (cargo `test result:`, pytest `=== ... ===`, jest
/// `Tests:`) win over per-test markers when present; otherwise the Go and
/// cargo per-test markers are tallied.
pub fn parse_test_summary(output: &str) -> TestSummary {
    let mut aggregate = TestSummary::default();
    let mut saw_aggregate = false;
    let mut markers = TestSummary::default();

    for raw in output.lines() {
        let line = raw.trim();

        if let Some(caps) = CARGO_RESULT_RE.captures(line) {
            saw_aggregate = true;
            aggregate.passed += caps[1].parse::<usize>().unwrap_or(0);
            aggregate.failed += caps[2].parse::<usize>().unwrap_or(0);
            aggregate.skipped += caps[3].parse::<usize>().unwrap_or(0);
            continue;
        }

        if line.starts_with("Tests:") || is_pytest_summary(line) {
            saw_aggregate = true;
            for caps in COUNT_RE.captures_iter(line) {
                let n = caps[1].parse::<usize>().unwrap_or(0);
                match &caps[2] {
                    "passed" => aggregate.passed += n,
                    "skipped" => aggregate.skipped += n,
                    _ => aggregate.failed += n,
                }
            }
            continue;
        }

        if let Some(name) = go_marker_name(line, "--- PASS:") {
            markers.passed += 1;
            markers.passed_tests.push(name);
        } else if go_marker_name(line, "--- FAIL:").is_some() {
            markers.failed += 1;
        } else if let Some(name) = go_marker_name(line, "--- SKIP:") {
            markers.skipped += 1;
            markers.skipped_tests.push(name);
        } else if let Some(caps) = CARGO_TEST_LINE_RE.captures(line) {
            let name = caps[1].to_string();
            match &caps[2] {
                "ok" => {
                    markers.passed += 1;
                    markers.passed_tests.push(name);
                }
                "ignored" => {
                    markers.skipped += 1;
                    markers.skipped_tests.push(name);
                }
                _ => markers.failed += 1,
            }
        }
    }

    if saw_aggregate {
        aggregate.passed_tests = markers.passed_tests;
        aggregate.skipped_tests = markers.skipped_tests;
        aggregate
    } else {
        markers
    }
}

fn go_marker_name(line: &str, marker: &str) -> Option<String> {
    line.strip_prefix(marker)?
        .split_whitespace()
        .next()
        .map(str::to_string)
}

fn is_pytest_summary(line: &str) -> bool {
    line.starts_with('=') && line.ends_with('=') && line.contains(" in ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const GO_OUTPUT: &str = "\
=== RUN   TestAdd
--- FAIL: TestAdd (0.00s)
    calc_test.go:12: expected 4, got 5

=== RUN   TestSub
--- PASS: TestSub (0.00s)
FAIL
FAIL\texample.com/calc\t0.002s
";

    #[test]
    fn go_fail_block_extracts_location() {
        let failures = parse_test_failures(GO_OUTPUT);
        assert_eq!(failures.len(), 1, "{failures:?}");
        let failure = &failures[0];
        assert_eq!(failure.test_name.as_deref(), Some("TestAdd"));
        assert_eq!(failure.file.as_deref(), Some("calc_test.go"));
        assert_eq!(failure.line, Some(12));
        assert_eq!(failure.message, "expected 4, got 5");
    }

    #[test]
    fn go_block_attaches_tracked_package() {
        let output = "\
FAIL\texample.com/first\t0.001s
--- FAIL: TestMul (0.00s)
    mul_test.go:3: wrong product
";
        let failures = parse_test_failures(output);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].package.as_deref(), Some("example.com/first"));
        assert_eq!(
            failures[0].identifier().as_deref(),
            Some("example.com/first/TestMul")
        );
    }

    #[test]
    fn go_block_without_location_uses_first_line() {
        let output = "--- FAIL: TestPanics (0.01s)\n    panic: runtime error\n--- FAIL: TestNext (0.00s)\n";
        let failures = parse_test_failures(output);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].message, "panic: runtime error");
        assert_eq!(failures[0].file, None);
        assert_eq!(failures[1].test_name.as_deref(), Some("TestNext"));
        assert_eq!(failures[1].message, "--- FAIL: TestNext (0.00s)");
    }

    #[test]
    fn go_block_scan_stops_after_ten_lines() {
        let mut output = String::from("--- FAIL: TestLong (0.00s)\n");
        for n in 1..=FAIL_BLOCK_SCAN_LINES {
            output.push_str(&format!("    detail {n}\n"));
        }
        output.push_str("    late_test.go:40: expected late\n");

        let failures = parse_test_failures(&output);
        assert_eq!(failures.len(), 2, "{failures:?}");
        assert_eq!(failures[0].test_name.as_deref(), Some("TestLong"));
        assert_eq!(failures[0].file, None);
        assert_eq!(failures[0].message, "detail 1");
        assert_eq!(
            failures[1],
            TestFailure::message_only("late_test.go:40: expected late")
        );
    }

    #[test]
    fn go_block_stops_at_run_marker() {
        let output = "--- FAIL: TestA (0.00s)\n=== RUN   TestB\n    b_test.go:1: expected x\n";
        let failures = parse_test_failures(output);
        assert_eq!(failures.len(), 2, "{failures:?}");
        assert_eq!(failures[0].test_name.as_deref(), Some("TestA"));
        assert_eq!(failures[0].file, None);
        assert_eq!(failures[0].message, "--- FAIL: TestA (0.00s)");
        assert_eq!(
            failures[1],
            TestFailure::message_only("b_test.go:1: expected x")
        );
    }

    #[test]
    fn block_lines_are_not_double_counted() {
        // "expected" would match the generic pass if the block had not consumed it.
        let failures = parse_test_failures("--- FAIL: TestA (0s)\n    a_test.go:1: expected 1\n");
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn generic_pass_matches_keywords() {
        let output = "AssertionError: expected 3 but got 4\nsome noise\nTimeout waiting for server";
        let failures = parse_test_failures(output);
        assert_eq!(
            failures,
            vec![
                TestFailure::message_only("AssertionError: expected 3 but got 4"),
                TestFailure::message_only("Timeout waiting for server"),
            ]
        );
    }

    #[test]
    fn benign_phrases_are_excluded() {
        let output = "?   \texample.com/empty\t[no test files]\nExpected result: all tests passed\n0 failures, expected\n";
        assert!(parse_test_failures(output).is_empty());
    }

    #[test]
    fn cargo_failed_line_is_structured() {
        let output = "test math::adds ... ok\ntest math::subtracts ... FAILED\n";
        let failures = parse_test_failures(output);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].test_name.as_deref(), Some("math::subtracts"));
    }

    #[test]
    fn summary_prefers_cargo_result_line() {
        let output = "\
test a ... ok
test b ... FAILED
test c ... ignored

test result: FAILED. 1 passed; 1 failed; 1 ignored; 0 measured; 0 filtered out
";
        let summary = parse_test_summary(output);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.passed_tests, vec!["a".to_string()]);
        assert_eq!(summary.skipped_tests, vec!["c".to_string()]);
    }

    #[test]
    fn summary_reads_pytest_and_jest() {
        let pytest = parse_test_summary("===== 2 failed, 10 passed, 1 skipped in 0.31s =====");
        assert_eq!((pytest.passed, pytest.failed, pytest.skipped), (10, 2, 1));

        let jest = parse_test_summary("Tests:       1 failed, 4 passed, 5 total");
        assert_eq!((jest.passed, jest.failed, jest.skipped), (4, 1, 0));
    }

    #[test]
    fn summary_tallies_go_markers() {
        let summary = parse_test_summary(GO_OUTPUT);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.passed_tests, vec!["TestSub".to_string()]);
    }

    #[test]
    fn unrecognized_output_yields_empty_summary() {
        assert_eq!(parse_test_summary("hello\nworld"), TestSummary::default());
    }
}
