//! Build output classification.
//!
//! Turns raw compiler/build-tool output into structured [`BuildError`]s.
//! Parsing never fails: unrecognized output yields an empty list.

use crate::core::types::BuildError;

/// Case-insensitive fragments that mark a line as a build error when no
/// `path:line:col:` location could be recovered.
const ERROR_KEYWORDS: &[&str] = &[
    "error:",
    "error[",
    "fatal:",
    "fatal error",
    "undefined:",
    "cannot find",
    "not found",
    "compilation failed",
    "build failed",
    "linker error",
    "undefined reference",
    "undefined symbol",
];

/// Characters that never appear in a path prefix we are willing to trust.
const NON_PATH_CHARS: &[char] = &['(', ')', '[', ']', '{', '}'];

/// Extract build errors from combined build output.
///
/// Each non-blank trimmed line is first parsed as `path[:line[:col]]: message`;
/// when that fails, a keyword scan emits the whole line as a message-only error.
pub fn parse_build_errors(output: &str) -> Vec<BuildError> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| parse_located(line).or_else(|| parse_keyword(line)))
        .collect()
}

fn parse_located(line: &str) -> Option<BuildError> {
    let mut colon = line.find(':')?;
    // Windows drive letter (`C:\src\main.c:3: ...`): the path continues past it.
    if colon == 1 && line[2..].starts_with('\\') {
        colon = 2 + line[2..].find(':')?;
    }

    let path = &line[..colon];
    if !looks_like_path(path) {
        return None;
    }

    let mut rest = &line[colon + 1..];
    let mut numbers = Vec::with_capacity(2);
    while numbers.len() < 2 {
        let Some((head, tail)) = rest.split_once(':') else {
            break;
        };
        match head.trim().parse::<u32>() {
            Ok(n) => {
                numbers.push(n);
                rest = tail;
            }
            Err(_) => break,
        }
    }

    let message = rest.trim();
    if message.is_empty() {
        return None;
    }

    Some(BuildError {
        file: Some(path.to_string()),
        line: numbers.first().copied(),
        column: numbers.get(1).copied(),
        message: message.to_string(),
    })
}

fn looks_like_path(candidate: &str) -> bool {
    let has_separator = candidate.contains(['.', '/', '\\']);
    has_separator && !candidate.contains(NON_PATH_CHARS)
}

fn parse_keyword(line: &str) -> Option<BuildError> {
    let lower = line.to_lowercase();
    ERROR_KEYWORDS
        .iter()
        .any(|keyword| lower.contains(keyword))
        .then(|| BuildError::message_only(line))
}
