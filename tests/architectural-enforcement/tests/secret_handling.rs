//! Integration Test: Secret Handling
//!
//! **Policy**: Decrypted credentials live in memory only. They must never be
//! passed to a log macro or printed, and production code must not panic
//! through `unwrap()`/`expect()` (a panic message may carry request data).

use architectural_enforcement::{describe, production_files, production_lines, read};

const OUTPUT_MACROS: [&str; 9] = [
    "trace!(", "debug!(", "info!(", "warn!(", "error!(", "event!(", "println!(", "eprintln!(",
    "print!(",
];

const SECRET_FIELDS: [&str; 2] = ["api_key", "encrypted_api_key"];

/// Lines of every output macro invocation, following it across lines until
/// its parentheses balance
fn macro_invocations(lines: &[(usize, String)]) -> Vec<(usize, String)> {
    let mut invocations = Vec::new();
    let mut current: Option<(usize, String, i32)> = None;

    for (line, code) in lines {
        if current.is_none() && OUTPUT_MACROS.iter().any(|m| code.contains(m)) {
            current = Some((*line, String::new(), 0));
        }

        if let Some((start, text, depth)) = current.as_mut() {
            text.push_str(code);
            text.push(' ');
            *depth += i32::try_from(code.matches('(').count()).unwrap_or(i32::MAX);
            *depth -= i32::try_from(code.matches(')').count()).unwrap_or(i32::MAX);
            if *depth <= 0 {
                invocations.push((*start, std::mem::take(text)));
                current = None;
            }
        }
    }
    invocations
}

#[test]
fn test_credentials_never_logged() {
    let mut violations = Vec::new();

    for path in production_files() {
        let Some(content) = read(&path) else {
            continue;
        };
        let lines = production_lines(&content);
        for (line, invocation) in macro_invocations(&lines) {
            if SECRET_FIELDS.iter().any(|field| invocation.contains(field)) {
                violations.push(describe(&path, line, &invocation));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "Credentials reach log or print macros:\n{}",
        violations.join("\n")
    );
}

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let mut violations = Vec::new();

    for path in production_files() {
        let Some(content) = read(&path) else {
            continue;
        };
        for (line, code) in production_lines(&content) {
            if code.contains(".unwrap()") || code.contains(".expect(") {
                violations.push(describe(&path, line, &code));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "unwrap()/expect() in production code; propagate the error instead:\n{}",
        violations.join("\n")
    );
}

#[test]
fn test_macro_scanner_spans_lines() {
    let lines = vec![
        (1, "tracing::info!(".to_string()),
        (2, "    key = %endpoint.api_key,".to_string()),
        (3, "    \"Calling\"".to_string()),
        (4, ");".to_string()),
        (5, "let x = 1;".to_string()),
    ];
    let invocations = macro_invocations(&lines);
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].0, 1);
    assert!(invocations[0].1.contains("api_key"));
}
