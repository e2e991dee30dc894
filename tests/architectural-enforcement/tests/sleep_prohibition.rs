//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep methods. Dispatch waits on
//! transport I/O, timeouts and cancellation tokens only; a sleep in the
//! dispatch path would add latency to every request.
//! **Exceptions**: test code (`#[cfg(test)]` modules, `test_utils.rs`).

use architectural_enforcement::{describe, production_files, production_lines, read};

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for path in production_files() {
        let Some(content) = read(&path) else {
            continue;
        };
        for (line, code) in production_lines(&content) {
            if code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(") {
                violations.push(describe(&path, line, &code));
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use instead:");
        eprintln!("  - tokio::time::timeout() around the awaited I/O");
        eprintln!("  - CancellationToken::cancelled() to wait for cancellation");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

#[test]
fn test_no_blocking_thread_sleep_anywhere() {
    let mut violations = Vec::new();

    for path in production_files() {
        let Some(content) = read(&path) else {
            continue;
        };
        for (idx, line) in content.lines().enumerate() {
            if line.contains("std::thread::sleep") || line.contains("thread::sleep(") {
                violations.push(describe(&path, idx + 1, line));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "std::thread::sleep blocks the runtime:\n{}",
        violations.join("\n")
    );
}
