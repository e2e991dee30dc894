//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! across the modelpool crates:
//! - No sleep() calls in production code
//! - Credentials never reach log macros or stdout
//! - No unwrap()/expect() in production code
//!
//! The helpers below find production source files and strip what the checks
//! must not look at (comments, `#[cfg(test)]` modules, test-only files).

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees checked by every rule
pub const PRODUCTION_DIRS: [&str; 2] = ["modelpool/core/src", "modelpool/cli/src"];

/// Files compiled only under `cfg(test)`
const TEST_ONLY_FILES: [&str; 1] = ["test_utils.rs"];

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Every production `.rs` file under the checked trees
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.exists(), "missing source tree: {}", path.display());

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            let is_rust = entry.path().extension().and_then(|s| s.to_str()) == Some("rs");
            let test_only = entry
                .file_name()
                .to_str()
                .is_some_and(|name| TEST_ONLY_FILES.contains(&name));
            if is_rust && !test_only {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files
}

/// Numbered code lines of a file, up to its `#[cfg(test)]` module, with
/// line comments removed
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, String)> {
    let all: Vec<&str> = content.lines().collect();
    let mut lines = Vec::new();
    let mut skip_next = false;

    for (idx, line) in all.iter().enumerate() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if line.trim_start().starts_with("#[cfg(test)]") {
            // `#[cfg(test)] mod x;` declarations are skipped, inline modules end the scan
            let next = all.get(idx + 1).map_or("", |l| l.trim());
            if next.ends_with(';') {
                skip_next = true;
                continue;
            }
            break;
        }
        let code = strip_comment(line);
        if !code.trim().is_empty() {
            lines.push((idx + 1, code.to_string()));
        }
    }
    lines
}

/// Text before a `//` that is not inside a string literal
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut prev = '\0';
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' if prev != '\\' => in_string = !in_string,
            '/' if !in_string && prev == '/' => return &line[..idx - 1],
            _ => {}
        }
        prev = ch;
    }
    line
}

/// Read a file, or `None` if it cannot be read
#[must_use]
pub fn read(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

/// `path:line - code` for a violation report
#[must_use]
pub fn describe(path: &Path, line: usize, code: &str) -> String {
    let root = workspace_root();
    let shown = path.strip_prefix(&root).unwrap_or(path);
    format!("{}:{} - {}", shown.display(), line, code.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn a() {}\n// note\n#[cfg(test)]\nmod test_utils;\nfn c() {}\n#[cfg(test)]\nmod tests {\n    fn b() { x.unwrap(); }\n}\n";
        let lines = production_lines(content);
        assert_eq!(
            lines,
            vec![(1, "fn a() {}".to_string()), (5, "fn c() {}".to_string())]
        );
    }

    #[test]
    fn test_strip_comment_respects_strings() {
        assert_eq!(strip_comment("let u = \"http://x\"; // tail"), "let u = \"http://x\"; ");
        assert_eq!(strip_comment("call(); // sleep(1)"), "call(); ");
    }

    #[test]
    fn test_sources_found() {
        let files = production_files();
        assert!(files.iter().any(|f| f.ends_with("pool/dispatcher.rs")));
        assert!(!files.iter().any(|f| f.ends_with("test_utils.rs")));
    }
}
