//! Architectural Enforcement
//!
//! Source scanners shared by the enforcement tests:
//! - No sleeping in production code (wait on I/O, timers or channels instead)
//! - No blocking I/O inside the async router
//!
//! Test code is exempt: everything from the first `#[cfg(test)]` line of a
//! file onwards, and whole test-only files such as `test_utils.rs`.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["farm/core/src", "farm/daemon/src"];

/// Files compiled only for tests
const TEST_ONLY_FILES: &[&str] = &["test_utils.rs"];

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What rule was broken
    pub rule: &'static str,
    /// The offending source line, trimmed
    pub source: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.source
        )
    }
}

/// A forbidden pattern
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// Substring that marks a violation
    pub pattern: &'static str,
    /// Description printed in reports
    pub rule: &'static str,
    /// Only flag the pattern inside `async fn` bodies
    pub async_only: bool,
}

/// Workspace root, derived from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Scan every production directory against `rules`
#[must_use]
pub fn scan_production(rules: &[Rule]) -> Vec<Violation> {
    let root = workspace_root();
    let mut violations = Vec::new();
    for dir in PRODUCTION_DIRS {
        check_directory(&root.join(dir), rules, &mut violations);
    }
    violations
}

/// Scan all `.rs` files below `dir`
pub fn check_directory(dir: &Path, rules: &[Rule], violations: &mut Vec<Violation>) {
    if !dir.exists() {
        return;
    }

    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        let name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        if TEST_ONLY_FILES.contains(&name) {
            continue;
        }
        if let Ok(content) = fs::read_to_string(path) {
            violations.extend(check_source(path, &content, rules));
        }
    }
}

/// Scan one file's contents
#[must_use]
pub fn check_source(path: &Path, content: &str, rules: &[Rule]) -> Vec<Violation> {
    let lines: Vec<&str> = content.lines().collect();
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }

        // Skip comments
        let code_part = line.split("//").next().unwrap_or(line);

        for rule in rules {
            if !code_part.contains(rule.pattern) {
                continue;
            }
            if rule.async_only && !is_in_async_function(&lines, idx) {
                continue;
            }
            violations.push(Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                rule: rule.rule,
                source: line.trim().to_string(),
            });
        }
    }

    violations
}

/// Check if a line is inside an async function
#[must_use]
pub fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if line.contains("async fn ") || line.contains("async move") {
            return true;
        }

        if line.contains("fn ") {
            return false;
        }

        // Stop at module/impl boundaries
        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }
    false
}

/// Print a report and panic when any violation was found
pub fn assert_clean(title: &str, violations: &[Violation], hints: &[&str]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!();
    for hint in hints {
        eprintln!("  {hint}");
    }

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLEEP: Rule = Rule {
        pattern: "std::thread::sleep",
        rule: "Thread sleep",
        async_only: false,
    };

    const FS: Rule = Rule {
        pattern: "std::fs::",
        rule: "Blocking file I/O",
        async_only: true,
    };

    #[test]
    fn test_async_function_detection() {
        let code = vec![
            "async fn handler() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
        ];
        assert!(is_in_async_function(&code, 1));

        let code = vec![
            "pub fn load() {",
            "    let contents = std::fs::read_to_string(\"farm.toml\")?;",
            "}",
        ];
        assert!(!is_in_async_function(&code, 1));
    }

    #[test]
    fn test_async_only_rule_ignores_sync_functions() {
        let code = "fn load() {\n    std::fs::read_to_string(\"x\");\n}\n";
        assert!(check_source(Path::new("a.rs"), code, &[FS]).is_empty());

        let code = "async fn load() {\n    std::fs::read_to_string(\"x\");\n}\n";
        assert_eq!(check_source(Path::new("a.rs"), code, &[FS]).len(), 1);
    }

    #[test]
    fn test_test_module_is_exempt() {
        let code = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() { std::thread::sleep(d); }\n}\n";
        assert!(check_source(Path::new("a.rs"), code, &[SLEEP]).is_empty());

        let code = "fn a() { std::thread::sleep(d); }\n";
        let found = check_source(Path::new("a.rs"), code, &[SLEEP]);
        assert_eq!(found[0].line, 1);
    }

    #[test]
    fn test_comments_are_ignored() {
        let code = "fn a() {} // std::thread::sleep is forbidden\n";
        assert!(check_source(Path::new("a.rs"), code, &[SLEEP]).is_empty());
    }
}
