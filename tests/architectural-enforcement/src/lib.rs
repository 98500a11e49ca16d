//! Architectural Enforcement Integration Tests
//!
//! Source-scanning checks run as ordinary tests:
//! - No sleep() calls in production code (wait on I/O or a token instead)
//! - No blocking I/O inside async functions of the relay and client
//! - Every runtime dependency is used by production code
//!
//! The helpers here read the workspace sources; the checks themselves live
//! in `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["relay/core/src", "relay/daemon/src", "client/src"];

/// Crate directories whose manifests are checked, relative to the workspace root
pub const CRATE_DIRS: &[&str] = &["relay/core", "relay/daemon", "client"];

/// A line that broke a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File, relative to the workspace root
    pub file: String,
    /// 1-based line number
    pub line: usize,
    /// What was wrong
    pub rule: &'static str,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}: {}", self.file, self.line, self.rule, self.text)
    }
}

/// Workspace root (two levels above this package)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Every `.rs` file under `dir` (relative to the workspace root)
///
/// # Panics
///
/// Panics if `dir` does not exist, so a moved crate cannot silently
/// escape the checks.
#[must_use]
pub fn rust_sources(dir: &str) -> Vec<PathBuf> {
    let root = workspace_root().join(dir);
    assert!(root.is_dir(), "source directory {dir} not found");

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

/// Lines of production code: everything before the first `#[cfg(test)]`,
/// with `//` comments stripped
#[must_use]
pub fn production_lines(content: &str) -> Vec<&str> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|line| line.split("//").next().unwrap_or(line))
        .collect()
}

/// Crate names declared under `[dependencies]` in a manifest
///
/// Only the runtime table is read; dev and build dependencies are skipped.
#[must_use]
pub fn runtime_dependencies(manifest: &str) -> Vec<String> {
    manifest
        .lines()
        .map(str::trim)
        .skip_while(|line| *line != "[dependencies]")
        .skip(1)
        .take_while(|line| !line.starts_with('['))
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split('=').next())
        .map(|name| name.trim().to_string())
        .collect()
}

/// Whether a production line names `dependency` as a path root
#[must_use]
pub fn mentions_crate(line: &str, dependency: &str) -> bool {
    let ident = dependency.replace('-', "_");
    line.match_indices(&format!("{ident}::"))
        .any(|(at, _)| {
            !line[..at]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
        })
}

/// Whether `line` opens a function
fn is_fn_signature(line: &str) -> bool {
    let line = line.trim_start();
    let line = line
        .strip_prefix("pub(crate) ")
        .or_else(|| line.strip_prefix("pub "))
        .unwrap_or(line);
    line.starts_with("fn ") || line.starts_with("async fn ")
}

/// Whether line `idx` sits inside an `async fn`
///
/// Looks back to the nearest function signature; closures and async blocks
/// inside a plain `fn` count as the plain `fn`.
#[must_use]
pub fn in_async_fn(lines: &[&str], idx: usize) -> bool {
    lines[..=idx]
        .iter()
        .rev()
        .find(|line| is_fn_signature(line))
        .is_some_and(|line| line.trim_start().contains("async fn "))
}

/// Apply `check` to every production line under [`PRODUCTION_DIRS`]
///
/// # Panics
///
/// Panics if a source file cannot be read.
pub fn scan<F>(check: F) -> Vec<Violation>
where
    F: Fn(&[&str], usize) -> Option<&'static str>,
{
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for path in rust_sources(dir) {
            let content = fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("reading {}: {e}", path.display()));
            let lines = production_lines(&content);
            let file = path
                .strip_prefix(&root)
                .unwrap_or(&path)
                .display()
                .to_string();

            for idx in 0..lines.len() {
                if let Some(rule) = check(&lines, idx) {
                    violations.push(Violation {
                        file: file.clone(),
                        line: idx + 1,
                        rule,
                        text: lines[idx].trim().to_string(),
                    });
                }
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let source = "fn a() {} // note\n#[cfg(test)]\nmod tests { fn b() {} }\n";
        assert_eq!(production_lines(source), vec!["fn a() {} "]);
    }

    #[test]
    fn test_in_async_fn() {
        let lines = [
            "pub async fn serve() {",
            "    let x = 1;",
            "}",
            "pub fn open() {",
            "    let y = 2;",
            "}",
        ];
        assert!(in_async_fn(&lines, 1));
        assert!(!in_async_fn(&lines, 4));
    }

    #[test]
    fn test_runtime_dependencies_skip_dev_table() {
        let manifest = "[package]\nname = \"x\"\n\n[dependencies]\n# Logging\ntracing = \"0.1\"\ntokio-util = \"0.7\"\n\n[dev-dependencies]\ntempfile = \"3\"\n";
        assert_eq!(runtime_dependencies(manifest), vec!["tracing", "tokio-util"]);
    }

    #[test]
    fn test_mentions_crate() {
        assert!(mentions_crate("use tokio_util::sync::CancellationToken;", "tokio-util"));
        assert!(mentions_crate("    let v = serde_json::to_vec(&x)?;", "serde_json"));
        assert!(!mentions_crate("use my_serde::Thing;", "serde"));
        assert!(!mentions_crate("// tower::ServiceExt", "axum"));
    }

    #[test]
    fn test_sources_found() {
        assert!(!rust_sources("relay/daemon/src").is_empty());
    }
}
