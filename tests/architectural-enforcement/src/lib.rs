//! Architectural Enforcement
//!
//! Source-scanning helpers shared by the enforcement tests in `tests/`:
//! - No blocking sleeps in production code
//! - No process-wide mutable registries
//!
//! Production code is every `.rs` file under the gateway crates' `src/`
//! directories, minus test-only files and `#[cfg(test)]` modules.

use std::fs;
use std::path::{Path, PathBuf};

/// Crate source roots that count as production code
pub const PRODUCTION_ROOTS: &[&str] = &["gateway/core/src", "gateway/cli/src"];

/// Files compiled only under `cfg(test)`
const TEST_ONLY_FILES: &[&str] = &["test_utils.rs"];

/// One line of production code
#[derive(Debug, Clone)]
pub struct CodeLine {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// Line text with any trailing `//` comment removed
    pub code: String,
}

impl std::fmt::Display for CodeLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.number, self.code.trim())
    }
}

/// Workspace root (two levels above this package)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Every production source file under [`PRODUCTION_ROOTS`]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_ROOTS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            let file = entry.path();
            let is_rust = file.extension().and_then(|s| s.to_str()) == Some("rs");
            let test_only = file
                .file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|name| TEST_ONLY_FILES.contains(&name));
            if is_rust && !test_only {
                files.push(file.to_path_buf());
            }
        }
    }

    files.sort();
    files
}

/// Production lines of one file
///
/// Stops at the first `#[cfg(test)]` attribute: test modules sit at the end
/// of each file in this workspace. Comment-only lines are skipped.
pub fn production_lines(path: &Path) -> Vec<CodeLine> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };

    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .filter_map(|(idx, line)| {
            let code = line.split("//").next().unwrap_or(line);
            (!code.trim().is_empty()).then(|| CodeLine {
                path: path.to_path_buf(),
                number: idx + 1,
                code: code.to_string(),
            })
        })
        .collect()
}

/// Production lines matching `predicate`, across all production files
pub fn find_violations<F>(predicate: F) -> Vec<CodeLine>
where
    F: Fn(&CodeLine) -> bool,
{
    production_files()
        .iter()
        .flat_map(|path| production_lines(path))
        .filter(|line| predicate(line))
        .collect()
}

/// Panic with a readable report when `violations` is non-empty
pub fn assert_no_violations(rule: &str, violations: &[CodeLine]) {
    if violations.is_empty() {
        return;
    }
    for violation in violations {
        eprintln!("  {violation}");
    }
    panic!("\n{rule}: found {} violation(s) in production code", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanner_finds_the_gateway_sources() {
        let files = production_files();
        assert!(files.iter().any(|f| f.ends_with("gateway/core/src/lib.rs")));
        assert!(files.iter().any(|f| f.ends_with("gateway/cli/src/main.rs")));
        assert!(!files.iter().any(|f| f.ends_with("test_utils.rs")));
    }

    #[test]
    fn test_lines_stop_at_test_module() {
        let lines = production_lines(&workspace_root().join("gateway/core/src/routing/cooldown.rs"));
        assert!(!lines.is_empty());
        assert!(!lines.iter().any(|l| l.code.contains("start_paused")));
    }
}
