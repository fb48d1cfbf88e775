// crates/oracle-server/src/config/ignore.rs
// Directory and file skip rules for project scans

/// Directory names that are never scanned or watched
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    "vendor",
    "venv",
    ".venv",
    "env",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".ruff_cache",
    ".next",
    ".nuxt",
    ".cargo",
    ".idea",
    ".vscode",
    "coverage",
    ".tox",
];

/// Returns true if a path component should be skipped entirely.
/// Hidden entries (dot-prefixed) are skipped except for a few well-known
/// config files handled by callers.
pub fn should_skip(name: &str) -> bool {
    if name.starts_with('.') && name != "." && name != ".." {
        return true;
    }
    SKIP_DIRS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_build_outputs() {
        assert!(should_skip("node_modules"));
        assert!(should_skip("target"));
        assert!(should_skip("__pycache__"));
    }

    #[test]
    fn test_skips_hidden() {
        assert!(should_skip(".git"));
        assert!(should_skip(".env"));
    }

    #[test]
    fn test_keeps_source_dirs() {
        assert!(!should_skip("src"));
        assert!(!should_skip("lib"));
        assert!(!should_skip("tests"));
    }
}
