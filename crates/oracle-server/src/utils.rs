// crates/oracle-server/src/utils.rs
// Small shared helpers

use sha2::{Digest, Sha256};
use std::path::Path;

/// Convert a path to a String, lossily if necessary
pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Hex SHA-256 of arbitrary bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Content hash used for file states and chunk identity
pub fn content_hash(content: &str) -> String {
    sha256_hex(content.as_bytes())
}

/// Stable chunk id: hash of project, file, qualified symbol, and file hash.
/// Re-indexing an unchanged file reproduces the same ids.
pub fn chunk_id(project_id: &str, file_path: &str, qualified_name: &str, file_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(file_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(qualified_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(file_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Rough token estimate (chars / 4), used for prompt budgeting.
/// Deliberately cheap; budgets are soft limits, not billing.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Truncate a string to at most `max_chars`, cutting at a char boundary
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Lowercased alphanumeric/underscore tokens of a query string
pub fn query_tokens(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in query.chars() {
        if c.is_alphanumeric() || c == '_' {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_stable() {
        let a = chunk_id("p1", "src/auth.py", "login", "abc");
        let b = chunk_id("p1", "src/auth.py", "login", "abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_chunk_id_varies_by_component() {
        let base = chunk_id("p1", "a.py", "f", "h1");
        assert_ne!(base, chunk_id("p2", "a.py", "f", "h1"));
        assert_ne!(base, chunk_id("p1", "b.py", "f", "h1"));
        assert_ne!(base, chunk_id("p1", "a.py", "g", "h1"));
        assert_ne!(base, chunk_id("p1", "a.py", "f", "h2"));
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_truncate_chars_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn test_query_tokens() {
        assert_eq!(
            query_tokens("How does auth_token work? (v2)"),
            vec!["how", "does", "auth_token", "work", "v2"]
        );
        assert!(query_tokens("...").is_empty());
    }
}
