// crates/oracle-server/src/vault.rs
// Note vault collaborator interface
//
// Persistent markdown storage lives outside the core; the engine consumes
// this trait for note lookup, full-text search, and optimistic writes.
// `MemoryVault` is the in-process implementation used when no external
// vault is wired up, and the double used by the test suite.

use crate::error::{OracleError, Result};
use crate::utils::query_tokens;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Listing entry for a note
#[derive(Debug, Clone)]
pub struct NoteMeta {
    pub note_path: String,
    pub title: String,
    pub updated: String,
}

/// A full note with metadata and version
#[derive(Debug, Clone)]
pub struct Note {
    pub note_path: String,
    pub title: String,
    pub body: String,
    pub metadata: serde_json::Value,
    pub version: i64,
    pub updated: String,
}

/// One full-text search hit
#[derive(Debug, Clone)]
pub struct NoteSearchHit {
    pub note_path: String,
    pub title: String,
    pub snippet: String,
    pub score: f32,
}

/// Read/write access to the markdown knowledge vault
#[async_trait]
pub trait Vault: Send + Sync {
    async fn list_notes(&self, project_id: &str, folder: Option<&str>) -> Result<Vec<NoteMeta>>;

    async fn read_note(&self, project_id: &str, note_path: &str) -> Result<Note>;

    /// Create or update a note. `if_version` enables optimistic
    /// concurrency: a mismatch fails with Conflict. Returns the new
    /// version.
    async fn write_note(
        &self,
        project_id: &str,
        note_path: &str,
        body: &str,
        metadata: Option<serde_json::Value>,
        if_version: Option<i64>,
    ) -> Result<i64>;

    async fn search_notes(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<NoteSearchHit>>;
}

/// In-process vault backed by a map, keyed (project_id, note_path)
#[derive(Default)]
pub struct MemoryVault {
    notes: RwLock<HashMap<(String, String), Note>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Title falls back to the first heading or the file stem
fn derive_title(note_path: &str, body: &str) -> String {
    for line in body.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix('#') {
            let heading = heading.trim_start_matches('#').trim();
            if !heading.is_empty() {
                return heading.to_string();
            }
        }
    }
    note_path
        .rsplit('/')
        .next()
        .unwrap_or(note_path)
        .trim_end_matches(".md")
        .to_string()
}

/// Token-overlap score and a window around the first match
fn score_note(body: &str, tokens: &[String]) -> Option<(f32, String)> {
    if tokens.is_empty() {
        return None;
    }
    let lower = body.to_lowercase();
    let mut matched = 0usize;
    let mut first_hit: Option<usize> = None;
    for token in tokens {
        if let Some(pos) = lower.find(token.as_str()) {
            matched += 1;
            first_hit = Some(first_hit.map_or(pos, |p: usize| p.min(pos)));
        }
    }
    if matched == 0 {
        return None;
    }
    let score = matched as f32 / tokens.len() as f32;
    let mut start = first_hit.unwrap_or(0).saturating_sub(80);
    while start > 0 && !body.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (start + 240).min(body.len());
    while end < body.len() && !body.is_char_boundary(end) {
        end += 1;
    }
    let snippet = body[start..end].trim().to_string();
    Some((score, snippet))
}

#[async_trait]
impl Vault for MemoryVault {
    async fn list_notes(&self, project_id: &str, folder: Option<&str>) -> Result<Vec<NoteMeta>> {
        let notes = self.notes.read().await;
        let mut result: Vec<NoteMeta> = notes
            .iter()
            .filter(|((p, _), _)| p == project_id)
            .filter(|(_, n)| folder.is_none_or(|f| n.note_path.starts_with(f)))
            .map(|(_, n)| NoteMeta {
                note_path: n.note_path.clone(),
                title: n.title.clone(),
                updated: n.updated.clone(),
            })
            .collect();
        result.sort_by(|a, b| a.note_path.cmp(&b.note_path));
        Ok(result)
    }

    async fn read_note(&self, project_id: &str, note_path: &str) -> Result<Note> {
        let notes = self.notes.read().await;
        notes
            .get(&(project_id.to_string(), note_path.to_string()))
            .cloned()
            .ok_or_else(|| OracleError::NotFound(format!("note {note_path}")))
    }

    async fn write_note(
        &self,
        project_id: &str,
        note_path: &str,
        body: &str,
        metadata: Option<serde_json::Value>,
        if_version: Option<i64>,
    ) -> Result<i64> {
        let key = (project_id.to_string(), note_path.to_string());
        let mut notes = self.notes.write().await;
        let current_version = notes.get(&key).map(|n| n.version).unwrap_or(0);

        if let Some(expected) = if_version
            && expected != current_version
        {
            return Err(OracleError::Conflict(format!(
                "note {note_path} is at version {current_version}, expected {expected}"
            )));
        }

        let version = current_version + 1;
        notes.insert(
            key,
            Note {
                note_path: note_path.to_string(),
                title: derive_title(note_path, body),
                body: body.to_string(),
                metadata: metadata.unwrap_or(serde_json::Value::Null),
                version,
                updated: Utc::now().to_rfc3339(),
            },
        );
        Ok(version)
    }

    async fn search_notes(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<NoteSearchHit>> {
        let tokens = query_tokens(query);
        let notes = self.notes.read().await;
        let mut hits: Vec<NoteSearchHit> = notes
            .iter()
            .filter(|((p, _), _)| p == project_id)
            .filter_map(|(_, note)| {
                let haystack = format!("{}\n{}", note.title, note.body);
                score_note(&haystack, &tokens).map(|(score, snippet)| NoteSearchHit {
                    note_path: note.note_path.clone(),
                    title: note.title.clone(),
                    snippet,
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.note_path.cmp(&b.note_path)));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let vault = MemoryVault::new();
        let v1 = vault
            .write_note("p1", "design/auth.md", "# Auth Design\nTokens expire.", None, None)
            .await
            .unwrap();
        assert_eq!(v1, 1);

        let note = vault.read_note("p1", "design/auth.md").await.unwrap();
        assert_eq!(note.title, "Auth Design");
        assert_eq!(note.version, 1);
    }

    #[tokio::test]
    async fn test_version_conflict() {
        let vault = MemoryVault::new();
        vault
            .write_note("p1", "a.md", "one", None, None)
            .await
            .unwrap();
        let err = vault
            .write_note("p1", "a.md", "two", None, Some(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let v2 = vault
            .write_note("p1", "a.md", "two", None, Some(1))
            .await
            .unwrap();
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let vault = MemoryVault::new();
        let err = vault.read_note("p1", "ghost.md").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_search_scores_by_overlap() {
        let vault = MemoryVault::new();
        vault
            .write_note("p1", "auth.md", "token expiration policy for sessions", None, None)
            .await
            .unwrap();
        vault
            .write_note("p1", "deploy.md", "kubernetes rollout notes", None, None)
            .await
            .unwrap();

        let hits = vault.search_notes("p1", "token expiration", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].note_path, "auth.md");
        assert!(hits[0].snippet.contains("token"));
    }

    #[tokio::test]
    async fn test_search_scoped_to_project() {
        let vault = MemoryVault::new();
        vault
            .write_note("p1", "a.md", "shared term", None, None)
            .await
            .unwrap();
        vault
            .write_note("p2", "b.md", "shared term", None, None)
            .await
            .unwrap();
        let hits = vault.search_notes("p1", "shared", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].note_path, "a.md");
    }
}
