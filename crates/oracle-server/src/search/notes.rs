// crates/oracle-server/src/search/notes.rs
// Note retrieval over the vault collaborator's full-text search

use crate::error::Result;
use crate::search::fusion::RetrievedSnippet;
use crate::vault::Vault;
use oracle_types::SourceKind;
use std::sync::Arc;

/// Full-text retrieval over the vault. Note vector search is deliberately
/// not part of the core.
pub async fn retrieve_notes(
    vault: &Arc<dyn Vault>,
    project_id: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<RetrievedSnippet>> {
    let hits = vault.search_notes(project_id, query, limit).await?;
    let mut snippets = Vec::with_capacity(hits.len());
    for hit in hits {
        let full_text = match vault.read_note(project_id, &hit.note_path).await {
            Ok(note) => note.body,
            Err(e) => {
                tracing::debug!("note body unavailable for {}: {}", hit.note_path, e);
                hit.snippet.clone()
            }
        };
        snippets.push(RetrievedSnippet {
            source: SourceKind::Note,
            path: hit.note_path,
            score: hit.score,
            snippet: format!("{}\n{}", hit.title, hit.snippet),
            full_text,
        });
    }
    Ok(snippets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::MemoryVault;

    #[tokio::test]
    async fn test_retrieve_notes_maps_hits() {
        let vault: Arc<dyn Vault> = Arc::new(MemoryVault::new());
        vault
            .write_note(
                "p1",
                "design/tokens.md",
                "# Token Design\nRefresh tokens rotate on use.",
                None,
                None,
            )
            .await
            .unwrap();

        let snippets = retrieve_notes(&vault, "p1", "refresh tokens", 5).await.unwrap();
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].source, SourceKind::Note);
        assert_eq!(snippets[0].path, "design/tokens.md");
        assert!(snippets[0].full_text.contains("rotate"));
    }

    #[tokio::test]
    async fn test_no_hits_is_empty() {
        let vault: Arc<dyn Vault> = Arc::new(MemoryVault::new());
        let snippets = retrieve_notes(&vault, "p1", "anything", 5).await.unwrap();
        assert!(snippets.is_empty());
    }
}
