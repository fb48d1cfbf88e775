// crates/oracle-server/src/delta/commit.rs
// Batch commit: parse, embed, and replace index rows for claimed entries
//
// Per-file failures mark only that entry `failed`; the rest of the batch
// proceeds. Edge re-resolution runs once after all file writes so
// references to symbols added in the same batch resolve.

use crate::db::{
    self, ChangeType, ChunkInsert, DeltaEntry, EdgeInsert, EntryStatus,
};
use crate::error::Result;
use crate::indexer;
use crate::search::utils::embedding_to_bytes;
use crate::utils::{chunk_id, content_hash};
use std::collections::HashMap;
use std::path::Path;

/// Outcome of one batch commit
#[derive(Debug, Clone, Default)]
pub struct CommitStats {
    pub indexed_files: usize,
    pub deleted_files: usize,
    pub failed_files: usize,
    pub chunks: usize,
    pub edges: usize,
}

/// Index or delete every claimed entry, then re-resolve edges and purge.
pub(super) async fn process_entries(
    queue: &super::DeltaQueue,
    project_id: &str,
    root: &Path,
    entries: Vec<DeltaEntry>,
) -> Result<CommitStats> {
    let mut stats = CommitStats::default();
    if entries.is_empty() {
        return Ok(stats);
    }

    for entry in entries {
        let outcome = match entry.change_type {
            ChangeType::Deleted => delete_file(queue, project_id, &entry).await,
            ChangeType::Added | ChangeType::Modified => {
                index_file(queue, project_id, root, &entry, &mut stats).await
            }
        };
        match outcome {
            Ok(deleted) => {
                if deleted {
                    stats.deleted_files += 1;
                } else {
                    stats.indexed_files += 1;
                }
                let id = entry.id.clone();
                queue
                    .pool()
                    .run(move |conn| db::mark_status_sync(conn, &id, EntryStatus::Indexed, None))
                    .await?;
            }
            Err(e) => {
                tracing::warn!("indexing {} failed: {}", entry.file_path, e);
                stats.failed_files += 1;
                let id = entry.id.clone();
                let message = e.to_string();
                queue
                    .pool()
                    .run(move |conn| {
                        db::mark_status_sync(conn, &id, EntryStatus::Failed, Some(&message))
                    })
                    .await?;
            }
        }
    }

    // Re-resolve after all upserts so edges pointing at symbols added in
    // this batch become resolved
    let project = project_id.to_string();
    let resolved = queue
        .pool()
        .run(move |conn| {
            let resolved = db::resolve_edges_sync(conn, &project)?;
            db::purge_indexed_sync(conn, &project)?;
            Ok::<_, crate::error::OracleError>(resolved)
        })
        .await?;

    tracing::info!(
        "commit for {}: {} indexed, {} deleted, {} failed, {} chunks, {} edges resolved",
        project_id,
        stats.indexed_files,
        stats.deleted_files,
        stats.failed_files,
        stats.chunks,
        resolved
    );
    Ok(stats)
}

/// Returns Ok(true) when the entry was a deletion
async fn delete_file(
    queue: &super::DeltaQueue,
    project_id: &str,
    entry: &DeltaEntry,
) -> Result<bool> {
    let project = project_id.to_string();
    let path = entry.file_path.clone();
    queue
        .pool()
        .run(move |conn| db::delete_file_sync(conn, &project, &path))
        .await?;
    Ok(true)
}

async fn index_file(
    queue: &super::DeltaQueue,
    project_id: &str,
    root: &Path,
    entry: &DeltaEntry,
    stats: &mut CommitStats,
) -> Result<bool> {
    let abs = root.join(&entry.file_path);
    let source = match std::fs::read_to_string(&abs) {
        Ok(source) => source,
        Err(_) => {
            // Vanished between enqueue and commit: treat as deleted
            return delete_file(queue, project_id, entry).await;
        }
    };
    let file_hash = content_hash(&source);

    let chunked = indexer::chunk_source(
        &abs,
        &source,
        None,
        queue.indexer_config().max_file_bytes,
    );

    // Embed chunk bodies in one batch; a missing or failing embedder
    // leaves embeddings null and retrieval keyword-only for these rows
    let embeddings: Vec<Option<Vec<u8>>> = match queue.embedder() {
        Some(embedder) => {
            let texts: Vec<String> = chunked
                .chunks
                .iter()
                .map(|c| {
                    let header = c.signature.as_deref().unwrap_or(&c.qualified_name);
                    format!("{header}\n{}", c.body)
                })
                .collect();
            match embedder.embed_batch(&texts).await {
                Ok(vectors) => vectors
                    .into_iter()
                    .map(|v| v.map(|vector| embedding_to_bytes(&vector)))
                    .collect(),
                Err(e) => {
                    tracing::warn!("batch embedding failed for {}: {}", entry.file_path, e);
                    vec![None; chunked.chunks.len()]
                }
            }
        }
        None => vec![None; chunked.chunks.len()],
    };

    let mut inserts = Vec::with_capacity(chunked.chunks.len());
    let mut ids_by_qualified: HashMap<String, String> = HashMap::new();
    for (chunk, embedding) in chunked.chunks.iter().zip(embeddings) {
        let id = chunk_id(project_id, &entry.file_path, &chunk.qualified_name, &file_hash);
        ids_by_qualified.insert(chunk.qualified_name.clone(), id.clone());
        inserts.push(ChunkInsert {
            id,
            language: chunked.language.clone(),
            symbol_name: chunk.symbol_name.clone(),
            qualified_name: chunk.qualified_name.clone(),
            kind: chunk.kind.to_string(),
            signature: chunk.signature.clone(),
            docstring: chunk.docstring.clone(),
            body: chunk.body.clone(),
            start_line: chunk.start_line as i64,
            end_line: chunk.end_line as i64,
            embedding,
        });
    }

    let edges: Vec<EdgeInsert> = chunked
        .refs
        .iter()
        .filter_map(|r| {
            ids_by_qualified
                .get(&r.source_qualified_name)
                .map(|source_id| EdgeInsert {
                    source_chunk_id: source_id.clone(),
                    target_qualified_name: r.target_qualified_name.clone(),
                    edge_type: r.edge_type,
                })
        })
        .collect();

    stats.chunks += inserts.len();
    stats.edges += edges.len();

    let project = project_id.to_string();
    let path = entry.file_path.clone();
    queue
        .pool()
        .run(move |conn| {
            db::upsert_chunks_sync(conn, &project, &path, &inserts, &file_hash)?;
            db::insert_edges_sync(conn, &project, &edges)?;
            Ok::<_, crate::error::OracleError>(())
        })
        .await?;
    Ok(false)
}
