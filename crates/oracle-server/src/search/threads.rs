// crates/oracle-server/src/search/threads.rs
// Thread retrieval: vector search over node embeddings, then selective
// lazy summarization of only the matched threads

use crate::db::pool::DatabasePool;
use crate::db::{
    get_thread_sync, nodes_missing_embedding_sync, set_node_embedding_sync,
    thread_vector_search_sync,
};
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::search::fusion::RetrievedSnippet;
use crate::search::utils::embedding_to_bytes;
use crate::threads::SummaryManager;
use oracle_types::SourceKind;
use std::collections::HashMap;
use std::sync::Arc;

/// Embedding backfill cap per retrieval; the rest catches up on the
/// next seek
const BACKFILL_BATCH: usize = 256;

/// Find threads relevant to a query.
///
/// Thread nodes are embedded lazily here (never on push); with no
/// embedder configured the thread source degrades to empty rather than
/// erroring. Each matched thread incurs at most one summary refresh.
pub async fn retrieve_threads(
    pool: &Arc<DatabasePool>,
    embedder: Option<&Arc<dyn Embedder>>,
    summaries: &SummaryManager,
    project_id: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<RetrievedSnippet>> {
    let Some(embedder) = embedder else {
        tracing::debug!("no embedder, thread retrieval disabled");
        return Ok(Vec::new());
    };

    backfill_embeddings(pool, embedder, project_id).await?;

    let query_vector = embedder.embed(query).await?;
    let query_bytes = embedding_to_bytes(&query_vector);
    let project = project_id.to_string();
    let matches = pool
        .run(move |conn| thread_vector_search_sync(conn, &project, &query_bytes, limit * 4))
        .await?;

    // Best-scoring node wins per thread
    let mut best: HashMap<String, (String, f32)> = HashMap::new();
    for (thread_id, _node_id, content, score) in matches {
        let entry = best.entry(thread_id).or_insert((content.clone(), score));
        if score > entry.1 {
            *entry = (content, score);
        }
    }
    let mut ranked: Vec<(String, String, f32)> = best
        .into_iter()
        .map(|(thread_id, (content, score))| (thread_id, content, score))
        .collect();
    ranked.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
    ranked.truncate(limit);

    let mut snippets = Vec::with_capacity(ranked.len());
    for (thread_id, matched_content, score) in ranked {
        // Only matched threads pay for summarization
        let summary = summaries.get_summary(&thread_id, false).await?;
        let title = {
            let thread = thread_id.clone();
            pool.run(move |conn| get_thread_sync(conn, &thread))
                .await?
                .map(|t| t.title)
                .unwrap_or_else(|| thread_id.clone())
        };
        snippets.push(RetrievedSnippet {
            source: SourceKind::Thread,
            path: thread_id,
            score,
            snippet: format!("thread \"{title}\": {}", summary.summary),
            full_text: format!(
                "thread \"{title}\"\nsummary: {}\nmatched message: {matched_content}",
                summary.summary
            ),
        });
    }
    Ok(snippets)
}

/// Embed nodes that were appended since the last retrieval
async fn backfill_embeddings(
    pool: &Arc<DatabasePool>,
    embedder: &Arc<dyn Embedder>,
    project_id: &str,
) -> Result<()> {
    let project = project_id.to_string();
    let missing = pool
        .run(move |conn| nodes_missing_embedding_sync(conn, &project, BACKFILL_BATCH))
        .await?;
    if missing.is_empty() {
        return Ok(());
    }

    let texts: Vec<String> = missing.iter().map(|(_, content)| content.clone()).collect();
    let vectors = embedder.embed_batch(&texts).await?;

    let updates: Vec<(String, Vec<u8>)> = missing
        .into_iter()
        .zip(vectors)
        .filter_map(|((node_id, _), vector)| {
            vector.map(|v| (node_id, embedding_to_bytes(&v)))
        })
        .collect();
    if updates.is_empty() {
        return Ok(());
    }

    let count = updates.len();
    pool.run(move |conn| {
        for (node_id, bytes) in &updates {
            set_node_embedding_sync(conn, node_id, bytes)?;
        }
        Ok::<_, crate::error::OracleError>(())
    })
    .await?;
    tracing::debug!("backfilled {} thread node embeddings", count);
    Ok(())
}
