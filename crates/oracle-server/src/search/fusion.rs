// crates/oracle-server/src/search/fusion.rs
// Hybrid code retrieval: BM25 + vector + graph neighbors, fused by
// weighted normalized rank

use crate::config::RetrievalConfig;
use crate::db::pool::DatabasePool;
use crate::db::{
    ChunkRow, fts_search_sync, get_chunks_by_ids_sync, graph_neighbors_sync, vector_search_sync,
};
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::search::utils::embedding_to_bytes;
use crate::utils::estimate_tokens;
use async_trait::async_trait;
use oracle_types::SourceKind;
use std::collections::HashMap;
use std::sync::Arc;

/// Graph seeds are the best hits from the text paths
const GRAPH_SEED_COUNT: usize = 5;

/// Lines of body shown inline before the caller must read the full text
const SNIPPET_LINES: usize = 12;

/// One ranked context item with citation material
#[derive(Debug, Clone)]
pub struct RetrievedSnippet {
    pub source: SourceKind,
    pub path: String,
    pub score: f32,
    pub snippet: String,
    pub full_text: String,
}

/// Optional second-stage reranker applied to the fused top-K.
/// When absent the fused score is used directly.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, snippets: &mut [RetrievedSnippet]) -> Result<()>;
}

/// Per-candidate rank bookkeeping before fusion
#[derive(Default, Clone)]
struct Candidate {
    keyword_rank: Option<usize>,
    vector_rank: Option<usize>,
    graph_distance: Option<u32>,
}

/// Fuse ranked lists into (chunk_id, fused_score, best_single_rank).
///
/// Each path contributes `weight * (1 - rank/len)`; the graph path
/// contributes `weight / distance`. Ties break toward the candidate with
/// the best individual-source rank.
fn fuse_ranks(
    keyword: &[(String, f32)],
    vector: &[(String, f32)],
    graph: &[(String, u32)],
    config: &RetrievalConfig,
) -> Vec<(String, f32)> {
    let mut candidates: HashMap<String, Candidate> = HashMap::new();

    for (rank, (id, _)) in keyword.iter().enumerate() {
        candidates.entry(id.clone()).or_default().keyword_rank = Some(rank);
    }
    for (rank, (id, _)) in vector.iter().enumerate() {
        candidates.entry(id.clone()).or_default().vector_rank = Some(rank);
    }
    for (id, distance) in graph {
        let entry = candidates.entry(id.clone()).or_default();
        entry.graph_distance = Some(match entry.graph_distance {
            Some(existing) => existing.min(*distance),
            None => *distance,
        });
    }

    let norm = |rank: Option<usize>, len: usize| -> f32 {
        match rank {
            Some(r) if len > 0 => 1.0 - (r as f32 / len as f32),
            _ => 0.0,
        }
    };

    let mut fused: Vec<(String, f32, usize)> = candidates
        .into_iter()
        .map(|(id, c)| {
            let score = config.keyword_weight * norm(c.keyword_rank, keyword.len())
                + config.vector_weight * norm(c.vector_rank, vector.len())
                + config.graph_weight
                    * c.graph_distance.map_or(0.0, |d| 1.0 / d.max(1) as f32);
            let best_rank = [
                c.keyword_rank,
                c.vector_rank,
                c.graph_distance.map(|d| d as usize),
            ]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(usize::MAX);
            (id, score, best_rank)
        })
        .collect();

    fused.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then(a.2.cmp(&b.2))
            .then(a.0.cmp(&b.0))
    });
    fused.into_iter().map(|(id, score, _)| (id, score)).collect()
}

/// Run the three-path hybrid retrieval over the code index.
///
/// BM25 and vector search run concurrently; the graph walk is seeded by
/// their best hits. A missing or failing embedder degrades to the
/// keyword path without error.
pub async fn retrieve_code(
    pool: &Arc<DatabasePool>,
    embedder: Option<&Arc<dyn Embedder>>,
    config: &RetrievalConfig,
    project_id: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<RetrievedSnippet>> {
    let candidate_limit = config.candidate_limit.max(limit);

    let query_embedding = match embedder {
        Some(embedder) => match embedder.embed(query).await {
            Ok(vector) => Some(embedding_to_bytes(&vector)),
            Err(e) => {
                tracing::warn!("query embedding failed, keyword-only search: {}", e);
                None
            }
        },
        None => None,
    };

    let keyword_fut = {
        let pool = pool.clone();
        let project = project_id.to_string();
        let query = query.to_string();
        async move {
            pool.run(move |conn| fts_search_sync(conn, &project, &query, candidate_limit))
                .await
        }
    };
    let vector_fut = {
        let pool = pool.clone();
        let project = project_id.to_string();
        async move {
            match query_embedding {
                Some(bytes) => {
                    pool.run(move |conn| vector_search_sync(conn, &project, &bytes, candidate_limit))
                        .await
                }
                None => Ok(Vec::new()),
            }
        }
    };

    let (keyword, vector) = tokio::join!(keyword_fut, vector_fut);
    let keyword = keyword.unwrap_or_else(|e| {
        tracing::warn!("keyword search failed: {}", e);
        Vec::new()
    });
    let vector = vector.unwrap_or_else(|e| {
        tracing::warn!("vector search failed: {}", e);
        Vec::new()
    });

    // Seed the graph walk with the strongest text hits
    let mut seeds: Vec<String> = Vec::new();
    for (id, _) in keyword.iter().chain(vector.iter()).take(GRAPH_SEED_COUNT * 2) {
        if !seeds.contains(id) {
            seeds.push(id.clone());
        }
        if seeds.len() >= GRAPH_SEED_COUNT {
            break;
        }
    }

    let graph: Vec<(String, u32)> = if seeds.is_empty() {
        Vec::new()
    } else {
        let pool = pool.clone();
        let project = project_id.to_string();
        let hops = config.graph_hops;
        pool.run(move |conn| {
            let neighbors = graph_neighbors_sync(conn, &project, &seeds, hops, candidate_limit)?;
            Ok::<_, crate::error::OracleError>(
                neighbors
                    .into_iter()
                    .map(|n| (n.chunk_id, n.distance))
                    .collect(),
            )
        })
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("graph search failed: {}", e);
            Vec::new()
        })
    };

    let mut ranked = fuse_ranks(&keyword, &vector, &graph, config);
    ranked.truncate(limit);
    let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
    let scores: HashMap<String, f32> = ranked.into_iter().collect();

    let rows = pool
        .run(move |conn| get_chunks_by_ids_sync(conn, &ids))
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let score = scores.get(&row.id).copied().unwrap_or(0.0);
            chunk_to_snippet(row, score)
        })
        .collect())
}

/// Render a chunk row as a citable snippet
fn chunk_to_snippet(row: ChunkRow, score: f32) -> RetrievedSnippet {
    let mut header = format!("{} {} ({}:{})", row.kind, row.qualified_name, row.file_path, row.start_line);
    if let Some(sig) = &row.signature {
        header = format!("{header}\n{sig}");
    }
    let body_excerpt: String = row
        .body
        .lines()
        .take(SNIPPET_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    RetrievedSnippet {
        source: SourceKind::Code,
        path: row.file_path,
        score,
        snippet: format!("{header}\n{body_excerpt}"),
        full_text: row.body,
    }
}

/// Keep the highest-scoring items that fit the token budget.
/// The input must already be sorted by descending score.
pub fn truncate_to_budget(snippets: Vec<RetrievedSnippet>, token_budget: usize) -> Vec<RetrievedSnippet> {
    let mut kept = Vec::with_capacity(snippets.len());
    let mut spent = 0usize;
    for snippet in snippets {
        let cost = estimate_tokens(&snippet.snippet);
        if spent + cost > token_budget && !kept.is_empty() {
            break;
        }
        spent += cost;
        kept.push(snippet);
    }
    kept
}
