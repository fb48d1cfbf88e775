// crates/oracle-server/src/threads/summarizer.rs
// Lazy thread summaries: generated on read, cached, updated incrementally
//
// Appending to a thread never does LLM or embedding work. The first read
// after new nodes pays for an incremental update whose input is the prior
// summary plus only the new nodes.

use crate::db::pool::DatabasePool;
use crate::db::{
    ThreadNodeRow, delete_summary_cache_sync, get_summary_cache_sync, latest_node_id_sync,
    node_count_sync, nodes_after_sync, nodes_sync, upsert_summary_cache_sync,
};
use crate::error::Result;
use crate::llm::{LlmClient, Message};
use crate::utils::estimate_tokens;
use std::sync::Arc;

const FULL_SUMMARY_PROMPT: &str = "Summarize the following discussion thread in a short \
paragraph. Keep decisions, open questions, and concrete facts; drop pleasantries.";

const INCREMENTAL_SUMMARY_PROMPT: &str = "Below is an existing summary of a discussion thread \
followed by messages added since it was written. Produce an updated summary that folds the new \
messages in. Keep decisions, open questions, and concrete facts; drop pleasantries.";

/// A summary returned to a caller. Reflects every node that existed at
/// the moment of the call.
#[derive(Debug, Clone)]
pub struct ThreadSummary {
    pub summary: String,
    pub node_count: i64,
    /// Whether this call performed LLM work (false = cache hit)
    pub generated: bool,
}

/// Staleness report from the cheap metadata-only check
#[derive(Debug, Clone)]
pub struct Staleness {
    pub is_stale: bool,
    pub last_summarized_node_id: Option<String>,
    pub new_node_count: i64,
}

/// Manages the per-thread summary cache
pub struct SummaryManager {
    pool: Arc<DatabasePool>,
    llm: Arc<dyn LlmClient>,
}

impl SummaryManager {
    pub fn new(pool: Arc<DatabasePool>, llm: Arc<dyn LlmClient>) -> Self {
        Self { pool, llm }
    }

    /// Read-through summary access.
    ///
    /// Cache states: absent -> full summarize; fresh -> return verbatim
    /// with zero LLM calls; stale -> incremental summarize over only the
    /// nodes after `last_summarized_node_id`. `force` bypasses the cache
    /// entirely.
    pub async fn get_summary(&self, thread_id: &str, force: bool) -> Result<ThreadSummary> {
        let thread = thread_id.to_string();
        let (cache, latest, node_count) = self
            .pool
            .run(move |conn| {
                let cache = get_summary_cache_sync(conn, &thread)?;
                let latest = latest_node_id_sync(conn, &thread)?;
                let count = node_count_sync(conn, &thread)?;
                Ok::<_, crate::error::OracleError>((cache, latest, count))
            })
            .await?;

        let Some(latest) = latest else {
            return Ok(ThreadSummary {
                summary: String::new(),
                node_count: 0,
                generated: false,
            });
        };

        if !force
            && let Some(cache) = &cache
            && cache.last_summarized_node_id == latest
        {
            return Ok(ThreadSummary {
                summary: cache.summary.clone(),
                node_count: cache.node_count,
                generated: false,
            });
        }

        let (summary, tokens_used) = match (&cache, force) {
            (Some(cache), false) => {
                let thread = thread_id.to_string();
                let last = cache.last_summarized_node_id.clone();
                let new_nodes = self
                    .pool
                    .run(move |conn| nodes_after_sync(conn, &thread, &last))
                    .await?;
                self.incremental_summary(&cache.summary, &new_nodes).await?
            }
            _ => {
                let thread = thread_id.to_string();
                let nodes = self
                    .pool
                    .run(move |conn| nodes_sync(conn, &thread))
                    .await?;
                self.full_summary(&nodes).await?
            }
        };

        let thread = thread_id.to_string();
        let summary_clone = summary.clone();
        self.pool
            .run(move |conn| {
                upsert_summary_cache_sync(
                    conn,
                    &thread,
                    &summary_clone,
                    &latest,
                    node_count,
                    tokens_used,
                )
            })
            .await?;

        Ok(ThreadSummary {
            summary,
            node_count,
            generated: true,
        })
    }

    /// Drop the cache entry (e.g. after a model change)
    pub async fn invalidate(&self, thread_id: &str) -> Result<()> {
        let thread = thread_id.to_string();
        self.pool
            .run(move |conn| delete_summary_cache_sync(conn, &thread))
            .await
    }

    /// Metadata-only staleness check; never touches the LLM
    pub async fn check_staleness(&self, thread_id: &str) -> Result<Staleness> {
        let thread = thread_id.to_string();
        self.pool
            .run(move |conn| {
                let cache = get_summary_cache_sync(conn, &thread)?;
                let latest = latest_node_id_sync(conn, &thread)?;
                let count = node_count_sync(conn, &thread)?;
                let (is_stale, last, new_count) = match (&cache, &latest) {
                    (None, Some(_)) => (true, None, count),
                    (None, None) => (false, None, 0),
                    (Some(cache), None) => {
                        (false, Some(cache.last_summarized_node_id.clone()), 0)
                    }
                    (Some(cache), Some(latest)) => {
                        if &cache.last_summarized_node_id == latest {
                            (false, Some(cache.last_summarized_node_id.clone()), 0)
                        } else {
                            let after = nodes_after_sync(
                                conn,
                                &thread,
                                &cache.last_summarized_node_id,
                            )?;
                            (
                                true,
                                Some(cache.last_summarized_node_id.clone()),
                                after.len() as i64,
                            )
                        }
                    }
                };
                Ok::<_, crate::error::OracleError>(Staleness {
                    is_stale,
                    last_summarized_node_id: last,
                    new_node_count: new_count,
                })
            })
            .await
    }

    async fn full_summary(&self, nodes: &[ThreadNodeRow]) -> Result<(String, i64)> {
        let transcript = render_nodes(nodes);
        let prompt = format!("{FULL_SUMMARY_PROMPT}\n\n{transcript}");
        self.complete(prompt).await
    }

    async fn incremental_summary(
        &self,
        prior_summary: &str,
        new_nodes: &[ThreadNodeRow],
    ) -> Result<(String, i64)> {
        let transcript = render_nodes(new_nodes);
        let prompt = format!(
            "{INCREMENTAL_SUMMARY_PROMPT}\n\nExisting summary:\n{prior_summary}\n\nNew messages:\n{transcript}"
        );
        self.complete(prompt).await
    }

    async fn complete(&self, prompt: String) -> Result<(String, i64)> {
        let estimated = estimate_tokens(&prompt) as i64;
        let result = self.llm.chat(vec![Message::user(prompt)], None).await?;
        let tokens = result
            .usage
            .map(|u| u.total_tokens as i64)
            .unwrap_or(estimated);
        Ok((result.content.unwrap_or_default(), tokens))
    }
}

fn render_nodes(nodes: &[ThreadNodeRow]) -> String {
    nodes
        .iter()
        .map(|n| format!("[{}] {}", n.author, n.content))
        .collect::<Vec<_>>()
        .join("\n")
}
