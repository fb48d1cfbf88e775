// crates/oracle-server/src/threads/mod.rs
// Thread operations: append-only logs with lazy summarization

pub mod summarizer;

pub use summarizer::{Staleness, SummaryManager, ThreadSummary};

use crate::db::pool::DatabasePool;
use crate::db::{ThreadNodeRow, push_node_sync, recent_nodes_sync};
use crate::error::Result;
use std::sync::Arc;

/// Nodes included alongside the summary in a thread read
const READ_RECENT_NODES: usize = 10;

/// A thread read: fresh summary plus the tail of the log
#[derive(Debug, Clone)]
pub struct ThreadReadResult {
    pub summary: ThreadSummary,
    pub recent_nodes: Vec<ThreadNodeRow>,
}

/// Append a node. Write path only: no summarization, no embedding.
pub async fn push(
    pool: &Arc<DatabasePool>,
    thread_id: &str,
    content: &str,
    author: &str,
) -> Result<ThreadNodeRow> {
    let thread = thread_id.to_string();
    let content = content.to_string();
    let author = author.to_string();
    pool.run(move |conn| push_node_sync(conn, &thread, &content, &author))
        .await
}

/// Read a thread: triggers the lazy-summary path, then returns the
/// summary with the most recent nodes.
pub async fn read(
    pool: &Arc<DatabasePool>,
    summaries: &SummaryManager,
    thread_id: &str,
) -> Result<ThreadReadResult> {
    let summary = summaries.get_summary(thread_id, false).await?;
    let thread = thread_id.to_string();
    let recent_nodes = pool
        .run(move |conn| recent_nodes_sync(conn, &thread, READ_RECENT_NODES))
        .await?;
    Ok(ThreadReadResult {
        summary,
        recent_nodes,
    })
}
