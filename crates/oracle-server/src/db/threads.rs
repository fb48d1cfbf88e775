// crates/oracle-server/src/db/threads.rs
// Thread storage: append-only node logs and the summary cache
//
// Writes here are O(append); no summarization or embedding work happens on
// the write path. Embeddings for thread nodes are backfilled lazily by the
// thread retriever.

use crate::error::{OracleError, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

/// One discussion thread
#[derive(Debug, Clone)]
pub struct ThreadRow {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One append-only node in a thread
#[derive(Debug, Clone)]
pub struct ThreadNodeRow {
    pub id: String,
    pub thread_id: String,
    pub parent_node_id: Option<String>,
    pub content: String,
    pub author: String,
    pub created_at: String,
}

/// Cached summary state for a thread
#[derive(Debug, Clone)]
pub struct SummaryCacheRow {
    pub thread_id: String,
    pub summary: String,
    pub last_summarized_node_id: String,
    pub node_count: i64,
    pub tokens_used: i64,
    pub generated_at: String,
}

fn thread_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRow> {
    Ok(ThreadRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadNodeRow> {
    Ok(ThreadNodeRow {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        parent_node_id: row.get(2)?,
        content: row.get(3)?,
        author: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const THREAD_COLUMNS: &str = "id, project_id, title, status, created_at, updated_at";
const NODE_COLUMNS: &str = "id, thread_id, parent_node_id, content, author, created_at";

/// Create a thread and return its row
pub fn create_thread_sync(conn: &Connection, project_id: &str, title: &str) -> Result<ThreadRow> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO threads (id, project_id, title) VALUES (?1, ?2, ?3)",
        params![id, project_id, title],
    )?;
    require_thread_sync(conn, &id)
}

pub fn get_thread_sync(conn: &Connection, thread_id: &str) -> Result<Option<ThreadRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
            params![thread_id],
            thread_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn require_thread_sync(conn: &Connection, thread_id: &str) -> Result<ThreadRow> {
    get_thread_sync(conn, thread_id)?
        .ok_or_else(|| OracleError::NotFound(format!("thread {thread_id}")))
}

/// Threads for a project, most recently updated first
pub fn list_threads_sync(
    conn: &Connection,
    project_id: &str,
    include_archived: bool,
) -> Result<Vec<ThreadRow>> {
    let sql = if include_archived {
        format!(
            "SELECT {THREAD_COLUMNS} FROM threads WHERE project_id = ?1 ORDER BY updated_at DESC"
        )
    } else {
        format!(
            "SELECT {THREAD_COLUMNS} FROM threads
             WHERE project_id = ?1 AND status = 'active' ORDER BY updated_at DESC"
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![project_id], thread_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub fn archive_thread_sync(conn: &Connection, thread_id: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE threads SET status = 'archived', updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        params![thread_id],
    )?;
    if updated == 0 {
        return Err(OracleError::NotFound(format!("thread {thread_id}")));
    }
    Ok(())
}

/// Append a node to a thread's log. The parent is the current latest node;
/// nodes are never edited afterwards.
pub fn push_node_sync(
    conn: &Connection,
    thread_id: &str,
    content: &str,
    author: &str,
) -> Result<ThreadNodeRow> {
    require_thread_sync(conn, thread_id)?;
    let parent = latest_node_id_sync(conn, thread_id)?;
    let id = uuid::Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO thread_nodes (id, thread_id, parent_node_id, content, author, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, thread_id, parent, content, author, created_at],
    )?;
    conn.execute(
        "UPDATE threads SET updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        params![thread_id],
    )?;
    Ok(ThreadNodeRow {
        id,
        thread_id: thread_id.to_string(),
        parent_node_id: parent,
        content: content.to_string(),
        author: author.to_string(),
        created_at,
    })
}

/// Id of the most recent node, if any
pub fn latest_node_id_sync(conn: &Connection, thread_id: &str) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM thread_nodes WHERE thread_id = ?1 ORDER BY rowid DESC LIMIT 1",
            params![thread_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn node_count_sync(conn: &Connection, thread_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM thread_nodes WHERE thread_id = ?1",
        params![thread_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// All nodes in append order
pub fn nodes_sync(conn: &Connection, thread_id: &str) -> Result<Vec<ThreadNodeRow>> {
    let sql = format!(
        "SELECT {NODE_COLUMNS} FROM thread_nodes WHERE thread_id = ?1 ORDER BY rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![thread_id], node_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Nodes appended strictly after the given node, in append order.
/// This is the input set for incremental summarization.
pub fn nodes_after_sync(
    conn: &Connection,
    thread_id: &str,
    after_node_id: &str,
) -> Result<Vec<ThreadNodeRow>> {
    let sql = format!(
        "SELECT {NODE_COLUMNS} FROM thread_nodes
         WHERE thread_id = ?1
           AND rowid > (SELECT rowid FROM thread_nodes WHERE id = ?2)
         ORDER BY rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![thread_id, after_node_id], node_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// The most recent nodes, in append order (for thread_read)
pub fn recent_nodes_sync(
    conn: &Connection,
    thread_id: &str,
    limit: usize,
) -> Result<Vec<ThreadNodeRow>> {
    let sql = format!(
        "SELECT {NODE_COLUMNS} FROM (
             SELECT {NODE_COLUMNS}, rowid AS rid FROM thread_nodes
             WHERE thread_id = ?1 ORDER BY rowid DESC LIMIT ?2
         ) ORDER BY rid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![thread_id, limit as i64], node_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

// =======================================
// Summary cache
// =======================================

pub fn get_summary_cache_sync(
    conn: &Connection,
    thread_id: &str,
) -> Result<Option<SummaryCacheRow>> {
    let row = conn
        .query_row(
            "SELECT thread_id, summary, last_summarized_node_id, node_count, tokens_used,
                    generated_at
             FROM thread_summary_cache WHERE thread_id = ?1",
            params![thread_id],
            |row| {
                Ok(SummaryCacheRow {
                    thread_id: row.get(0)?,
                    summary: row.get(1)?,
                    last_summarized_node_id: row.get(2)?,
                    node_count: row.get(3)?,
                    tokens_used: row.get(4)?,
                    generated_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Write-or-replace the cache row. Concurrent generators race benignly:
/// the second writer wins.
pub fn upsert_summary_cache_sync(
    conn: &Connection,
    thread_id: &str,
    summary: &str,
    last_summarized_node_id: &str,
    node_count: i64,
    tokens_used: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO thread_summary_cache
             (thread_id, summary, last_summarized_node_id, node_count, tokens_used, generated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)
         ON CONFLICT(thread_id) DO UPDATE SET
             summary = excluded.summary,
             last_summarized_node_id = excluded.last_summarized_node_id,
             node_count = excluded.node_count,
             tokens_used = excluded.tokens_used,
             generated_at = CURRENT_TIMESTAMP",
        params![thread_id, summary, last_summarized_node_id, node_count, tokens_used],
    )?;
    Ok(())
}

pub fn delete_summary_cache_sync(conn: &Connection, thread_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM thread_summary_cache WHERE thread_id = ?1",
        params![thread_id],
    )?;
    Ok(())
}

// =======================================
// Node embeddings (backfilled lazily)
// =======================================

/// Nodes of a project's threads that still lack an embedding
pub fn nodes_missing_embedding_sync(
    conn: &Connection,
    project_id: &str,
    limit: usize,
) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT n.id, n.content FROM thread_nodes n
         JOIN threads t ON t.id = n.thread_id
         WHERE t.project_id = ?1 AND n.embedding IS NULL
         ORDER BY n.rowid
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![project_id, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub fn set_node_embedding_sync(conn: &Connection, node_id: &str, embedding: &[u8]) -> Result<()> {
    conn.execute(
        "UPDATE thread_nodes SET embedding = ?2 WHERE id = ?1",
        params![node_id, embedding],
    )?;
    Ok(())
}

/// Cosine scan over embedded thread nodes for a project.
/// Returns (thread_id, node_id, content, similarity).
pub fn thread_vector_search_sync(
    conn: &Connection,
    project_id: &str,
    query_embedding: &[u8],
    limit: usize,
) -> Result<Vec<(String, String, String, f32)>> {
    let mut stmt = conn.prepare(
        "SELECT n.thread_id, n.id, n.content,
                vec_distance_cosine(n.embedding, ?2) AS distance
         FROM thread_nodes n
         JOIN threads t ON t.id = n.thread_id
         WHERE t.project_id = ?1 AND t.status = 'active' AND n.embedding IS NOT NULL
         ORDER BY distance
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![project_id, query_embedding, limit as i64], |row| {
            let distance: f64 = row.get(3)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                crate::search::utils::distance_to_score(distance),
            ))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}
