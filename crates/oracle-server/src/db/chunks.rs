// crates/oracle-server/src/db/chunks.rs
// Chunk storage: file-scoped upserts, BM25 search, vector search

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;

/// A chunk row ready for insertion
#[derive(Debug, Clone)]
pub struct ChunkInsert {
    pub id: String,
    pub language: String,
    pub symbol_name: String,
    pub qualified_name: String,
    pub kind: String,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub body: String,
    pub start_line: i64,
    pub end_line: i64,
    pub embedding: Option<Vec<u8>>,
}

/// A stored chunk
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub id: String,
    pub project_id: String,
    pub file_path: String,
    pub language: String,
    pub symbol_name: String,
    pub qualified_name: String,
    pub kind: String,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub body: String,
    pub start_line: i64,
    pub end_line: i64,
    pub file_hash: String,
}

/// Aggregate index statistics for a project
#[derive(Debug, Clone, Default)]
pub struct IndexStatus {
    pub chunk_count: i64,
    pub file_count: i64,
    pub embedded_count: i64,
    pub edge_count: i64,
}

fn chunk_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRow> {
    Ok(ChunkRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        file_path: row.get(2)?,
        language: row.get(3)?,
        symbol_name: row.get(4)?,
        qualified_name: row.get(5)?,
        kind: row.get(6)?,
        signature: row.get(7)?,
        docstring: row.get(8)?,
        body: row.get(9)?,
        start_line: row.get(10)?,
        end_line: row.get(11)?,
        file_hash: row.get(12)?,
    })
}

const CHUNK_COLUMNS: &str = "id, project_id, file_path, language, symbol_name, qualified_name, \
     kind, signature, docstring, body, start_line, end_line, file_hash";

/// Replace all chunks for one file atomically.
///
/// Deletes existing chunk rows, their FTS entries, and their outgoing
/// edges, inserts the replacements, and records the file hash - all in a
/// single transaction. A failure rolls the file back to its prior state.
pub fn upsert_chunks_sync(
    conn: &Connection,
    project_id: &str,
    file_path: &str,
    chunks: &[ChunkInsert],
    file_hash: &str,
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    delete_file_rows(&tx, project_id, file_path)?;

    for chunk in chunks {
        tx.execute(
            "INSERT INTO code_chunks (id, project_id, file_path, language, symbol_name,
                 qualified_name, kind, signature, docstring, body, start_line, end_line,
                 file_hash, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                chunk.id,
                project_id,
                file_path,
                chunk.language,
                chunk.symbol_name,
                chunk.qualified_name,
                chunk.kind,
                chunk.signature,
                chunk.docstring,
                chunk.body,
                chunk.start_line,
                chunk.end_line,
                file_hash,
                chunk.embedding,
            ],
        )?;
        tx.execute(
            "INSERT INTO code_fts (symbol_name, qualified_name, signature, docstring, body,
                 chunk_id, project_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chunk.symbol_name,
                chunk.qualified_name,
                chunk.signature.as_deref().unwrap_or(""),
                chunk.docstring.as_deref().unwrap_or(""),
                chunk.body,
                chunk.id,
                project_id,
            ],
        )?;
    }

    tx.execute(
        "INSERT INTO file_states (project_id, file_path, content_hash, last_indexed_at)
         VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
         ON CONFLICT(project_id, file_path) DO UPDATE
             SET content_hash = excluded.content_hash,
                 last_indexed_at = CURRENT_TIMESTAMP",
        params![project_id, file_path, file_hash],
    )?;

    tx.commit()?;
    Ok(())
}

/// Remove a file from the index: chunks, FTS entries, edges, file state
pub fn delete_file_sync(conn: &Connection, project_id: &str, file_path: &str) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    delete_file_rows(&tx, project_id, file_path)?;
    tx.execute(
        "DELETE FROM file_states WHERE project_id = ?1 AND file_path = ?2",
        params![project_id, file_path],
    )?;
    tx.commit()?;
    Ok(())
}

/// Shared deletion of chunk rows and dependents for one file.
/// Must run inside a transaction.
fn delete_file_rows(conn: &Connection, project_id: &str, file_path: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM code_fts WHERE chunk_id IN
             (SELECT id FROM code_chunks WHERE project_id = ?1 AND file_path = ?2)",
        params![project_id, file_path],
    )?;
    conn.execute(
        "DELETE FROM symbol_edges WHERE source_chunk_id IN
             (SELECT id FROM code_chunks WHERE project_id = ?1 AND file_path = ?2)",
        params![project_id, file_path],
    )?;
    conn.execute(
        "DELETE FROM code_chunks WHERE project_id = ?1 AND file_path = ?2",
        params![project_id, file_path],
    )?;
    Ok(())
}

/// Build a safe FTS5 MATCH expression from raw user input.
///
/// Tokens are reduced to alphanumerics and underscores, wrapped in double
/// quotes, and joined with OR; a trailing `*` on a token is preserved as a
/// prefix query. Everything else (operators, parentheses, quotes) is
/// stripped so no user input can reach the FTS parser as syntax.
pub fn sanitize_fts_query(query: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    for raw in query.split_whitespace() {
        let prefix = raw.ends_with('*');
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if cleaned.is_empty() {
            continue;
        }
        if prefix {
            parts.push(format!("\"{cleaned}\"*"));
        } else {
            parts.push(format!("\"{cleaned}\""));
        }
    }
    parts.join(" OR ")
}

/// BM25 ranking over the five searchable columns, weighted 3x for names,
/// 2x for signatures, 1x for docstring/body. Returns (chunk_id, score)
/// with score normalized to 0..1; empty input yields no rows.
pub fn fts_search_sync(
    conn: &Connection,
    project_id: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<(String, f32)>> {
    let match_expr = sanitize_fts_query(query);
    if match_expr.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT chunk_id, bm25(code_fts, 3.0, 3.0, 2.0, 1.0, 1.0) AS score
         FROM code_fts
         WHERE code_fts MATCH ?1 AND project_id = ?2
         ORDER BY score
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![match_expr, project_id, limit as i64], |row| {
            let raw: f64 = row.get(1)?;
            // BM25 is negative, lower is better; normalize into 0..1
            let score = ((-raw + 20.0) / 20.0).clamp(0.0, 1.0) as f32;
            Ok((row.get::<_, String>(0)?, score))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Cosine similarity scan over chunks with embeddings.
/// Returns (chunk_id, similarity); empty when no embeddings exist.
pub fn vector_search_sync(
    conn: &Connection,
    project_id: &str,
    query_embedding: &[u8],
    limit: usize,
) -> Result<Vec<(String, f32)>> {
    let mut stmt = conn.prepare(
        "SELECT id, vec_distance_cosine(embedding, ?2) AS distance
         FROM code_chunks
         WHERE project_id = ?1 AND embedding IS NOT NULL
         ORDER BY distance
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(
            params![project_id, query_embedding, limit as i64],
            |row| {
                let distance: f64 = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    crate::search::utils::distance_to_score(distance),
                ))
            },
        )?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Fetch chunk rows by id, preserving the order of the input ids
pub fn get_chunks_by_ids_sync(conn: &Connection, ids: &[String]) -> Result<Vec<ChunkRow>> {
    let mut by_id: HashMap<String, ChunkRow> = HashMap::with_capacity(ids.len());
    let sql = format!("SELECT {CHUNK_COLUMNS} FROM code_chunks WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    for id in ids {
        if let Some(chunk) = stmt.query_row(params![id], chunk_from_row).optional()? {
            by_id.insert(id.clone(), chunk);
        }
    }
    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

/// Chunks of one file, ordered by position
pub fn get_file_chunks_sync(
    conn: &Connection,
    project_id: &str,
    file_path: &str,
) -> Result<Vec<ChunkRow>> {
    let sql = format!(
        "SELECT {CHUNK_COLUMNS} FROM code_chunks
         WHERE project_id = ?1 AND file_path = ?2 ORDER BY start_line"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![project_id, file_path], chunk_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Map of qualified symbol name -> chunk id, used to resolve pending edges
pub fn symbol_table_sync(conn: &Connection, project_id: &str) -> Result<HashMap<String, String>> {
    let mut stmt =
        conn.prepare("SELECT qualified_name, id FROM code_chunks WHERE project_id = ?1")?;
    let rows = stmt
        .query_map(params![project_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Recorded hash for a file, if it was ever indexed
pub fn file_hash_sync(
    conn: &Connection,
    project_id: &str,
    file_path: &str,
) -> Result<Option<String>> {
    let hash = conn
        .query_row(
            "SELECT content_hash FROM file_states WHERE project_id = ?1 AND file_path = ?2",
            params![project_id, file_path],
            |row| row.get(0),
        )
        .optional()?;
    Ok(hash)
}

/// All recorded file states for a project (used by full scans to detect
/// deletions)
pub fn file_states_sync(conn: &Connection, project_id: &str) -> Result<Vec<(String, String)>> {
    let mut stmt =
        conn.prepare("SELECT file_path, content_hash FROM file_states WHERE project_id = ?1")?;
    let rows = stmt
        .query_map(params![project_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Aggregate counts for index status reporting
pub fn index_status_sync(conn: &Connection, project_id: &str) -> Result<IndexStatus> {
    let chunk_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM code_chunks WHERE project_id = ?1",
        params![project_id],
        |row| row.get(0),
    )?;
    let embedded_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM code_chunks WHERE project_id = ?1 AND embedding IS NOT NULL",
        params![project_id],
        |row| row.get(0),
    )?;
    let file_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM file_states WHERE project_id = ?1",
        params![project_id],
        |row| row.get(0),
    )?;
    let edge_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM symbol_edges WHERE project_id = ?1",
        params![project_id],
        |row| row.get(0),
    )?;
    Ok(IndexStatus {
        chunk_count,
        file_count,
        embedded_count,
        edge_count,
    })
}
