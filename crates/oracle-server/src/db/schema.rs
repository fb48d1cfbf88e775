// crates/oracle-server/src/db/schema.rs
// Schema and migrations for the embedded datastore
//
// One database file per deployment holds the code index, delta queue,
// threads, and context trees. All statements are idempotent.

use anyhow::Result;
use rusqlite::Connection;

/// Main schema SQL
pub const SCHEMA: &str = r#"
-- =======================================
-- PROJECTS
-- =======================================
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    root_path TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- =======================================
-- CODE INDEX
-- =======================================
CREATE TABLE IF NOT EXISTS code_chunks (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    language TEXT NOT NULL,
    symbol_name TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    kind TEXT NOT NULL,
    signature TEXT,
    docstring TEXT,
    body TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    file_hash TEXT NOT NULL,
    embedding BLOB
);
CREATE INDEX IF NOT EXISTS idx_chunks_file ON code_chunks(project_id, file_path);
CREATE INDEX IF NOT EXISTS idx_chunks_qualified ON code_chunks(project_id, qualified_name);

CREATE TABLE IF NOT EXISTS symbol_edges (
    id INTEGER PRIMARY KEY,
    project_id TEXT NOT NULL,
    source_chunk_id TEXT NOT NULL,
    target_qualified_name TEXT NOT NULL,
    target_chunk_id TEXT,
    edge_type TEXT NOT NULL,
    UNIQUE(source_chunk_id, target_qualified_name, edge_type)
);
CREATE INDEX IF NOT EXISTS idx_edges_source ON symbol_edges(project_id, source_chunk_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON symbol_edges(project_id, target_qualified_name);

CREATE TABLE IF NOT EXISTS file_states (
    project_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    last_indexed_at TEXT DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(project_id, file_path)
);

-- =======================================
-- DELTA QUEUE
-- =======================================
CREATE TABLE IF NOT EXISTS delta_queue (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    change_type TEXT NOT NULL,
    old_hash TEXT,
    new_hash TEXT,
    lines_changed INTEGER NOT NULL DEFAULT 0,
    detected_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    error TEXT
);
CREATE INDEX IF NOT EXISTS idx_delta_status ON delta_queue(project_id, status);
CREATE INDEX IF NOT EXISTS idx_delta_path ON delta_queue(project_id, file_path);

-- =======================================
-- THREADS
-- =======================================
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_threads_project ON threads(project_id, status);

CREATE TABLE IF NOT EXISTS thread_nodes (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    parent_node_id TEXT,
    content TEXT NOT NULL,
    author TEXT NOT NULL DEFAULT 'user',
    created_at TEXT NOT NULL,
    embedding BLOB
);
CREATE INDEX IF NOT EXISTS idx_thread_nodes ON thread_nodes(thread_id, created_at);

CREATE TABLE IF NOT EXISTS thread_summary_cache (
    thread_id TEXT PRIMARY KEY,
    summary TEXT NOT NULL,
    last_summarized_node_id TEXT NOT NULL,
    node_count INTEGER NOT NULL,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    generated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- =======================================
-- CONTEXT TREES
-- =======================================
CREATE TABLE IF NOT EXISTS context_trees (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    label TEXT,
    root_node_id TEXT,
    current_node_id TEXT,
    node_count INTEGER NOT NULL DEFAULT 0,
    max_nodes INTEGER NOT NULL DEFAULT 256,
    is_active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_trees_project ON context_trees(project_id);

CREATE TABLE IF NOT EXISTS context_nodes (
    id TEXT PRIMARY KEY,
    tree_id TEXT NOT NULL,
    parent_id TEXT,
    is_root INTEGER NOT NULL DEFAULT 0,
    question TEXT NOT NULL DEFAULT '',
    answer TEXT NOT NULL DEFAULT '',
    label TEXT,
    is_checkpoint INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_context_nodes ON context_nodes(tree_id, parent_id);
"#;

/// FTS5 index over the searchable chunk columns.
///
/// Rows are inserted and deleted alongside code_chunks within the same
/// transaction, keyed by the unindexed chunk_id column. Tokenizer keeps
/// '_' as a token character so snake_case identifiers index as single
/// tokens.
pub const FTS_CREATE_SQL: &str = r#"CREATE VIRTUAL TABLE IF NOT EXISTS code_fts USING fts5(
    symbol_name,
    qualified_name,
    signature,
    docstring,
    body,
    chunk_id UNINDEXED,
    project_id UNINDEXED,
    tokenize="unicode61 remove_diacritics 1 tokenchars '_'"
)"#;

/// Run all schema setup and migrations. Idempotent.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.execute(FTS_CREATE_SQL, [])?;
    Ok(())
}

/// Check whether a table exists (used by tests and status reporting)
pub fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type IN ('table','view') AND name = ?1",
        [name],
        |_| Ok(true),
    )
    .unwrap_or(false)
}
