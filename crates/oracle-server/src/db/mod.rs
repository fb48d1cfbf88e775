// crates/oracle-server/src/db/mod.rs
// Embedded datastore: pool, schema, and synchronous query functions
//
// Convention: `*_sync` functions take `&Connection` and run inside
// `pool.interact()` / `pool.run()` closures on the blocking thread pool.

pub mod chunks;
pub mod context;
pub mod delta;
pub mod edges;
pub mod pool;
pub mod projects;
pub mod schema;
pub mod threads;

pub use chunks::{
    ChunkInsert, ChunkRow, IndexStatus, delete_file_sync, file_hash_sync, file_states_sync,
    fts_search_sync, get_chunks_by_ids_sync, get_file_chunks_sync, index_status_sync,
    sanitize_fts_query, symbol_table_sync, upsert_chunks_sync, vector_search_sync,
};
pub use context::{
    ContextNodeRow, TreeRow, active_tree_sync, append_node_sync, checkout_sync,
    conversation_path_sync, create_tree_sync, delete_tree_sync, get_node_sync, get_tree_sync,
    label_node_sync, list_trees_sync, prune_tree_sync, require_node_sync, require_tree_sync,
    set_active_sync, set_checkpoint_sync,
};
pub use delta::{
    ChangeType, DeltaEntry, EntryStatus, QueueStatus, claim_pending_sync, enqueue_change_sync,
    mark_status_sync, pending_entries_sync, purge_indexed_sync, queue_status_sync,
};
pub use edges::{
    EdgeInsert, EdgeType, GraphNeighbor, graph_neighbors_sync, insert_edges_sync,
    resolve_edges_sync,
};
pub use pool::DatabasePool;
pub use projects::{
    ProjectRow, create_project_sync, get_project_sync, list_projects_sync, require_project_sync,
};
pub use threads::{
    SummaryCacheRow, ThreadNodeRow, ThreadRow, archive_thread_sync, create_thread_sync,
    delete_summary_cache_sync, get_summary_cache_sync, get_thread_sync, latest_node_id_sync,
    list_threads_sync, node_count_sync, nodes_after_sync, nodes_missing_embedding_sync,
    nodes_sync, push_node_sync, recent_nodes_sync, require_thread_sync, set_node_embedding_sync,
    thread_vector_search_sync, upsert_summary_cache_sync,
};
