// crates/oracle-server/src/search/mod.rs
// Retrievers and reranker over code, notes, and threads

pub mod fusion;
pub mod notes;
pub mod threads;
pub mod utils;

pub use fusion::{Reranker, RetrievedSnippet, retrieve_code, truncate_to_budget};
pub use notes::retrieve_notes;
pub use threads::retrieve_threads;
pub use utils::{bytes_to_embedding, distance_to_score, embedding_to_bytes};
