// crates/oracle-server/src/indexer/types.rs
// Public types for the chunker

use crate::db::EdgeType;
use strum::{Display, EnumString};

/// Classification of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    Module,
    Other,
}

/// A symbol-scoped fragment of a source file
#[derive(Debug, Clone)]
pub struct ParsedChunk {
    pub symbol_name: String,
    pub qualified_name: String,
    pub kind: ChunkKind,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub body: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// An outgoing reference from a chunk to a symbol, resolved later against
/// the project's symbol table
#[derive(Debug, Clone)]
pub struct SymbolRef {
    pub source_qualified_name: String,
    pub target_qualified_name: String,
    pub edge_type: EdgeType,
}

/// The complete result of chunking one file
#[derive(Debug, Clone)]
pub struct ChunkedFile {
    pub language: String,
    pub chunks: Vec<ParsedChunk>,
    pub refs: Vec<SymbolRef>,
    /// Set when the input exceeded the size limit and was cut short
    pub truncated: bool,
}
