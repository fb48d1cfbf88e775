// crates/oracle-types/src/lib.rs

//! Shared data contracts between the Oracle engine and its clients.
//!
//! This crate defines the streaming event protocol and the handful of
//! domain enums that cross the caller boundary:
//! - **Query events**: the typed stream emitted while a question is answered
//! - **Source kinds**: which information source a context item came from
//!
//! These types are designed to work across native and WASM builds,
//! with no native-only dependencies allowed.

use serde::{Deserialize, Serialize};

// ===================================================
// SOURCES
// ===================================================

/// An information source the retrieval engine can draw from.
///
/// Callers enable a subset of these per query; the engine degrades
/// gracefully when a source is empty or unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// The indexed code repository
    Code,
    /// The markdown knowledge vault
    Note,
    /// Tree-structured conversation logs
    Thread,
}

impl SourceKind {
    /// Parse from the lowercase wire name
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "code" => Some(Self::Code),
            "note" | "notes" => Some(Self::Note),
            "thread" | "threads" => Some(Self::Thread),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code => write!(f, "code"),
            Self::Note => write!(f, "note"),
            Self::Thread => write!(f, "thread"),
        }
    }
}

// ===================================================
// QUERY EVENT STREAM
// ===================================================

/// One event in the stream produced while answering a query.
///
/// Ordering contract: every `Source` event precedes any `ContentDelta`;
/// exactly one of `Done` or `Error` terminates the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OracleEvent {
    /// Coarse progress update ("searching code", "querying model")
    Status { message: String },
    /// Partial reasoning from models that expose it
    ThinkingDelta { content: String },
    /// One retrieved context item, emitted as soon as it is ranked
    Source {
        source_kind: SourceKind,
        path: String,
        score: f32,
    },
    /// The model requested a tool invocation
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// The engine executed the tool and fed the output back to the model
    ToolResult {
        tool_call_id: String,
        result: String,
    },
    /// Streamed answer tokens
    ContentDelta { content: String },
    /// Terminal event on success; `context_id` is the newly appended head node
    Done {
        model_used: String,
        context_id: String,
    },
    /// Terminal event on failure
    Error { kind: String, message: String },
}

impl OracleEvent {
    /// Whether this event terminates the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
