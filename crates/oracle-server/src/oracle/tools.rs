// crates/oracle-server/src/oracle/tools.rs
// Tool inventory offered to the model during a query, and its executor

use crate::error::{OracleError, Result};
use crate::llm::Tool;
use crate::search;
use crate::threads;
use serde::Deserialize;
use serde_json::json;

use super::Oracle;

/// Default result cap for the search tools
const SEARCH_LIMIT: usize = 8;

/// The fixed tool inventory
pub fn inventory() -> Vec<Tool> {
    vec![
        Tool::function(
            "read_file",
            "Read a slice of a source file from the project",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path relative to the project root"},
                    "start": {"type": "integer", "description": "1-based first line (default 1)"},
                    "end": {"type": "integer", "description": "1-based last line (default end of file)"}
                },
                "required": ["path"]
            }),
        ),
        Tool::function(
            "read_note",
            "Read a markdown note with its metadata",
            json!({
                "type": "object",
                "properties": {
                    "note_path": {"type": "string"}
                },
                "required": ["note_path"]
            }),
        ),
        Tool::function(
            "write_note",
            "Create or update a markdown note in the vault",
            json!({
                "type": "object",
                "properties": {
                    "note_path": {"type": "string"},
                    "body": {"type": "string"},
                    "metadata": {"type": "object"}
                },
                "required": ["note_path", "body"]
            }),
        ),
        Tool::function(
            "search_code",
            "Search the code index with narrower or different terms",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["query"]
            }),
        ),
        Tool::function(
            "search_notes",
            "Full-text search over the project's notes",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["query"]
            }),
        ),
        Tool::function(
            "thread_push",
            "Append a message to a discussion thread",
            json!({
                "type": "object",
                "properties": {
                    "thread_id": {"type": "string"},
                    "content": {"type": "string"},
                    "author": {"type": "string"}
                },
                "required": ["thread_id", "content"]
            }),
        ),
        Tool::function(
            "thread_read",
            "Read a thread: summary plus recent messages",
            json!({
                "type": "object",
                "properties": {
                    "thread_id": {"type": "string"}
                },
                "required": ["thread_id"]
            }),
        ),
    ]
}

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
    start: Option<usize>,
    end: Option<usize>,
}

#[derive(Deserialize)]
struct ReadNoteArgs {
    note_path: String,
}

#[derive(Deserialize)]
struct WriteNoteArgs {
    note_path: String,
    body: String,
    metadata: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct ThreadPushArgs {
    thread_id: String,
    content: String,
    author: Option<String>,
}

#[derive(Deserialize)]
struct ThreadReadArgs {
    thread_id: String,
}

/// Execute one tool call. Unknown names are invalid input; execution
/// failures are returned as errors for the caller to wrap into a
/// tool_result payload.
pub async fn execute(oracle: &Oracle, project_id: &str, name: &str, arguments: &str) -> Result<String> {
    match name {
        "read_file" => {
            let args: ReadFileArgs = parse_args(arguments)?;
            read_file(oracle, project_id, args).await
        }
        "read_note" => {
            let args: ReadNoteArgs = parse_args(arguments)?;
            let note = oracle.vault().read_note(project_id, &args.note_path).await?;
            Ok(json!({
                "note_path": note.note_path,
                "title": note.title,
                "version": note.version,
                "metadata": note.metadata,
                "body": note.body,
            })
            .to_string())
        }
        "write_note" => {
            let args: WriteNoteArgs = parse_args(arguments)?;
            let version = oracle
                .vault()
                .write_note(project_id, &args.note_path, &args.body, args.metadata, None)
                .await?;
            Ok(json!({ "version": version }).to_string())
        }
        "search_code" => {
            let args: SearchArgs = parse_args(arguments)?;
            let snippets = search::retrieve_code(
                oracle.pool(),
                oracle.embedder(),
                &oracle.config().retrieval,
                project_id,
                &args.query,
                args.limit.unwrap_or(SEARCH_LIMIT),
            )
            .await?;
            let results: Vec<_> = snippets
                .iter()
                .map(|s| json!({ "path": s.path, "score": s.score, "snippet": s.snippet }))
                .collect();
            Ok(json!(results).to_string())
        }
        "search_notes" => {
            let args: SearchArgs = parse_args(arguments)?;
            let hits = oracle
                .vault()
                .search_notes(project_id, &args.query, args.limit.unwrap_or(SEARCH_LIMIT))
                .await?;
            let results: Vec<_> = hits
                .iter()
                .map(|h| {
                    json!({
                        "note_path": h.note_path,
                        "title": h.title,
                        "score": h.score,
                        "snippet": h.snippet,
                    })
                })
                .collect();
            Ok(json!(results).to_string())
        }
        "thread_push" => {
            let args: ThreadPushArgs = parse_args(arguments)?;
            let node = threads::push(
                oracle.pool(),
                &args.thread_id,
                &args.content,
                args.author.as_deref().unwrap_or("oracle"),
            )
            .await?;
            Ok(json!({ "node_id": node.id }).to_string())
        }
        "thread_read" => {
            let args: ThreadReadArgs = parse_args(arguments)?;
            let result = threads::read(oracle.pool(), oracle.summaries(), &args.thread_id).await?;
            let recent: Vec<_> = result
                .recent_nodes
                .iter()
                .map(|n| json!({ "id": n.id, "author": n.author, "content": n.content }))
                .collect();
            Ok(json!({
                "summary": result.summary.summary,
                "node_count": result.summary.node_count,
                "recent_nodes": recent,
            })
            .to_string())
        }
        other => Err(OracleError::InvalidArgument(format!("unknown tool {other}"))),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: &str) -> Result<T> {
    let arguments = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    serde_json::from_str(arguments)
        .map_err(|e| OracleError::InvalidArgument(format!("bad tool arguments: {e}")))
}

async fn read_file(oracle: &Oracle, project_id: &str, args: ReadFileArgs) -> Result<String> {
    if args.path.contains("..") {
        return Err(OracleError::InvalidArgument(
            "path may not traverse outside the project".to_string(),
        ));
    }
    let root = oracle.project_root(project_id).await?;
    let abs = root.join(&args.path);
    let content = std::fs::read_to_string(&abs)
        .map_err(|_| OracleError::NotFound(format!("file {}", args.path)))?;

    let lines: Vec<&str> = content.lines().collect();
    let start = args.start.unwrap_or(1).max(1);
    let end = args.end.unwrap_or(lines.len()).min(lines.len());
    if start > end {
        return Err(OracleError::InvalidArgument(format!(
            "empty range {start}..{end}"
        )));
    }
    let slice = lines[start - 1..end].join("\n");
    Ok(json!({
        "path": args.path,
        "start": start,
        "end": end,
        "content": slice,
    })
    .to_string())
}
