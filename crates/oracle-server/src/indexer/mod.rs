// crates/oracle-server/src/indexer/mod.rs
// Code chunker: source files in, symbol-scoped chunks and edges out
//
// Parsing is pluggable per language behind the `LanguageParser` trait.
// Anything no parser can handle still becomes a retrievable whole-file
// chunk with language "unknown".

#[cfg(feature = "parsers")]
pub mod chunking;
#[cfg(feature = "parsers")]
pub mod parsers;
pub mod types;

pub use types::{ChunkKind, ChunkedFile, ParsedChunk, SymbolRef};

use crate::utils::truncate_chars;
use std::path::Path;

/// Chunk one source file.
///
/// `language` overrides extension-based detection when given. Files above
/// `max_file_bytes` are truncated with a warning; unparseable content
/// degrades to a single whole-file chunk with no edges.
pub fn chunk_source(
    path: &Path,
    source: &str,
    language: Option<&str>,
    max_file_bytes: usize,
) -> ChunkedFile {
    let truncated = source.len() > max_file_bytes;
    let source = if truncated {
        tracing::warn!(
            "truncating {} from {} to {} bytes before parsing",
            path.display(),
            source.len(),
            max_file_bytes
        );
        truncate_chars(source, max_file_bytes)
    } else {
        source
    };

    let module_name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("file")
        .to_string();

    match parse_with_registry(path, source, language, &module_name) {
        Some(mut chunked) => {
            chunked.truncated = truncated;
            chunked
        }
        None => ChunkedFile {
            language: "unknown".to_string(),
            chunks: vec![whole_file_chunk(source, &module_name)],
            refs: Vec::new(),
            truncated,
        },
    }
}

/// A single whole-file chunk for content no parser can handle
fn whole_file_chunk(content: &str, module_name: &str) -> ParsedChunk {
    let line_count = content.lines().count().max(1) as u32;
    ParsedChunk {
        symbol_name: module_name.to_string(),
        qualified_name: module_name.to_string(),
        kind: ChunkKind::Module,
        signature: None,
        docstring: None,
        body: content.to_string(),
        start_line: 1,
        end_line: line_count,
    }
}

#[cfg(feature = "parsers")]
fn parse_with_registry(
    path: &Path,
    source: &str,
    language: Option<&str>,
    module_name: &str,
) -> Option<ChunkedFile> {
    use parsers::PARSERS;
    use std::collections::HashMap;

    let lang_parser = match language {
        Some(lang) => PARSERS.by_language(lang)?,
        None => {
            let ext = path.extension().and_then(|e| e.to_str())?;
            PARSERS.by_extension(ext)?
        }
    };

    let mut ts_parser = tree_sitter::Parser::new();
    lang_parser.configure_parser(&mut ts_parser).ok()?;
    let (symbols, references) = match lang_parser.parse(&mut ts_parser, source) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!("parse failed for {}: {}", path.display(), e);
            return None;
        }
    };

    let separator = lang_parser.separator();
    let chunks = chunking::assemble_chunks(source, &symbols, separator, module_name);

    // Map bare symbol names to their qualified chunk names so references
    // can be attributed; module-level references attach to the module
    // chunk when one exists.
    let mut by_name: HashMap<&str, &str> = HashMap::new();
    for chunk in &chunks {
        by_name
            .entry(chunk.symbol_name.as_str())
            .or_insert(chunk.qualified_name.as_str());
    }
    let module_qualified = chunks
        .iter()
        .find(|c| c.kind == ChunkKind::Module)
        .map(|c| c.qualified_name.clone());

    let refs = references
        .into_iter()
        .filter_map(|reference| {
            let source_qualified = match &reference.from_symbol {
                Some(name) => by_name.get(name.as_str()).map(|q| q.to_string()),
                None => module_qualified.clone(),
            }?;
            // Self-references add noise, not signal
            if source_qualified == reference.target {
                return None;
            }
            Some(SymbolRef {
                source_qualified_name: source_qualified,
                target_qualified_name: reference.target,
                edge_type: reference.edge_type,
            })
        })
        .collect();

    Some(ChunkedFile {
        language: lang_parser.language_id().to_string(),
        chunks,
        refs,
        truncated: false,
    })
}

#[cfg(not(feature = "parsers"))]
fn parse_with_registry(
    _path: &Path,
    _source: &str,
    _language: Option<&str>,
    _module_name: &str,
) -> Option<ChunkedFile> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::EdgeType;

    const LIMIT: usize = 1024 * 1024;

    #[test]
    fn test_python_file_end_to_end() {
        let source = "import hashlib\n\ndef login(user, password):\n    \"\"\"Check credentials.\"\"\"\n    return hash_password(password)\n\ndef hash_password(p):\n    return hashlib.sha256(p).hexdigest()\n";
        let chunked = chunk_source(Path::new("auth.py"), source, None, LIMIT);
        assert_eq!(chunked.language, "python");

        let login = chunked
            .chunks
            .iter()
            .find(|c| c.symbol_name == "login")
            .unwrap();
        assert_eq!(login.kind, ChunkKind::Function);
        assert_eq!(login.docstring.as_deref(), Some("Check credentials."));

        // login -> hash_password call edge, attributed by qualified name
        assert!(chunked.refs.iter().any(|r| {
            r.source_qualified_name == "login"
                && r.target_qualified_name == "hash_password"
                && r.edge_type == EdgeType::Calls
        }));
        // import attached to the module chunk
        assert!(chunked.refs.iter().any(|r| {
            r.edge_type == EdgeType::Imports && r.target_qualified_name == "hashlib"
        }));
    }

    #[test]
    fn test_unknown_extension_falls_back() {
        let chunked = chunk_source(Path::new("notes.xyz"), "opaque but searchable text", None, LIMIT);
        assert_eq!(chunked.language, "unknown");
        assert_eq!(chunked.chunks.len(), 1);
        assert_eq!(chunked.chunks[0].kind, ChunkKind::Module);
        assert!(chunked.refs.is_empty());
    }

    #[test]
    fn test_language_override_beats_extension() {
        let source = "fn main() { run(); }";
        let chunked = chunk_source(Path::new("weird.txt"), source, Some("rust"), LIMIT);
        assert_eq!(chunked.language, "rust");
        assert!(chunked.chunks.iter().any(|c| c.symbol_name == "main"));
    }

    #[test]
    fn test_oversized_file_truncated() {
        let source = "fn tiny() {}\n".repeat(100);
        let chunked = chunk_source(Path::new("big.rs"), &source, None, 64);
        assert!(chunked.truncated);
        assert!(!chunked.chunks.is_empty());
    }

    #[test]
    fn test_rust_method_qualification() {
        let source = "struct Engine;\nimpl Engine {\n    fn start(&self) { self.warm_up(); }\n    fn warm_up(&self) {}\n}\n";
        let chunked = chunk_source(Path::new("engine.rs"), source, None, LIMIT);
        let start = chunked
            .chunks
            .iter()
            .find(|c| c.symbol_name == "start")
            .unwrap();
        assert_eq!(start.qualified_name, "Engine::start");
        assert!(chunked.refs.iter().any(|r| {
            r.source_qualified_name == "Engine::start" && r.target_qualified_name == "warm_up"
        }));
    }
}
