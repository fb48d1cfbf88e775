// crates/oracle-server/src/indexer/chunking.rs
// Assembly of parsed symbols into symbol-scoped chunks

use crate::indexer::parsers::{Symbol, SymbolKind};
use crate::indexer::types::{ChunkKind, ParsedChunk};
use std::collections::{HashMap, HashSet};

impl From<SymbolKind> for ChunkKind {
    fn from(kind: SymbolKind) -> Self {
        match kind {
            SymbolKind::Function => ChunkKind::Function,
            SymbolKind::Method => ChunkKind::Method,
            SymbolKind::Class => ChunkKind::Class,
            SymbolKind::Module => ChunkKind::Module,
            SymbolKind::Other => ChunkKind::Other,
        }
    }
}

/// Qualified name of a symbol: parent joined by the language separator
pub fn qualify(symbol: &Symbol, separator: &str) -> String {
    match &symbol.parent {
        Some(parent) => format!("{parent}{separator}{}", symbol.name),
        None => symbol.name.clone(),
    }
}

/// Turn parsed symbols into chunks, one per symbol, plus a synthetic
/// module chunk covering substantial top-level code outside any symbol.
///
/// Qualified names are deduplicated with a positional suffix so the
/// (file, qualified_name) pair stays unique within an indexing epoch.
pub fn assemble_chunks(
    content: &str,
    symbols: &[Symbol],
    separator: &str,
    module_name: &str,
) -> Vec<ParsedChunk> {
    let lines: Vec<&str> = content.lines().collect();
    let mut chunks: Vec<ParsedChunk> = Vec::with_capacity(symbols.len() + 1);
    let mut covered: HashSet<u32> = HashSet::with_capacity(lines.len());
    let mut seen_names: HashMap<String, usize> = HashMap::new();

    let mut sorted: Vec<&Symbol> = symbols.iter().collect();
    sorted.sort_by_key(|s| (s.start_line, s.end_line));

    for sym in sorted {
        let start = sym.start_line.saturating_sub(1) as usize;
        let end = (sym.end_line as usize).min(lines.len());
        if start >= lines.len() || start >= end {
            continue;
        }
        for line in sym.start_line..=sym.end_line {
            covered.insert(line);
        }

        let body = lines[start..end].join("\n");
        if body.trim().is_empty() {
            continue;
        }

        let mut qualified = qualify(sym, separator);
        let count = seen_names.entry(qualified.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            qualified = format!("{qualified}#{count}");
        }

        chunks.push(ParsedChunk {
            symbol_name: sym.name.clone(),
            qualified_name: qualified,
            kind: sym.kind.into(),
            signature: sym.signature.clone(),
            docstring: sym.docstring.clone(),
            body,
            start_line: sym.start_line,
            end_line: end as u32,
        });
    }

    if let Some(module_chunk) = module_chunk(&lines, &covered, separator, module_name) {
        chunks.push(module_chunk);
    }
    chunks
}

/// Collect uncovered regions with substantial content into one synthetic
/// module chunk
fn module_chunk(
    lines: &[&str],
    covered: &HashSet<u32>,
    separator: &str,
    module_name: &str,
) -> Option<ParsedChunk> {
    let mut body_lines: Vec<&str> = Vec::new();
    let mut first_line: Option<u32> = None;
    let mut last_line = 0u32;

    for (idx, line) in lines.iter().enumerate() {
        let line_num = idx as u32 + 1;
        if covered.contains(&line_num) || line.trim().is_empty() {
            continue;
        }
        body_lines.push(line);
        first_line.get_or_insert(line_num);
        last_line = line_num;
    }

    // Require at least one line of real content, not stray punctuation
    let substantial = body_lines.iter().any(|line| line.trim().len() > 3);
    if body_lines.is_empty() || !substantial {
        return None;
    }

    Some(ParsedChunk {
        symbol_name: module_name.to_string(),
        qualified_name: format!("{module_name}{separator}(module)"),
        kind: ChunkKind::Module,
        signature: None,
        docstring: None,
        body: body_lines.join("\n"),
        start_line: first_line.unwrap_or(1),
        end_line: last_line.max(1),
    })
}
