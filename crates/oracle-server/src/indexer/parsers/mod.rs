// crates/oracle-server/src/indexer/parsers/mod.rs
// Language-specific code parsers using tree-sitter

pub mod go;
pub mod python;
pub mod rust;
pub mod typescript;

use crate::db::EdgeType;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::LazyLock;
use tree_sitter::{Node, Parser};

pub use go::GoParser;
pub use python::PythonParser;
pub use rust::RustParser;
pub use typescript::TypeScriptParser;

/// Trait for language-specific parsers
pub trait LanguageParser: Send + Sync {
    /// Language identifier (e.g., "rust", "python")
    fn language_id(&self) -> &'static str;

    /// File extensions this parser handles
    fn extensions(&self) -> &'static [&'static str];

    /// Qualification separator for nested symbols ("::" or ".")
    fn separator(&self) -> &'static str;

    /// Configure a tree-sitter parser with the appropriate grammar
    fn configure_parser(&self, parser: &mut Parser) -> Result<()>;

    /// Parse source code and extract symbols and outgoing references
    fn parse(&self, parser: &mut Parser, content: &str) -> Result<ParseResult>;
}

/// Registry of all available language parsers
pub struct ParserRegistry {
    by_extension: HashMap<&'static str, &'static dyn LanguageParser>,
    by_language: HashMap<&'static str, &'static dyn LanguageParser>,
}

impl ParserRegistry {
    /// Look up a parser by file extension
    pub fn by_extension(&self, ext: &str) -> Option<&'static dyn LanguageParser> {
        self.by_extension.get(ext).copied()
    }

    /// Look up a parser by language name
    pub fn by_language(&self, lang: &str) -> Option<&'static dyn LanguageParser> {
        self.by_language.get(lang).copied()
    }
}

static RUST_PARSER: RustParser = RustParser;
static PYTHON_PARSER: PythonParser = PythonParser;
static TYPESCRIPT_PARSER: TypeScriptParser = TypeScriptParser;
static GO_PARSER: GoParser = GoParser;

/// Global parser registry - use this for all parser lookups
pub static PARSERS: LazyLock<ParserRegistry> = LazyLock::new(|| {
    let parsers: &[&'static dyn LanguageParser] =
        &[&RUST_PARSER, &PYTHON_PARSER, &TYPESCRIPT_PARSER, &GO_PARSER];

    let mut by_extension = HashMap::new();
    let mut by_language = HashMap::new();

    for parser in parsers {
        by_language.insert(parser.language_id(), *parser);
        for ext in parser.extensions() {
            by_extension.insert(*ext, *parser);
        }
    }

    ParserRegistry {
        by_extension,
        by_language,
    }
});

/// Extracted symbol from source code
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    /// Enclosing type or class name, if any
    pub parent: Option<String>,
    pub kind: SymbolKind,
    pub start_line: u32,
    pub end_line: u32,
    /// Declaration line(s) without the body
    pub signature: Option<String>,
    /// Leading or immediately-following documentation block
    pub docstring: Option<String>,
}

/// Coarse symbol classification; maps directly onto chunk kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Module,
    Other,
}

/// An outgoing reference extracted from the AST
#[derive(Debug, Clone)]
pub struct Reference {
    /// Name of the enclosing symbol; None for module-level references
    pub from_symbol: Option<String>,
    /// Referenced symbol or import path as written
    pub target: String,
    pub edge_type: EdgeType,
}

/// Result of parsing source code
pub type ParseResult = (Vec<Symbol>, Vec<Reference>);

/// Mutable state threaded through an AST walk
pub struct ParseContext<'a> {
    pub source: &'a [u8],
    pub symbols: Vec<Symbol>,
    pub references: Vec<Reference>,
}

impl<'a> ParseContext<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self {
            source,
            symbols: Vec::new(),
            references: Vec::new(),
        }
    }
}

/// Helper to extract text from a tree-sitter node
pub fn node_text(node: Node, source: &[u8]) -> String {
    std::str::from_utf8(&source[node.byte_range()])
        .unwrap_or("")
        .to_string()
}

/// 1-indexed line range of a node
pub fn line_range(node: Node) -> (u32, u32) {
    (
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
    )
}

/// Declaration text of a node up to (not including) its body field,
/// falling back to the first line.
pub fn signature_text(node: Node, source: &[u8]) -> Option<String> {
    let end = node
        .child_by_field_name("body")
        .map(|body| body.start_byte())
        .unwrap_or_else(|| node.end_byte());
    let start = node.start_byte();
    if end <= start {
        return None;
    }
    let text = std::str::from_utf8(&source[start..end]).unwrap_or("");
    let sig = text.trim().trim_end_matches(['{', ':']).trim();
    if sig.is_empty() {
        None
    } else {
        Some(sig.lines().map(str::trim).collect::<Vec<_>>().join(" "))
    }
}

/// Gather a contiguous block of preceding comment lines matching `marker`
pub fn leading_comment_block(node: Node, source: &[u8], marker: &str) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut cursor = node.prev_sibling();
    while let Some(prev) = cursor {
        if !prev.kind().contains("comment") {
            break;
        }
        let text = node_text(prev, source);
        let trimmed = text.trim();
        if !trimmed.starts_with(marker) {
            break;
        }
        lines.push(
            trimmed
                .trim_start_matches(marker)
                .trim_start_matches(['/', '*', '!'])
                .trim()
                .to_string(),
        );
        cursor = prev.prev_sibling();
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    Some(lines.join("\n"))
}

/// Run a configured parser over content via the given walk function
pub fn default_parse(
    parser: &mut Parser,
    content: &str,
    walk: fn(Node, &mut ParseContext, Option<&str>, Option<&str>),
) -> Result<ParseResult> {
    let tree = parser
        .parse(content, None)
        .ok_or_else(|| anyhow::anyhow!("tree-sitter returned no tree"))?;
    let mut ctx = ParseContext::new(content.as_bytes());
    walk(tree.root_node(), &mut ctx, None, None);
    Ok((ctx.symbols, ctx.references))
}
