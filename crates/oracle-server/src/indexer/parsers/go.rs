// crates/oracle-server/src/indexer/parsers/go.rs
// Go language parser using tree-sitter

use anyhow::{Result, anyhow};
use tree_sitter::{Node, Parser};

use super::{
    LanguageParser, ParseContext, ParseResult, Reference, Symbol, SymbolKind, default_parse,
    leading_comment_block, line_range, node_text, signature_text,
};
use crate::db::EdgeType;

/// Go language parser
pub struct GoParser;

impl LanguageParser for GoParser {
    fn language_id(&self) -> &'static str {
        "go"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn separator(&self) -> &'static str {
        "."
    }

    fn configure_parser(&self, parser: &mut Parser) -> Result<()> {
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| anyhow!("Failed to set Go language: {}", e))
    }

    fn parse(&self, parser: &mut Parser, content: &str) -> Result<ParseResult> {
        default_parse(parser, content, walk)
    }
}

fn walk(node: Node, ctx: &mut ParseContext, parent: Option<&str>, current_fn: Option<&str>) {
    match node.kind() {
        "function_declaration" => {
            if let Some(sym) = extract_function(node, ctx.source, None, SymbolKind::Function) {
                let fn_name = sym.name.clone();
                ctx.symbols.push(sym);
                if let Some(body) = node.child_by_field_name("body") {
                    for child in body.children(&mut body.walk()) {
                        walk(child, ctx, parent, Some(&fn_name));
                    }
                }
                return;
            }
        }
        "method_declaration" => {
            let receiver = receiver_type(node, ctx.source);
            if let Some(sym) =
                extract_function(node, ctx.source, receiver.as_deref(), SymbolKind::Method)
            {
                let fn_name = sym.name.clone();
                ctx.symbols.push(sym);
                if let Some(body) = node.child_by_field_name("body") {
                    for child in body.children(&mut body.walk()) {
                        walk(child, ctx, receiver.as_deref(), Some(&fn_name));
                    }
                }
                return;
            }
        }
        "type_declaration" => {
            for spec in node.named_children(&mut node.walk()) {
                if spec.kind() != "type_spec" {
                    continue;
                }
                let Some(name_node) = spec.child_by_field_name("name") else {
                    continue;
                };
                let name = node_text(name_node, ctx.source);
                let kind = match spec.child_by_field_name("type").map(|t| t.kind()) {
                    Some("struct_type") | Some("interface_type") => SymbolKind::Class,
                    _ => SymbolKind::Other,
                };
                let (start_line, end_line) = line_range(node);
                ctx.symbols.push(Symbol {
                    name,
                    parent: None,
                    kind,
                    start_line,
                    end_line,
                    signature: signature_text(spec, ctx.source),
                    docstring: leading_comment_block(node, ctx.source, "//"),
                });
            }
        }
        "import_declaration" => {
            for target in import_paths(node, ctx.source) {
                ctx.references.push(Reference {
                    from_symbol: None,
                    target,
                    edge_type: EdgeType::Imports,
                });
            }
        }
        "call_expression" => {
            if let Some(caller) = current_fn
                && let Some(callee) = callee_name(node, ctx.source)
            {
                ctx.references.push(Reference {
                    from_symbol: Some(caller.to_string()),
                    target: callee,
                    edge_type: EdgeType::Calls,
                });
            }
        }
        _ => {}
    }

    for child in node.children(&mut node.walk()) {
        walk(child, ctx, parent, current_fn);
    }
}

fn extract_function(
    node: Node,
    source: &[u8],
    parent: Option<&str>,
    kind: SymbolKind,
) -> Option<Symbol> {
    let name = node_text(node.child_by_field_name("name")?, source);
    let (start_line, end_line) = line_range(node);
    Some(Symbol {
        name,
        parent: parent.map(str::to_string),
        kind,
        start_line,
        end_line,
        signature: signature_text(node, source),
        docstring: leading_comment_block(node, source, "//"),
    })
}

/// Bare receiver type name: `(s *Store)` -> Store
fn receiver_type(node: Node, source: &[u8]) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    for param in receiver.named_children(&mut receiver.walk()) {
        if let Some(type_node) = param.child_by_field_name("type") {
            let text = node_text(type_node, source);
            let name = text.trim_start_matches(['*', ' ']).trim().to_string();
            if !name.is_empty() {
                return Some(name);
            }
        }
    }
    None
}

fn callee_name(node: Node, source: &[u8]) -> Option<String> {
    let function = node.child_by_field_name("function")?;
    let text = match function.kind() {
        "selector_expression" => node_text(function.child_by_field_name("field")?, source),
        _ => node_text(function, source),
    };
    let name = text.trim().to_string();
    if name.is_empty() || !name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_') {
        return None;
    }
    Some(name)
}

fn import_paths(node: Node, source: &[u8]) -> Vec<String> {
    let mut paths = Vec::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.kind() == "import_spec" {
            if let Some(path) = current.child_by_field_name("path") {
                let text = node_text(path, source);
                let cleaned = text.trim_matches('"').to_string();
                if !cleaned.is_empty() {
                    paths.push(cleaned);
                }
            }
            continue;
        }
        for child in current.named_children(&mut current.walk()) {
            stack.push(child);
        }
    }
    paths.reverse();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ParseResult {
        let mut parser = Parser::new();
        GoParser.configure_parser(&mut parser).unwrap();
        GoParser.parse(&mut parser, content).unwrap()
    }

    #[test]
    fn test_function_with_doc() {
        let source = "// Login authenticates a user.\nfunc Login(user string) bool {\n\treturn check(user)\n}\n";
        let (symbols, refs) = parse(source);
        assert_eq!(symbols[0].name, "Login");
        assert_eq!(symbols[0].kind, SymbolKind::Function);
        assert_eq!(
            symbols[0].docstring.as_deref(),
            Some("Login authenticates a user.")
        );
        assert!(
            refs.iter()
                .any(|r| r.target == "check" && r.edge_type == EdgeType::Calls)
        );
    }

    #[test]
    fn test_method_receiver_is_parent() {
        let source = "type Store struct{}\n\nfunc (s *Store) Get(key string) string {\n\treturn \"\"\n}\n";
        let (symbols, _) = parse(source);
        let class = symbols.iter().find(|s| s.name == "Store").unwrap();
        assert_eq!(class.kind, SymbolKind::Class);
        let method = symbols.iter().find(|s| s.name == "Get").unwrap();
        assert_eq!(method.kind, SymbolKind::Method);
        assert_eq!(method.parent.as_deref(), Some("Store"));
    }

    #[test]
    fn test_imports_grouped() {
        let source = "package main\n\nimport (\n\t\"fmt\"\n\t\"net/http\"\n)\n";
        let (_, refs) = parse(source);
        let imports: Vec<&str> = refs
            .iter()
            .filter(|r| r.edge_type == EdgeType::Imports)
            .map(|r| r.target.as_str())
            .collect();
        assert!(imports.contains(&"fmt"));
        assert!(imports.contains(&"net/http"));
    }

    #[test]
    fn test_selector_call_uses_field() {
        let source = "func f() {\n\thttp.ListenAndServe(\":80\", nil)\n}\n";
        let (_, refs) = parse(source);
        assert!(refs.iter().any(|r| r.target == "ListenAndServe"));
    }
}
