// crates/oracle-server/src/indexer/parsers/rust.rs
// Rust language parser using tree-sitter

use anyhow::{Result, anyhow};
use tree_sitter::{Node, Parser};

use super::{
    LanguageParser, ParseContext, ParseResult, Reference, Symbol, SymbolKind, default_parse,
    leading_comment_block, line_range, node_text, signature_text,
};
use crate::db::EdgeType;

/// Rust language parser
pub struct RustParser;

impl LanguageParser for RustParser {
    fn language_id(&self) -> &'static str {
        "rust"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn separator(&self) -> &'static str {
        "::"
    }

    fn configure_parser(&self, parser: &mut Parser) -> Result<()> {
        parser
            .set_language(&tree_sitter_rust::LANGUAGE.into())
            .map_err(|e| anyhow!("Failed to set Rust language: {}", e))
    }

    fn parse(&self, parser: &mut Parser, content: &str) -> Result<ParseResult> {
        default_parse(parser, content, walk)
    }
}

/// Walk the AST and extract symbols and references
fn walk(node: Node, ctx: &mut ParseContext, parent: Option<&str>, current_fn: Option<&str>) {
    match node.kind() {
        "function_item" | "function_signature_item" => {
            if let Some(sym) = extract_function(node, ctx.source, parent) {
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
        "struct_item" | "enum_item" | "union_item" => {
            if let Some(sym) = extract_named(node, ctx.source, SymbolKind::Class, parent) {
                ctx.symbols.push(sym);
            }
        }
        "trait_item" => {
            if let Some(sym) = extract_named(node, ctx.source, SymbolKind::Class, parent) {
                let name = sym.name.clone();
                ctx.symbols.push(sym);
                for child in node.children(&mut node.walk()) {
                    walk(child, ctx, Some(&name), current_fn);
                }
                return;
            }
        }
        "impl_item" => {
            let type_name = node
                .child_by_field_name("type")
                .map(|n| base_type_name(&node_text(n, ctx.source)));
            // `impl Trait for Type` records Type inheriting Trait
            if let (Some(trait_node), Some(type_name)) =
                (node.child_by_field_name("trait"), type_name.as_deref())
            {
                ctx.references.push(Reference {
                    from_symbol: Some(type_name.to_string()),
                    target: base_type_name(&node_text(trait_node, ctx.source)),
                    edge_type: EdgeType::Inherits,
                });
            }
            for child in node.children(&mut node.walk()) {
                walk(child, ctx, type_name.as_deref(), current_fn);
            }
            return;
        }
        "const_item" | "static_item" | "type_item" => {
            if let Some(sym) = extract_named(node, ctx.source, SymbolKind::Other, parent) {
                ctx.symbols.push(sym);
            }
        }
        "mod_item" => {
            // Inline modules only; `mod foo;` declarations have no body
            if node.child_by_field_name("body").is_some()
                && let Some(sym) = extract_named(node, ctx.source, SymbolKind::Module, parent)
            {
                ctx.symbols.push(sym);
            }
        }
        "use_declaration" => {
            if let Some(arg) = node.child_by_field_name("argument") {
                for target in flatten_use_tree(&node_text(arg, ctx.source)) {
                    ctx.references.push(Reference {
                        from_symbol: None,
                        target,
                        edge_type: EdgeType::Imports,
                    });
                }
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

fn extract_function(node: Node, source: &[u8], parent: Option<&str>) -> Option<Symbol> {
    let name = node_text(node.child_by_field_name("name")?, source);
    let (start_line, end_line) = line_range(node);
    let kind = if parent.is_some() {
        SymbolKind::Method
    } else {
        SymbolKind::Function
    };
    Some(Symbol {
        name,
        parent: parent.map(str::to_string),
        kind,
        start_line,
        end_line,
        signature: signature_text(node, source),
        docstring: leading_comment_block(node, source, "///"),
    })
}

fn extract_named(node: Node, source: &[u8], kind: SymbolKind, parent: Option<&str>) -> Option<Symbol> {
    let name = node_text(node.child_by_field_name("name")?, source);
    let (start_line, end_line) = line_range(node);
    Some(Symbol {
        name,
        parent: parent.map(str::to_string),
        kind,
        start_line,
        end_line,
        signature: signature_text(node, source),
        docstring: leading_comment_block(node, source, "///"),
    })
}

/// Last path segment of the called expression, skipping generics
fn callee_name(node: Node, source: &[u8]) -> Option<String> {
    let function = node.child_by_field_name("function")?;
    let text = match function.kind() {
        // method calls: the field name is the callee
        "field_expression" => node_text(function.child_by_field_name("field")?, source),
        _ => node_text(function, source),
    };
    let text = text.split('<').next().unwrap_or(&text);
    let name = text.rsplit("::").next().unwrap_or(text).trim().to_string();
    if name.is_empty() || !name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_') {
        return None;
    }
    Some(name)
}

/// Strip generics and references from an impl type/trait name
fn base_type_name(text: &str) -> String {
    text.trim_start_matches(['&', ' '])
        .split('<')
        .next()
        .unwrap_or(text)
        .trim()
        .to_string()
}

/// Expand `use a::{b, c::d}` into leaf import paths; aliases keep the
/// original path.
fn flatten_use_tree(text: &str) -> Vec<String> {
    let text = text.trim().trim_end_matches(';');
    let mut targets = Vec::new();
    flatten_into(text, "", &mut targets);
    targets
}

fn flatten_into(text: &str, prefix: &str, out: &mut Vec<String>) {
    let text = text.trim();
    if let Some(open) = text.find('{') {
        let head = text[..open].trim().trim_end_matches("::");
        let inner = text[open + 1..].trim_end_matches('}');
        let combined = join_path(prefix, head);
        for part in split_top_level(inner) {
            flatten_into(&part, &combined, out);
        }
        return;
    }
    let leaf = text.split(" as ").next().unwrap_or(text).trim();
    if leaf.is_empty() || leaf == "*" || leaf == "self" {
        if !prefix.is_empty() {
            out.push(prefix.to_string());
        }
        return;
    }
    out.push(join_path(prefix, leaf));
}

fn join_path(prefix: &str, part: &str) -> String {
    if prefix.is_empty() {
        part.to_string()
    } else if part.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}::{part}")
    }
}

/// Split a brace group body on commas not nested in inner braces
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                if !current.trim().is_empty() {
                    parts.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ParseResult {
        let mut parser = Parser::new();
        RustParser.configure_parser(&mut parser).unwrap();
        RustParser.parse(&mut parser, content).unwrap()
    }

    #[test]
    fn test_extracts_function_with_doc() {
        let (symbols, _) = parse("/// Adds two numbers\nfn add(a: i32, b: i32) -> i32 { a + b }\n");
        assert_eq!(symbols.len(), 1);
        let sym = &symbols[0];
        assert_eq!(sym.name, "add");
        assert_eq!(sym.kind, SymbolKind::Function);
        assert_eq!(sym.docstring.as_deref(), Some("Adds two numbers"));
        assert!(sym.signature.as_deref().unwrap().contains("fn add"));
        assert_eq!(sym.start_line, 2);
    }

    #[test]
    fn test_impl_methods_have_parent() {
        let source = "struct Engine;\nimpl Engine {\n    fn start(&self) {}\n}\n";
        let (symbols, _) = parse(source);
        let method = symbols.iter().find(|s| s.name == "start").unwrap();
        assert_eq!(method.kind, SymbolKind::Method);
        assert_eq!(method.parent.as_deref(), Some("Engine"));
    }

    #[test]
    fn test_trait_impl_records_inherits() {
        let source = "struct A;\ntrait Runner { fn run(&self); }\nimpl Runner for A { fn run(&self) {} }\n";
        let (_, refs) = parse(source);
        let inherits: Vec<_> = refs
            .iter()
            .filter(|r| r.edge_type == EdgeType::Inherits)
            .collect();
        assert_eq!(inherits.len(), 1);
        assert_eq!(inherits[0].from_symbol.as_deref(), Some("A"));
        assert_eq!(inherits[0].target, "Runner");
    }

    #[test]
    fn test_calls_attributed_to_enclosing_fn() {
        let source = "fn outer() { helper(); obj.method(); }\nfn helper() {}\n";
        let (_, refs) = parse(source);
        let calls: Vec<_> = refs.iter().filter(|r| r.edge_type == EdgeType::Calls).collect();
        assert!(calls.iter().any(|r| r.target == "helper"));
        assert!(calls.iter().any(|r| r.target == "method"));
        for call in calls {
            assert_eq!(call.from_symbol.as_deref(), Some("outer"));
        }
    }

    #[test]
    fn test_use_tree_flattening() {
        let targets = flatten_use_tree("std::collections::{HashMap, HashSet}");
        assert_eq!(
            targets,
            vec!["std::collections::HashMap", "std::collections::HashSet"]
        );
        let targets = flatten_use_tree("crate::db::pool::DatabasePool as Pool");
        assert_eq!(targets, vec!["crate::db::pool::DatabasePool"]);
        let targets = flatten_use_tree("super::{a::{B, C}, d}");
        assert_eq!(targets, vec!["super::a::B", "super::a::C", "super::d"]);
    }

    #[test]
    fn test_imports_extracted() {
        let (_, refs) = parse("use crate::auth::verify;\nfn f() {}\n");
        let imports: Vec<_> = refs
            .iter()
            .filter(|r| r.edge_type == EdgeType::Imports)
            .collect();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].target, "crate::auth::verify");
        assert!(imports[0].from_symbol.is_none());
    }

    #[test]
    fn test_struct_enum_trait_are_classes() {
        let (symbols, _) = parse("struct S;\nenum E { A }\ntrait T {}\n");
        assert_eq!(symbols.len(), 3);
        assert!(symbols.iter().all(|s| s.kind == SymbolKind::Class));
    }
}
