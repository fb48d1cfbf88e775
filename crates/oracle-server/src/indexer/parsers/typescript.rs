// crates/oracle-server/src/indexer/parsers/typescript.rs
// TypeScript/JavaScript parser using tree-sitter

use anyhow::{Result, anyhow};
use tree_sitter::{Node, Parser};

use super::{
    LanguageParser, ParseContext, ParseResult, Reference, Symbol, SymbolKind, default_parse,
    line_range, node_text, signature_text,
};
use crate::db::EdgeType;

/// TypeScript language parser (also covers JavaScript)
pub struct TypeScriptParser;

impl LanguageParser for TypeScriptParser {
    fn language_id(&self) -> &'static str {
        "typescript"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx", "js", "jsx"]
    }

    fn separator(&self) -> &'static str {
        "."
    }

    fn configure_parser(&self, parser: &mut Parser) -> Result<()> {
        parser
            .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            .map_err(|e| anyhow!("Failed to set TypeScript language: {}", e))
    }

    fn parse(&self, parser: &mut Parser, content: &str) -> Result<ParseResult> {
        default_parse(parser, content, walk)
    }
}

fn walk(node: Node, ctx: &mut ParseContext, parent: Option<&str>, current_fn: Option<&str>) {
    match node.kind() {
        "function_declaration" | "generator_function_declaration" => {
            if let Some(sym) = extract_named(node, ctx.source, SymbolKind::Function, parent) {
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
        "method_definition" => {
            if let Some(mut sym) = extract_named(node, ctx.source, SymbolKind::Method, parent) {
                if parent.is_none() {
                    sym.kind = SymbolKind::Function;
                }
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
        "class_declaration" | "abstract_class_declaration" => {
            if let Some(sym) = extract_named(node, ctx.source, SymbolKind::Class, parent) {
                let class_name = sym.name.clone();
                extract_heritage(node, ctx, &class_name);
                ctx.symbols.push(sym);
                if let Some(body) = node.child_by_field_name("body") {
                    for child in body.children(&mut body.walk()) {
                        walk(child, ctx, Some(&class_name), current_fn);
                    }
                }
                return;
            }
        }
        "interface_declaration" | "enum_declaration" => {
            if let Some(sym) = extract_named(node, ctx.source, SymbolKind::Class, parent) {
                ctx.symbols.push(sym);
            }
        }
        "type_alias_declaration" => {
            if let Some(sym) = extract_named(node, ctx.source, SymbolKind::Other, parent) {
                ctx.symbols.push(sym);
            }
        }
        "lexical_declaration" | "variable_declaration" => {
            // `const f = () => {}` and `const f = function() {}` count as
            // functions at module or class scope
            for declarator in node.named_children(&mut node.walk()) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                let Some(value) = declarator.child_by_field_name("value") else {
                    continue;
                };
                if !matches!(value.kind(), "arrow_function" | "function_expression") {
                    continue;
                }
                if let Some(name) = declarator.child_by_field_name("name") {
                    let name = node_text(name, ctx.source);
                    let (start_line, end_line) = line_range(node);
                    ctx.symbols.push(Symbol {
                        name: name.clone(),
                        parent: parent.map(str::to_string),
                        kind: SymbolKind::Function,
                        start_line,
                        end_line,
                        signature: signature_text(value, ctx.source)
                            .map(|sig| format!("const {name} = {sig}")),
                        docstring: doc_comment(node, ctx.source),
                    });
                    for child in value.children(&mut value.walk()) {
                        walk(child, ctx, parent, Some(&name));
                    }
                }
            }
            return;
        }
        "import_statement" => {
            if let Some(source_node) = node.child_by_field_name("source") {
                let module = node_text(source_node, ctx.source)
                    .trim_matches(['"', '\''])
                    .to_string();
                if !module.is_empty() {
                    ctx.references.push(Reference {
                        from_symbol: None,
                        target: module,
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
        "new_expression" => {
            if let Some(caller) = current_fn
                && let Some(constructor) = node.child_by_field_name("constructor")
            {
                let name = node_text(constructor, ctx.source);
                let name = name.rsplit('.').next().unwrap_or(&name).to_string();
                if !name.is_empty() {
                    ctx.references.push(Reference {
                        from_symbol: Some(caller.to_string()),
                        target: name,
                        edge_type: EdgeType::References,
                    });
                }
            }
        }
        _ => {}
    }

    for child in node.children(&mut node.walk()) {
        walk(child, ctx, parent, current_fn);
    }
}

/// `extends` and `implements` clauses become inherits edges
fn extract_heritage(node: Node, ctx: &mut ParseContext, class_name: &str) {
    for child in node.children(&mut node.walk()) {
        if child.kind() != "class_heritage" {
            continue;
        }
        for clause in child.children(&mut child.walk()) {
            for value in clause.named_children(&mut clause.walk()) {
                if matches!(
                    value.kind(),
                    "identifier" | "member_expression" | "type_identifier" | "generic_type"
                ) {
                    let text = node_text(value, ctx.source);
                    let base = text
                        .split('<')
                        .next()
                        .unwrap_or(&text)
                        .rsplit('.')
                        .next()
                        .unwrap_or(&text)
                        .trim()
                        .to_string();
                    if !base.is_empty() {
                        ctx.references.push(Reference {
                            from_symbol: Some(class_name.to_string()),
                            target: base,
                            edge_type: EdgeType::Inherits,
                        });
                    }
                }
            }
        }
    }
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
        docstring: doc_comment(node, source),
    })
}

/// JSDoc block or line comments immediately preceding the node
fn doc_comment(node: Node, source: &[u8]) -> Option<String> {
    let prev = node.prev_sibling()?;
    if prev.kind() != "comment" {
        return None;
    }
    let text = node_text(prev, source);
    let trimmed = text.trim();
    let cleaned = if trimmed.starts_with("/**") {
        trimmed
            .trim_start_matches("/**")
            .trim_end_matches("*/")
            .lines()
            .map(|line| line.trim().trim_start_matches('*').trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    } else if trimmed.starts_with("//") {
        trimmed.trim_start_matches('/').trim().to_string()
    } else {
        return None;
    };
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn callee_name(node: Node, source: &[u8]) -> Option<String> {
    let function = node.child_by_field_name("function")?;
    let text = match function.kind() {
        "member_expression" => node_text(function.child_by_field_name("property")?, source),
        _ => node_text(function, source),
    };
    let name = text.trim().to_string();
    if name.is_empty() || !name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
    {
        return None;
    }
    Some(name)
}
