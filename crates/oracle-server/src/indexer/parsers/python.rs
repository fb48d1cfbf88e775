// crates/oracle-server/src/indexer/parsers/python.rs
// Python language parser using tree-sitter

use anyhow::{Result, anyhow};
use tree_sitter::{Node, Parser};

use super::{
    LanguageParser, ParseContext, ParseResult, Reference, Symbol, SymbolKind, default_parse,
    line_range, node_text, signature_text,
};
use crate::db::EdgeType;

/// Python language parser
pub struct PythonParser;

impl LanguageParser for PythonParser {
    fn language_id(&self) -> &'static str {
        "python"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py"]
    }

    fn separator(&self) -> &'static str {
        "."
    }

    fn configure_parser(&self, parser: &mut Parser) -> Result<()> {
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| anyhow!("Failed to set Python language: {}", e))
    }

    fn parse(&self, parser: &mut Parser, content: &str) -> Result<ParseResult> {
        default_parse(parser, content, walk)
    }
}

fn walk(node: Node, ctx: &mut ParseContext, parent: Option<&str>, current_fn: Option<&str>) {
    match node.kind() {
        "function_definition" => {
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
        "class_definition" => {
            if let Some(sym) = extract_class(node, ctx.source, parent) {
                let class_name = sym.name.clone();
                // Base classes become inherits edges
                if let Some(superclasses) = node.child_by_field_name("superclasses") {
                    for base in superclasses.named_children(&mut superclasses.walk()) {
                        if matches!(base.kind(), "identifier" | "attribute") {
                            ctx.references.push(Reference {
                                from_symbol: Some(class_name.clone()),
                                target: last_attribute_segment(&node_text(base, ctx.source)),
                                edge_type: EdgeType::Inherits,
                            });
                        }
                    }
                }
                ctx.symbols.push(sym);
                if let Some(body) = node.child_by_field_name("body") {
                    for child in body.children(&mut body.walk()) {
                        walk(child, ctx, Some(&class_name), current_fn);
                    }
                }
                return;
            }
        }
        "import_statement" | "import_from_statement" => {
            for target in import_targets(node, ctx.source) {
                ctx.references.push(Reference {
                    from_symbol: None,
                    target,
                    edge_type: EdgeType::Imports,
                });
            }
        }
        "call" => {
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
        "decorator" => {
            if let Some(name) = node
                .named_child(0)
                .map(|n| last_attribute_segment(&node_text(n, ctx.source)))
                .filter(|n| !n.is_empty())
            {
                ctx.references.push(Reference {
                    from_symbol: current_fn.or(parent).map(str::to_string),
                    target: name.split('(').next().unwrap_or(&name).to_string(),
                    edge_type: EdgeType::References,
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
        docstring: docstring(node, source),
    })
}

fn extract_class(node: Node, source: &[u8], parent: Option<&str>) -> Option<Symbol> {
    let name = node_text(node.child_by_field_name("name")?, source);
    let (start_line, end_line) = line_range(node);
    Some(Symbol {
        name,
        parent: parent.map(str::to_string),
        kind: SymbolKind::Class,
        start_line,
        end_line,
        signature: signature_text(node, source),
        docstring: docstring(node, source),
    })
}

/// A Python docstring is the first statement of the body when it is a
/// bare string literal.
fn docstring(node: Node, source: &[u8]) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let raw = node_text(string, source);
    let cleaned = raw
        .trim_start_matches(['r', 'b', 'f', 'u', 'R', 'B', 'F', 'U'])
        .trim_start_matches("\"\"\"")
        .trim_start_matches("'''")
        .trim_start_matches(['"', '\''])
        .trim_end_matches("\"\"\"")
        .trim_end_matches("'''")
        .trim_end_matches(['"', '\''])
        .trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

fn callee_name(node: Node, source: &[u8]) -> Option<String> {
    let function = node.child_by_field_name("function")?;
    let text = match function.kind() {
        "attribute" => node_text(function.child_by_field_name("attribute")?, source),
        _ => node_text(function, source),
    };
    let name = text.trim().to_string();
    if name.is_empty() || !name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_') {
        return None;
    }
    Some(name)
}

fn last_attribute_segment(text: &str) -> String {
    text.rsplit('.').next().unwrap_or(text).trim().to_string()
}

/// Import targets: `import a.b, c` -> [a.b, c];
/// `from x import y, z` -> [x.y, x.z]
fn import_targets(node: Node, source: &[u8]) -> Vec<String> {
    let mut targets = Vec::new();
    match node.kind() {
        "import_statement" => {
            for child in node.named_children(&mut node.walk()) {
                match child.kind() {
                    "dotted_name" => targets.push(node_text(child, source)),
                    "aliased_import" => {
                        if let Some(name) = child.child_by_field_name("name") {
                            targets.push(node_text(name, source));
                        }
                    }
                    _ => {}
                }
            }
        }
        "import_from_statement" => {
            let module = node
                .child_by_field_name("module_name")
                .map(|n| node_text(n, source))
                .unwrap_or_default();
            let mut found_name = false;
            for child in node.named_children(&mut node.walk()) {
                // The module_name field appears first; subsequent dotted
                // names are the imported symbols
                match child.kind() {
                    "dotted_name" if !found_name => {
                        found_name = true;
                    }
                    "dotted_name" => {
                        targets.push(join_module(&module, &node_text(child, source)));
                    }
                    "aliased_import" => {
                        if let Some(name) = child.child_by_field_name("name") {
                            targets.push(join_module(&module, &node_text(name, source)));
                        }
                    }
                    "wildcard_import" => targets.push(module.clone()),
                    _ => {}
                }
            }
            if targets.is_empty() && !module.is_empty() {
                targets.push(module);
            }
        }
        _ => {}
    }
    targets.retain(|t| !t.is_empty());
    targets
}

fn join_module(module: &str, name: &str) -> String {
    if module.is_empty() {
        name.to_string()
    } else {
        format!("{module}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ParseResult {
        let mut parser = Parser::new();
        PythonParser.configure_parser(&mut parser).unwrap();
        PythonParser.parse(&mut parser, content).unwrap()
    }

    #[test]
    fn test_function_with_docstring() {
        let source = "def login(user, password):\n    \"\"\"Authenticate a user.\"\"\"\n    return check(user, password)\n";
        let (symbols, refs) = parse(source);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "login");
        assert_eq!(symbols[0].kind, SymbolKind::Function);
        assert_eq!(symbols[0].docstring.as_deref(), Some("Authenticate a user."));
        assert!(
            refs.iter()
                .any(|r| r.target == "check" && r.edge_type == EdgeType::Calls)
        );
    }

    #[test]
    fn test_class_with_methods_and_bases() {
        let source = "class TokenStore(BaseStore):\n    def get(self, key):\n        return None\n";
        let (symbols, refs) = parse(source);
        let class = symbols.iter().find(|s| s.name == "TokenStore").unwrap();
        assert_eq!(class.kind, SymbolKind::Class);
        let method = symbols.iter().find(|s| s.name == "get").unwrap();
        assert_eq!(method.kind, SymbolKind::Method);
        assert_eq!(method.parent.as_deref(), Some("TokenStore"));
        assert!(
            refs.iter()
                .any(|r| r.target == "BaseStore" && r.edge_type == EdgeType::Inherits)
        );
    }

    #[test]
    fn test_imports() {
        let source = "import os.path\nfrom auth.tokens import issue, revoke\n";
        let (_, refs) = parse(source);
        let imports: Vec<&str> = refs
            .iter()
            .filter(|r| r.edge_type == EdgeType::Imports)
            .map(|r| r.target.as_str())
            .collect();
        assert!(imports.contains(&"os.path"));
        assert!(imports.contains(&"auth.tokens.issue"));
        assert!(imports.contains(&"auth.tokens.revoke"));
    }

    #[test]
    fn test_method_call_uses_attribute_name() {
        let source = "def f():\n    db.session.commit()\n";
        let (_, refs) = parse(source);
        assert!(
            refs.iter()
                .any(|r| r.target == "commit" && r.edge_type == EdgeType::Calls)
        );
    }

    #[test]
    fn test_decorator_reference() {
        let source = "@app.route\ndef index():\n    pass\n";
        let (_, refs) = parse(source);
        assert!(
            refs.iter()
                .any(|r| r.target == "route" && r.edge_type == EdgeType::References)
        );
    }
}
