// Python source parser

use std::path::{Component, Path};
use tree_sitter::{Node, Parser as TreeParser, Tree, TreeCursor};

use crate::index::{RawImport, RepoFile, SymbolKind, SymbolRecord};

/// A file the parser could not turn into a clean syntax tree
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

/// Everything extracted from one file
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub symbols: Vec<SymbolRecord>,
    pub imports: Vec<RawImport>,
}

/// Python parser using tree-sitter
pub struct PythonParser;

impl PythonParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_tree(&self, content: &str) -> Result<Tree, SyntaxError> {
        let mut parser = TreeParser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| SyntaxError {
                line: 0,
                message: format!("failed to load Python grammar: {}", e),
            })?;

        parser.parse(content, None).ok_or_else(|| SyntaxError {
            line: 0,
            message: "Failed to parse Python code".to_string(),
        })
    }

    /// Parse one file. Any error node in the tree rejects the whole file.
    pub fn parse(&self, content: &str, file: &RepoFile) -> Result<ParsedFile, SyntaxError> {
        let tree = self.parse_tree(content)?;
        let root = tree.root_node();

        if root.has_error() {
            let line = first_error(root).map_or(1, |n| n.start_position().row + 1);
            return Err(SyntaxError {
                line,
                message: "invalid syntax".to_string(),
            });
        }

        let mut parsed = ParsedFile::default();
        let mut cursor = root.walk();
        self.walk_tree(&mut cursor, content, file, &mut parsed);

        Ok(parsed)
    }

    fn walk_tree(&self, cursor: &mut TreeCursor, content: &str, file: &RepoFile, parsed: &mut ParsedFile) {
        let node = cursor.node();

        match node.kind() {
            "function_definition" => {
                if let Some(symbol) = self.extract_function(node, content, file) {
                    parsed.symbols.push(symbol);
                }
            }
            "class_definition" => {
                if let Some(symbol) = self.extract_class(node, content, file) {
                    parsed.symbols.push(symbol);
                }
            }
            "import_statement" => {
                for module in self.extract_import(node, content) {
                    parsed.imports.push(RawImport {
                        file: file.clone(),
                        imported_module: module,
                    });
                }
            }
            "import_from_statement" => {
                if let Some(module) = self.extract_import_from(node, content) {
                    parsed.imports.push(RawImport {
                        file: file.clone(),
                        imported_module: module,
                    });
                }
            }
            "future_import_statement" => {
                parsed.imports.push(RawImport {
                    file: file.clone(),
                    imported_module: "__future__".to_string(),
                });
            }
            _ => {}
        }

        // Recurse into children
        if cursor.goto_first_child() {
            loop {
                self.walk_tree(cursor, content, file, parsed);
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
            cursor.goto_parent();
        }
    }

    fn extract_function(&self, node: Node, content: &str, file: &RepoFile) -> Option<SymbolRecord> {
        let name = self.get_node_text(node.child_by_field_name("name"), content)?;

        let mut cursor = node.walk();
        let is_async = node.children(&mut cursor).any(|child| child.kind() == "async");

        Some(SymbolRecord {
            file: file.clone(),
            name,
            kind: if is_async {
                SymbolKind::AsyncFunction
            } else {
                SymbolKind::Function
            },
            line: node.start_position().row + 1,
            docstring: self.extract_docstring(node, content).unwrap_or_default(),
        })
    }

    fn extract_class(&self, node: Node, content: &str, file: &RepoFile) -> Option<SymbolRecord> {
        let name = self.get_node_text(node.child_by_field_name("name"), content)?;

        Some(SymbolRecord {
            file: file.clone(),
            name,
            kind: SymbolKind::Class,
            line: node.start_position().row + 1,
            docstring: self.extract_docstring(node, content).unwrap_or_default(),
        })
    }

    /// `import a.b, c as d` yields `a.b` and `c`
    fn extract_import(&self, node: Node, content: &str) -> Vec<String> {
        let mut cursor = node.walk();
        node.children_by_field_name("name", &mut cursor)
            .filter_map(|name| {
                let dotted = if name.kind() == "aliased_import" {
                    name.child_by_field_name("name")?
                } else {
                    name
                };
                self.get_compact_text(dotted, content)
            })
            .collect()
    }

    /// `from ..pkg import x` yields `..pkg`, `from . import x` yields `.`
    fn extract_import_from(&self, node: Node, content: &str) -> Option<String> {
        let module = node.child_by_field_name("module_name")?;
        self.get_compact_text(module, content)
    }

    /// Leading string literal of a class or function body
    fn extract_docstring(&self, node: Node, content: &str) -> Option<String> {
        let body = node.child_by_field_name("body")?;
        let mut cursor = body.walk();
        let first = body
            .named_children(&mut cursor)
            .find(|child| child.kind() != "comment")?;
        if first.kind() != "expression_statement" {
            return None;
        }

        let mut cursor = first.walk();
        let mut children = first.named_children(&mut cursor);
        let expr = children.next()?;
        if children.next().is_some() {
            return None;
        }

        let raw = match expr.kind() {
            "string" => string_literal_value(expr, content)?,
            "concatenated_string" => {
                let mut cursor = expr.walk();
                let parts: Option<Vec<String>> = expr
                    .named_children(&mut cursor)
                    .filter(|part| part.kind() == "string")
                    .map(|part| string_literal_value(part, content))
                    .collect();
                parts?.concat()
            }
            _ => return None,
        };

        Some(clean_docstring(&raw))
    }

    fn get_node_text(&self, node: Option<Node>, content: &str) -> Option<String> {
        node.map(|n| content[n.byte_range()].to_string())
    }

    fn get_compact_text(&self, node: Node, content: &str) -> Option<String> {
        let text: String = content[node.byte_range()]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Dotted module name for a path relative to its repository root.
///
/// `pkg/sub/mod.py` becomes `pkg.sub.mod`; a package initializer
/// `pkg/__init__.py` becomes `pkg`.
pub fn module_name_for_path(relative: &Path) -> String {
    let mut parts: Vec<String> = relative
        .with_extension("")
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.last().map_or(false, |last| last == "__init__") {
        parts.pop();
    }

    parts.join(".")
}

fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|child| child.has_error() || child.is_missing())
        .find_map(first_error)
}

/// Value of a plain string literal; f-strings and bytes are not docstrings
fn string_literal_value(node: Node, content: &str) -> Option<String> {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    let start = children.iter().find(|c| c.kind() == "string_start")?;
    let end = children.iter().rev().find(|c| c.kind() == "string_end")?;

    let prefix: String = content[start.byte_range()]
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if prefix.contains('f') || prefix.contains('b') {
        return None;
    }

    let body = &content[start.end_byte()..end.start_byte()];
    if prefix.contains('r') {
        Some(body.to_string())
    } else {
        Some(unescape(body))
    }
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\n') => {}
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Strip the first line's leading whitespace and the common indentation of
/// the remaining lines, then drop leading and trailing blank lines.
pub fn clean_docstring(raw: &str) -> String {
    let expanded = raw.replace('\t', "        ");
    let lines: Vec<&str> = expanded.lines().collect();

    let margin = lines
        .iter()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<&str> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            cleaned.push(line.trim_start());
        } else if line.trim().is_empty() {
            cleaned.push("");
        } else {
            cleaned.push(line.get(margin..).unwrap_or_else(|| line.trim_start()));
        }
    }

    while cleaned.first().map_or(false, |l| l.trim().is_empty()) {
        cleaned.remove(0);
    }
    while cleaned.last().map_or(false, |l| l.trim().is_empty()) {
        cleaned.pop();
    }

    cleaned.join("\n")
}
