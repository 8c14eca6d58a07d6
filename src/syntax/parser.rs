//! Tree-sitter front end for Python sources

use crate::error::{MendError, Result};
use std::cell::RefCell;
use tree_sitter::{Node, Parser, Tree};

// ═══════════════════════════════════════════════════════════════════════════
//  THREAD-LOCAL PARSER
// ═══════════════════════════════════════════════════════════════════════════
//
// Parsers are expensive to create but reusable. The server runs checks on
// tokio's blocking pool, so each worker thread keeps its own configured
// instance.

thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - will be caught at parse time if language fails
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

/// Parse Python source with the thread-local parser.
pub fn parse_python(content: &str) -> Result<Tree> {
    PYTHON_PARSER
        .with(|p| p.borrow_mut().parse(content, None))
        .ok_or_else(|| MendError::Parser("tree-sitter returned no tree".to_string()))
}

/// Location and description of the first node tree-sitter could not fit
/// into the grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

pub fn first_error(tree: &Tree, source: &str) -> Option<ParseFailure> {
    let root = tree.root_node();
    if !root.has_error() {
        return None;
    }
    let node = find_error_node(root).unwrap_or(root);
    let message = if node.is_missing() {
        format!("expected '{}'", node.kind())
    } else {
        let snippet = node_text(&node, source).lines().next().unwrap_or("").trim();
        if snippet.is_empty() {
            "invalid syntax".to_string()
        } else {
            format!("invalid syntax near '{}'", crate::util::truncate(snippet, 40))
        }
    };
    Some(ParseFailure {
        line: node.start_position().row + 1,
        column: node.start_position().column,
        message,
    })
}

fn find_error_node(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(find_error_node)
}

/// Visit every node under `root` (inclusive) in document order.
pub fn walk_nodes<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>)) {
    let mut cursor = root.walk();
    loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Source text covered by a node.
pub fn node_text<'s>(node: &Node<'_>, source: &'s str) -> &'s str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

/// Unquoted content of a `string` node (prefix and delimiters dropped).
pub fn string_value(node: &Node<'_>, source: &str) -> String {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() == "string_content")
        .map(|child| node_text(&child, source))
        .collect()
}
