//! Compile-stage checks
//!
//! tree-sitter's Python grammar is looser than CPython: it still accepts
//! Python 2 `print`/`exec` statements, takes parameters and call
//! arguments in any order, and knows nothing about scopes. CPython
//! rejects all of these when it compiles the module, so the import fails
//! just like a parse error would.

use super::parser::{self, ParseFailure};
use std::collections::HashSet;
use tree_sitter::{Node, Tree};

/// First construct in a cleanly parsed tree that CPython would refuse to
/// compile.
pub fn first_violation(tree: &Tree, source: &str) -> Option<ParseFailure> {
    let mut found = None;
    parser::walk_nodes(tree.root_node(), |node| {
        if found.is_some() {
            return;
        }
        found = check_node(node, source).map(|(at, message)| ParseFailure {
            line: at.start_position().row + 1,
            column: at.start_position().column,
            message,
        });
    });
    found
}

fn check_node<'t>(node: Node<'t>, source: &str) -> Option<(Node<'t>, String)> {
    if !node.is_named() {
        return None;
    }
    match node.kind() {
        "print_statement" => Some((node, missing_parentheses("print"))),
        "exec_statement" => Some((node, missing_parentheses("exec"))),
        "parameters" | "lambda_parameters" => check_parameters(node, source),
        "argument_list" => check_arguments(node, source),
        "return_statement" if !in_function(node, false) => {
            Some((node, "'return' outside function".to_string()))
        }
        "yield" if !in_function(node, true) => Some((node, "'yield' outside function".to_string())),
        "nonlocal_statement" if !in_function(node, false) => Some((
            node,
            "nonlocal declaration not allowed at module level".to_string(),
        )),
        "break_statement" if !in_loop(node) => Some((node, "'break' outside loop".to_string())),
        "continue_statement" if !in_loop(node) => {
            Some((node, "'continue' not properly in loop".to_string()))
        }
        _ => None,
    }
}

fn missing_parentheses(name: &str) -> String {
    format!(
        "Missing parentheses in call to '{}'. Did you mean {}(...)?",
        name, name
    )
}

/// A class body between the node and its function is a new scope.
fn in_function(node: Node<'_>, lambda_counts: bool) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        match parent.kind() {
            "function_definition" => return true,
            "lambda" if lambda_counts => return true,
            "class_definition" => return false,
            _ => {}
        }
        current = parent.parent();
    }
    false
}

/// The `else` of a loop is not part of it.
fn in_loop(node: Node<'_>) -> bool {
    let mut child = node;
    while let Some(parent) = child.parent() {
        match parent.kind() {
            "for_statement" | "while_statement" if child.kind() != "else_clause" => return true,
            "function_definition" | "class_definition" => return false,
            _ => {}
        }
        child = parent;
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Param {
    Plain,
    Default,
    Star,
    BareStar,
    DoubleStar,
    Slash,
}

fn classify(node: Node<'_>) -> Option<Param> {
    let class = match node.kind() {
        "identifier" | "tuple_pattern" => Param::Plain,
        "typed_parameter" => match node.named_child(0).map(|c| c.kind()) {
            Some("list_splat_pattern") => Param::Star,
            Some("dictionary_splat_pattern") => Param::DoubleStar,
            _ => Param::Plain,
        },
        "default_parameter" | "typed_default_parameter" => Param::Default,
        "list_splat_pattern" => Param::Star,
        "keyword_separator" => Param::BareStar,
        "dictionary_splat_pattern" => Param::DoubleStar,
        "positional_separator" => Param::Slash,
        _ => return None,
    };
    Some(class)
}

fn parameter_name<'s>(node: Node<'_>, source: &'s str) -> Option<&'s str> {
    match node.kind() {
        "identifier" => Some(parser::node_text(&node, source)),
        "default_parameter" | "typed_default_parameter" => node
            .child_by_field_name("name")
            .map(|name| parser::node_text(&name, source)),
        "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => node
            .named_child(0)
            .and_then(|inner| parameter_name(inner, source)),
        _ => None,
    }
}

fn check_parameters<'t>(node: Node<'t>, source: &str) -> Option<(Node<'t>, String)> {
    let mut cursor = node.walk();
    let params: Vec<(Node<'t>, Param)> = node
        .named_children(&mut cursor)
        .filter_map(|p| classify(p).map(|class| (p, class)))
        .collect();

    let mut seen_default = false;
    let mut seen_star = false;
    let mut seen_double_star = false;
    let mut bare_star: Option<Node<'t>> = None;
    let mut names = HashSet::new();

    for &(param, class) in &params {
        if seen_double_star {
            return Some((param, "arguments cannot follow var-keyword argument".to_string()));
        }
        match class {
            Param::Plain if param.kind() == "tuple_pattern" => {
                return Some((param, "Function parameters cannot be parenthesized".to_string()))
            }
            Param::Plain if seen_default && !seen_star => {
                return Some((
                    param,
                    "parameter without a default follows parameter with a default".to_string(),
                ))
            }
            Param::Plain | Param::Default => {
                seen_default |= class == Param::Default && !seen_star;
                bare_star = None;
            }
            Param::Star | Param::BareStar if seen_star => {
                return Some((param, "* argument may appear only once".to_string()))
            }
            Param::Star | Param::BareStar => {
                seen_star = true;
                if class == Param::BareStar {
                    bare_star = Some(param);
                }
            }
            Param::DoubleStar => seen_double_star = true,
            Param::Slash if seen_star => return Some((param, "/ must be ahead of *".to_string())),
            Param::Slash => {}
        }
        if bare_star.is_some() && class == Param::DoubleStar {
            break;
        }
        if let Some(name) = parameter_name(param, source) {
            if !names.insert(name) {
                return Some((
                    param,
                    format!("duplicate argument '{}' in function definition", name),
                ));
            }
        }
    }

    bare_star.map(|star| (star, "named arguments must follow bare *".to_string()))
}

fn check_arguments<'t>(node: Node<'t>, source: &str) -> Option<(Node<'t>, String)> {
    let mut cursor = node.walk();
    let mut seen_keyword = false;
    let mut seen_double_star = false;
    let mut keywords = HashSet::new();

    for arg in node.named_children(&mut cursor) {
        match arg.kind() {
            "comment" => {}
            "list_splat" if seen_double_star => {
                return Some((
                    arg,
                    "iterable argument unpacking follows keyword argument unpacking".to_string(),
                ))
            }
            "list_splat" => {}
            "dictionary_splat" => seen_double_star = true,
            "keyword_argument" => {
                seen_keyword = true;
                let name = arg
                    .child_by_field_name("name")
                    .map(|n| parser::node_text(&n, source));
                if let Some(name) = name {
                    if !keywords.insert(name) {
                        return Some((arg, format!("keyword argument repeated: {}", name)));
                    }
                }
            }
            _ if seen_double_star => {
                return Some((
                    arg,
                    "positional argument follows keyword argument unpacking".to_string(),
                ))
            }
            _ if seen_keyword => {
                return Some((arg, "positional argument follows keyword argument".to_string()))
            }
            _ => {}
        }
    }
    None
}
