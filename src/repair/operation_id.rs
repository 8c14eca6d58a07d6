//! Route operation IDs
//!
//! FastAPI derives an operation ID for every route; the effective ID is
//! the explicit `operation_id=` argument when present, else the handler's
//! function name. Generated OpenAPI clients break when two routes share
//! an effective ID, so this module both injects explicit IDs and remaps
//! duplicates across the whole module set.

use super::{FixRecord, FixStatus, RepairResult};
use crate::syntax::{self, parser};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tree_sitter::Node;

pub const ROUTE_METHODS: &[&str] = &[
    "get",
    "post",
    "put",
    "delete",
    "patch",
    "options",
    "head",
    "api_route",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecorator {
    pub method: String,
    pub path: Option<String>,
    /// Explicit `operation_id=` value. For non-literal expressions this is
    /// the expression text.
    pub operation_id: Option<String>,
    pub function_name: String,
    /// 1-based line of the decorator
    pub line: usize,
    #[serde(skip)]
    pub(crate) decorator_start: usize,
    /// Byte offset where a new keyword argument goes
    #[serde(skip)]
    insert_at: usize,
    #[serde(skip)]
    args_empty: bool,
    /// Byte span of the `operation_id` string literal, when it is a plain literal
    #[serde(skip)]
    literal_span: Option<(usize, usize)>,
    #[serde(skip)]
    path_span: Option<(usize, usize)>,
}

impl RouteDecorator {
    pub fn effective_id(&self) -> &str {
        self.operation_id.as_deref().unwrap_or(&self.function_name)
    }

    /// An ID we can rewrite: either missing or a plain string literal.
    pub fn is_rewritable(&self) -> bool {
        self.operation_id.is_none() || self.literal_span.is_some()
    }

    /// `@router.get("")`: FastAPI rejects an empty path on a router
    /// without a prefix.
    pub fn has_empty_path(&self) -> bool {
        self.path.as_deref() == Some("") && self.path_span.is_some()
    }

    /// Edit that turns an empty path literal into `"/"`.
    pub(crate) fn root_path_edit(&self) -> Option<(usize, usize, String)> {
        self.path_span
            .filter(|_| self.has_empty_path())
            .map(|(start, end)| (start, end, "\"/\"".to_string()))
    }

    fn keyword_insertion(&self, id: &str) -> (usize, String) {
        let text = if self.args_empty {
            format!("operation_id=\"{}\"", id)
        } else {
            format!(", operation_id=\"{}\"", id)
        };
        (self.insert_at, text)
    }

    /// Edit that makes `id` this route's effective ID.
    fn edit_for(&self, id: &str) -> (usize, usize, String) {
        match self.literal_span {
            Some((start, end)) => (start, end, format!("\"{}\"", id)),
            None => {
                let (at, text) = self.keyword_insertion(id);
                (at, at, text)
            }
        }
    }
}

/// All route decorators bound to `router_var`, in source order.
pub fn extract_routes(source: &str, router_var: &str) -> Vec<RouteDecorator> {
    match parser::parse_python(source) {
        Ok(tree) => extract_routes_from_tree(tree.root_node(), source, router_var),
        Err(_) => Vec::new(),
    }
}

pub(crate) fn extract_routes_from_tree(
    root: Node<'_>,
    source: &str,
    router_var: &str,
) -> Vec<RouteDecorator> {
    let mut routes = Vec::new();
    parser::walk_nodes(root, |node| {
        if node.kind() == "decorator" {
            if let Some(route) = route_from_decorator(node, source, router_var) {
                routes.push(route);
            }
        }
    });
    routes
}

fn route_from_decorator(decorator: Node<'_>, source: &str, router_var: &str) -> Option<RouteDecorator> {
    let call = decorator.named_child(0).filter(|n| n.kind() == "call")?;
    let function = call
        .child_by_field_name("function")
        .filter(|f| f.kind() == "attribute")?;
    let object = function.child_by_field_name("object")?;
    let method = function.child_by_field_name("attribute")?;
    let method = parser::node_text(&method, source);
    if parser::node_text(&object, source) != router_var || !ROUTE_METHODS.contains(&method) {
        return None;
    }

    let definition = decorator
        .parent()
        .filter(|p| p.kind() == "decorated_definition")
        .and_then(|p| p.child_by_field_name("definition"))
        .filter(|d| d.kind() == "function_definition")?;
    let function_name = definition
        .child_by_field_name("name")
        .map(|n| parser::node_text(&n, source).to_string())?;

    let args = call.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    let arguments: Vec<Node<'_>> = args
        .named_children(&mut cursor)
        .filter(|n| n.kind() != "comment")
        .collect();

    let mut path = None;
    let mut path_span = None;
    let mut operation_id = None;
    let mut literal_span = None;
    for arg in &arguments {
        match arg.kind() {
            "string" if path.is_none() => {
                path = Some(parser::string_value(arg, source));
                if is_plain_string(*arg, source) {
                    path_span = Some((arg.start_byte(), arg.end_byte()));
                }
            }
            "keyword_argument" => {
                let is_op_id = arg
                    .child_by_field_name("name")
                    .is_some_and(|n| parser::node_text(&n, source) == "operation_id");
                if !is_op_id {
                    continue;
                }
                let Some(value) = arg.child_by_field_name("value") else {
                    continue;
                };
                if is_plain_string(value, source) {
                    operation_id = Some(parser::string_value(&value, source));
                    literal_span = Some((value.start_byte(), value.end_byte()));
                } else {
                    operation_id = Some(parser::node_text(&value, source).to_string());
                }
            }
            _ => {}
        }
    }

    let (insert_at, args_empty) = match arguments.last() {
        Some(last) => (last.end_byte(), false),
        None => (args.start_byte() + 1, true),
    };

    Some(RouteDecorator {
        method: method.to_string(),
        path,
        operation_id,
        function_name,
        line: decorator.start_position().row + 1,
        decorator_start: decorator.start_byte(),
        insert_at,
        args_empty,
        literal_span,
        path_span,
    })
}

/// A string literal with no f-string interpolation and no escapes we
/// would have to interpret.
fn is_plain_string(node: Node<'_>, source: &str) -> bool {
    if node.kind() != "string" {
        return false;
    }
    let text = parser::node_text(&node, source);
    let prefix: String = text
        .chars()
        .take_while(|c| *c != '"' && *c != '\'')
        .collect();
    let mut cursor = node.walk();
    let interpolated = node
        .named_children(&mut cursor)
        .any(|c| c.kind() == "interpolation" || c.kind() == "escape_sequence");
    !prefix.to_ascii_lowercase().contains('f') && !interpolated
}

/// Effective IDs used more than once within one file, with their lines.
pub fn local_duplicates(routes: &[RouteDecorator]) -> BTreeMap<String, Vec<usize>> {
    let mut seen: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for route in routes {
        seen.entry(route.effective_id().to_string())
            .or_default()
            .push(route.line);
    }
    seen.retain(|_, lines| lines.len() > 1);
    seen
}

/// `base`, or `base_<n>` for the smallest n that is not taken. The
/// returned ID is recorded in `used`.
pub fn unique_id(base: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut n = 1;
    while used.contains(&candidate) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}

/// Splice edits (start, end, replacement) into `source`. Edits must not overlap.
pub(crate) fn apply_edits(source: &str, mut edits: Vec<(usize, usize, String)>) -> String {
    edits.sort_by(|a, b| b.0.cmp(&a.0));
    let mut out = source.to_string();
    for (start, end, text) in edits {
        out.replace_range(start..end, &text);
    }
    out
}

/// Injects explicit IDs into route decorators that lack one.
#[derive(Debug, Clone)]
pub struct OperationIdRepairer {
    router_var: String,
}

impl Default for OperationIdRepairer {
    fn default() -> Self {
        Self::new("router")
    }
}

impl OperationIdRepairer {
    pub fn new(router_var: impl Into<String>) -> Self {
        Self {
            router_var: router_var.into(),
        }
    }

    pub fn routes(&self, source: &str) -> Vec<RouteDecorator> {
        extract_routes(source, &self.router_var)
    }

    /// `used` holds every ID already taken elsewhere and receives the IDs
    /// assigned here.
    pub fn repair(&self, source: &str, used: &mut HashSet<String>) -> RepairResult {
        if !syntax::validate(source).is_valid {
            return RepairResult::unchanged(
                source,
                FixStatus::Skipped,
                "Module has syntax errors; fix syntax first",
            );
        }

        let routes = self.routes(source);
        used.extend(routes.iter().filter_map(|r| r.operation_id.clone()));
        let missing: Vec<&RouteDecorator> =
            routes.iter().filter(|r| r.operation_id.is_none()).collect();
        if missing.is_empty() {
            let message = if routes.is_empty() {
                "No route decorators"
            } else {
                "All routes have operation IDs"
            };
            return RepairResult::unchanged(source, FixStatus::NoIssues, message);
        }

        let mut edits = Vec::with_capacity(missing.len());
        let mut records = Vec::with_capacity(missing.len());
        for route in missing {
            let id = unique_id(&route.function_name, used);
            edits.push(route.edit_for(&id));
            records.push(FixRecord::whole_file(format!(
                "Added operation_id \"{}\" to {} at line {}",
                id, route.function_name, route.line
            )));
        }

        let updated = apply_edits(source, edits);
        if !syntax::validate(&updated).is_valid {
            return RepairResult::unchanged(
                source,
                FixStatus::Unfixable,
                "Injecting operation IDs would break the module",
            );
        }

        let message = format!("Added {} operation ID(s)", records.len());
        RepairResult::fixed(updated, records, message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  CROSS-MODULE DUPLICATES
// ═══════════════════════════════════════════════════════════════════════════

/// One module's routes, snapshotted for a cross-module pass.
#[derive(Debug, Clone)]
pub struct RouteFile {
    pub module: String,
    pub path: PathBuf,
    pub source: String,
    pub routes: Vec<RouteDecorator>,
    /// False for excluded modules: their IDs count but are never rewritten
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictLocation {
    pub module: String,
    pub filepath: PathBuf,
    pub function_name: String,
    pub line_number: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationIdChange {
    pub module: String,
    pub function_name: String,
    pub line: usize,
    pub old_id: String,
    pub new_id: String,
    /// The old ID was an explicit argument rather than the function name
    pub explicit: bool,
    #[serde(skip)]
    route_index: usize,
}

/// IDs already taken across the module set. Writable modules contribute
/// their explicit IDs; read-only modules contribute every effective ID.
pub fn seed_used_ids(files: &[RouteFile]) -> HashSet<String> {
    let mut used = HashSet::new();
    for file in files {
        for route in &file.routes {
            if !file.writable {
                used.insert(route.effective_id().to_string());
            } else if let Some(id) = &route.operation_id {
                used.insert(id.clone());
            }
        }
    }
    used
}

/// Effective IDs shared by more than one route, across all files.
pub fn find_duplicates(files: &[RouteFile]) -> BTreeMap<String, Vec<ConflictLocation>> {
    let mut by_id: BTreeMap<String, Vec<ConflictLocation>> = BTreeMap::new();
    for file in files {
        for route in &file.routes {
            by_id
                .entry(route.effective_id().to_string())
                .or_default()
                .push(ConflictLocation {
                    module: file.module.clone(),
                    filepath: file.path.clone(),
                    function_name: route.function_name.clone(),
                    line_number: route.line,
                });
        }
    }
    by_id.retain(|_, locations| locations.len() > 1);
    by_id
}

/// Plan renames so every effective ID is unique.
///
/// Within a group of routes sharing an ID, the first occurrence (file
/// order, then line) keeps it, unless a read-only route is in the group,
/// in which case that route keeps it. Every other rewritable route is
/// renamed to `<module>_<function>` plus a numeric suffix when needed.
pub fn plan_duplicate_remaps(files: &[RouteFile]) -> Vec<OperationIdChange> {
    let mut taken: HashSet<String> = files
        .iter()
        .flat_map(|f| f.routes.iter().map(|r| r.effective_id().to_string()))
        .collect();

    let mut groups: BTreeMap<&str, Vec<(usize, usize)>> = BTreeMap::new();
    for (file_idx, file) in files.iter().enumerate() {
        for (route_idx, route) in file.routes.iter().enumerate() {
            groups
                .entry(route.effective_id())
                .or_default()
                .push((file_idx, route_idx));
        }
    }

    let mut changes = Vec::new();
    for members in groups.values().filter(|m| m.len() > 1) {
        let keeper = members
            .iter()
            .position(|(f, r)| !files[*f].writable || !files[*f].routes[*r].is_rewritable())
            .unwrap_or(0);
        for (pos, (file_idx, route_idx)) in members.iter().enumerate() {
            let file = &files[*file_idx];
            let route = &file.routes[*route_idx];
            if pos == keeper || !file.writable || !route.is_rewritable() {
                continue;
            }
            let base = format!("{}_{}", file.module, route.function_name);
            let new_id = unique_id(&base, &mut taken);
            changes.push(OperationIdChange {
                module: file.module.clone(),
                function_name: route.function_name.clone(),
                line: route.line,
                old_id: route.effective_id().to_string(),
                new_id,
                explicit: route.operation_id.is_some(),
                route_index: *route_idx,
            });
        }
    }
    changes
}

/// Rewrite one file's source with the changes planned for it.
pub fn apply_remaps(file: &RouteFile, changes: &[&OperationIdChange]) -> String {
    let edits = changes
        .iter()
        .filter_map(|change| {
            file.routes
                .get(change.route_index)
                .map(|route| route.edit_for(&change.new_id))
        })
        .collect();
    apply_edits(&file.source, edits)
}
