//! Router import and definition repair
//!
//! A module that declares `@router.get(...)` style handlers needs both
//! the router class imported and `router = APIRouter()` defined before
//! the first handler. Missing pieces are inserted after the module's
//! leading imports.

use super::operation_id;
use super::{FixRecord, FixStatus, RepairResult};
use crate::syntax::{self, parser};
use serde::{Deserialize, Serialize};
use tree_sitter::Node;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// Module the router class is imported from
    pub framework: String,
    pub class_name: String,
    /// Name the module binds its router to
    pub variable: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            framework: "fastapi".to_string(),
            class_name: "APIRouter".to_string(),
            variable: "router".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterInspection {
    pub has_router_import: bool,
    pub has_router_definition: bool,
    pub has_route_decorators: bool,
    /// 1-based lines of route decorators whose path is `""`
    pub empty_route_paths: Vec<usize>,
    /// Byte offset just past the last imported name of a
    /// `from <framework> import ...` statement
    #[serde(skip)]
    framework_import_end: Option<usize>,
    /// 0-based row where the leading import block ends
    #[serde(skip)]
    last_import_row: Option<usize>,
    #[serde(skip)]
    docstring_row: Option<usize>,
}

/// Inspect a module for router pieces. Sources that fail to parse
/// report everything as absent.
pub fn inspect(source: &str, settings: &RouterSettings) -> RouterInspection {
    let mut inspection = RouterInspection::default();
    let Ok(tree) = parser::parse_python(source) else {
        return inspection;
    };
    let root = tree.root_node();

    let routes = operation_id::extract_routes_from_tree(root, source, &settings.variable);
    let first_route_byte = routes.first().map(|route| route.decorator_start);
    inspection.has_route_decorators = first_route_byte.is_some();
    inspection.empty_route_paths = routes
        .iter()
        .filter(|route| route.has_empty_path())
        .map(|route| route.line)
        .collect();

    let mut cursor = root.walk();
    for (idx, child) in root.named_children(&mut cursor).enumerate() {
        match child.kind() {
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                if first_route_byte.map_or(true, |b| child.start_byte() < b) {
                    inspection.last_import_row = Some(child.end_position().row);
                }
                if child.kind() == "import_from_statement" {
                    inspect_from_import(child, source, settings, &mut inspection);
                } else if child.kind() == "import_statement" {
                    let mut names = child.walk();
                    if child
                        .children_by_field_name("name", &mut names)
                        .any(|n| parser::node_text(&n, source) == settings.framework)
                    {
                        inspection.has_router_import = true;
                    }
                }
            }
            "expression_statement" => {
                if idx == 0 && is_docstring(child) {
                    inspection.docstring_row = Some(child.end_position().row);
                }
                if defines_router(child, source, settings) {
                    inspection.has_router_definition = true;
                }
            }
            _ => {}
        }
    }

    inspection
}

fn inspect_from_import(
    node: Node<'_>,
    source: &str,
    settings: &RouterSettings,
    inspection: &mut RouterInspection,
) {
    let Some(module) = node.child_by_field_name("module_name") else {
        return;
    };
    let module_name = parser::node_text(&module, source);
    let from_framework = module_name == settings.framework
        || module_name.starts_with(&format!("{}.", settings.framework));
    if !from_framework {
        return;
    }

    let mut cursor = node.walk();
    let mut last_name_end = None;
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "wildcard_import" => inspection.has_router_import = true,
            "dotted_name" | "aliased_import" if child.id() != module.id() => {
                let imported = match child.child_by_field_name("name") {
                    Some(name) if child.kind() == "aliased_import" => parser::node_text(&name, source),
                    _ => parser::node_text(&child, source),
                };
                if imported == settings.class_name {
                    inspection.has_router_import = true;
                }
                last_name_end = Some(child.end_byte());
            }
            _ => {}
        }
    }

    if module_name == settings.framework && inspection.framework_import_end.is_none() {
        inspection.framework_import_end = last_name_end;
    }
}

fn is_docstring(node: Node<'_>) -> bool {
    node.named_child_count() == 1
        && node
            .named_child(0)
            .is_some_and(|c| c.kind() == "string" || c.kind() == "concatenated_string")
}

fn defines_router(statement: Node<'_>, source: &str, settings: &RouterSettings) -> bool {
    let Some(assignment) = statement.named_child(0).filter(|n| n.kind() == "assignment") else {
        return false;
    };
    let target_matches = assignment
        .child_by_field_name("left")
        .is_some_and(|left| parser::node_text(&left, source) == settings.variable);
    let Some(call) = assignment
        .child_by_field_name("right")
        .filter(|right| right.kind() == "call")
    else {
        return false;
    };
    let callee = call
        .child_by_field_name("function")
        .map(|f| match f.kind() {
            "attribute" => f
                .child_by_field_name("attribute")
                .map(|a| parser::node_text(&a, source))
                .unwrap_or(""),
            _ => parser::node_text(&f, source),
        })
        .unwrap_or("");
    target_matches && callee == settings.class_name
}

#[derive(Debug, Clone, Default)]
pub struct RouterDefinitionRepairer {
    settings: RouterSettings,
}

impl RouterDefinitionRepairer {
    pub fn new(settings: RouterSettings) -> Self {
        Self { settings }
    }

    pub fn inspect(&self, source: &str) -> RouterInspection {
        inspect(source, &self.settings)
    }

    pub fn repair(&self, source: &str) -> RepairResult {
        if !syntax::validate(source).is_valid {
            return RepairResult::unchanged(
                source,
                FixStatus::Skipped,
                "Module has syntax errors; fix syntax first",
            );
        }

        let initial = self.inspect(source);
        if !initial.has_route_decorators {
            return RepairResult::unchanged(source, FixStatus::NoIssues, "No route decorators");
        }
        if initial.has_router_import
            && initial.has_router_definition
            && initial.empty_route_paths.is_empty()
        {
            return RepairResult::unchanged(
                source,
                FixStatus::NoIssues,
                "Router already imported and defined",
            );
        }

        let mut current = source.to_string();
        let mut records = Vec::new();
        let class = &self.settings.class_name;

        if !initial.empty_route_paths.is_empty() {
            let edits = operation_id::extract_routes(source, &self.settings.variable)
                .iter()
                .filter_map(|route| route.root_path_edit())
                .collect();
            current = operation_id::apply_edits(source, edits);
            records.extend(initial.empty_route_paths.iter().map(|line| {
                FixRecord::whole_file(format!(
                    "Fixed empty path in router decorator at line {}",
                    line
                ))
            }));
        }

        // path edits shift byte offsets
        let before = self.inspect(&current);

        if !before.has_router_import {
            match before.framework_import_end {
                Some(end) => {
                    current.insert_str(end, &format!(", {}", class));
                    records.push(FixRecord::whole_file(format!(
                        "Added {} to {} import",
                        class, self.settings.framework
                    )));
                }
                None => {
                    let line = format!("from {} import {}\n", self.settings.framework, class);
                    let after = before.last_import_row.or(before.docstring_row);
                    current = insert_line_after(&current, after, &line);
                    records.push(FixRecord::whole_file(format!("Added {} import", class)));
                }
            }
        }

        if !before.has_router_definition {
            let after_import = self.inspect(&current);
            let definition = format!("\n{} = {}()\n", self.settings.variable, class);
            let after = after_import.last_import_row.or(after_import.docstring_row);
            current = insert_line_after(&current, after, &definition);
            records.push(FixRecord::whole_file(format!(
                "Added {} = {}() definition",
                self.settings.variable, class
            )));
        }

        let check = syntax::validate(&current);
        if !check.is_valid {
            return RepairResult::unchanged(
                source,
                FixStatus::Unfixable,
                format!(
                    "Router fix would break the module: {}",
                    check.error.map(|e| e.to_string()).unwrap_or_default()
                ),
            );
        }

        let message = format!("Applied {} router fix(es)", records.len());
        RepairResult::fixed(current, records, message)
    }
}

/// Insert `text` after 0-based `row`, or at the top of the file.
fn insert_line_after(source: &str, row: Option<usize>, text: &str) -> String {
    let Some(row) = row else {
        return format!("{}{}", text, source);
    };
    let mut out = String::with_capacity(source.len() + text.len() + 1);
    let mut inserted = false;
    for (idx, segment) in source.split_inclusive('\n').enumerate() {
        out.push_str(segment);
        if idx == row {
            if !segment.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(text);
            inserted = true;
        }
    }
    if !inserted {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repairer() -> RouterDefinitionRepairer {
        RouterDefinitionRepairer::new(RouterSettings::default())
    }

    const HANDLER: &str = "@router.get(\"/items\")\ndef list_items():\n    return []\n";

    #[test]
    fn test_inserts_import_and_definition_at_top() {
        let result = repairer().repair(HANDLER);
        assert_eq!(result.status, FixStatus::Fixed);
        assert!(result
            .new_source
            .starts_with("from fastapi import APIRouter\n\nrouter = APIRouter()\n"));
        let after = repairer().inspect(&result.new_source);
        assert!(after.has_router_import && after.has_router_definition);
    }

    #[test]
    fn test_merges_into_existing_fastapi_import() {
        let src = format!("from fastapi import HTTPException\nimport os\n\n{}", HANDLER);
        let result = repairer().repair(&src);
        assert_eq!(result.status, FixStatus::Fixed);
        assert!(result
            .new_source
            .starts_with("from fastapi import HTTPException, APIRouter\nimport os\n\nrouter = APIRouter()\n"));
        assert_eq!(
            result.fixes(),
            vec![
                "Added APIRouter to fastapi import",
                "Added router = APIRouter() definition"
            ]
        );
    }

    #[test]
    fn test_definition_only_when_import_present() {
        let src = format!("from fastapi import APIRouter\n\n{}", HANDLER);
        let result = repairer().repair(&src);
        assert_eq!(result.status, FixStatus::Fixed);
        assert_eq!(result.records.len(), 1);
        assert!(result.new_source.contains("router = APIRouter()"));
        assert!(syntax::validate(&result.new_source).is_valid);
    }

    #[test]
    fn test_inserts_after_module_docstring() {
        let src = format!("\"\"\"Listings API.\"\"\"\n{}", HANDLER);
        let result = repairer().repair(&src);
        assert!(result
            .new_source
            .starts_with("\"\"\"Listings API.\"\"\"\nfrom fastapi import APIRouter\n"));
    }

    #[test]
    fn test_module_without_routes_is_untouched() {
        let src = "import os\n\ndef helper():\n    return os.sep\n";
        let result = repairer().repair(src);
        assert_eq!(result.status, FixStatus::NoIssues);
        assert_eq!(result.new_source, src);
    }

    #[test]
    fn test_complete_module_is_untouched() {
        let src = format!("from fastapi import APIRouter\n\nrouter = APIRouter(prefix=\"/x\")\n\n{}", HANDLER);
        let result = repairer().repair(&src);
        assert_eq!(result.status, FixStatus::NoIssues);
        assert!(!result.applied);
    }

    #[test]
    fn test_invalid_module_is_skipped() {
        let src = format!("x = 'abc\n{}", HANDLER);
        assert_eq!(repairer().repair(&src).status, FixStatus::Skipped);
    }

    #[test]
    fn test_empty_route_path_becomes_root() {
        let src = "from fastapi import APIRouter\n\nrouter = APIRouter()\n\n@router.get(\"\")\ndef index():\n    return []\n\n@router.post('', status_code=201)\ndef create():\n    return {}\n";
        let before = repairer().inspect(src);
        assert_eq!(before.empty_route_paths, vec![5, 9]);

        let result = repairer().repair(src);
        assert_eq!(result.status, FixStatus::Fixed);
        assert!(result.new_source.contains("@router.get(\"/\")\ndef index():"));
        assert!(result.new_source.contains("@router.post(\"/\", status_code=201)"));
        assert_eq!(
            result.fixes(),
            vec![
                "Fixed empty path in router decorator at line 5",
                "Fixed empty path in router decorator at line 9"
            ]
        );
        assert!(repairer().inspect(&result.new_source).empty_route_paths.is_empty());
        assert_eq!(repairer().repair(&result.new_source).status, FixStatus::NoIssues);
    }

    #[test]
    fn test_empty_path_and_missing_router_fixed_together() {
        let src = "import os\n\n@router.get(\"\")\ndef index():\n    return os.sep\n";
        let result = repairer().repair(src);
        assert_eq!(result.status, FixStatus::Fixed);
        assert_eq!(
            result.new_source,
            "import os\nfrom fastapi import APIRouter\n\nrouter = APIRouter()\n\n@router.get(\"/\")\ndef index():\n    return os.sep\n"
        );
        assert_eq!(result.records.len(), 3);
    }

    #[test]
    fn test_router_fix_is_idempotent() {
        let first = repairer().repair(HANDLER);
        let second = repairer().repair(&first.new_source);
        assert_eq!(second.status, FixStatus::NoIssues);
    }
}
