//! Repair engines
//!
//! Each repairer is a pure function from source text to a `RepairResult`.
//! None of them touch the filesystem; the orchestrator decides whether a
//! result is persisted.

pub mod operation_id;
pub mod quotes;
pub mod router;
pub mod strings;

use crate::syntax::{self, SyntaxErrorKind, SyntaxIssue};
use serde::{Deserialize, Serialize};

pub use operation_id::OperationIdRepairer;
pub use router::{RouterDefinitionRepairer, RouterSettings};
pub use strings::StringLiteralRepairer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    SyntaxError,
    UnterminatedString,
    MissingRouterImport,
    MissingRouterDefinition,
    EmptyRoutePath,
    DuplicateOperationId,
    MissingOperationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
}

impl Issue {
    pub fn from_syntax(issue: &SyntaxIssue) -> Self {
        let kind = match issue.kind {
            SyntaxErrorKind::UnterminatedString => IssueKind::UnterminatedString,
            SyntaxErrorKind::SyntaxError => IssueKind::SyntaxError,
        };
        Self {
            kind,
            line: Some(issue.line),
            message: issue.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FixChange {
    Line {
        line: usize,
        before: String,
        after: String,
    },
    WholeFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRecord {
    pub description: String,
    pub change: FixChange,
}

impl FixRecord {
    pub fn line(description: impl Into<String>, line: usize, before: &str, after: &str) -> Self {
        Self {
            description: description.into(),
            change: FixChange::Line {
                line,
                before: before.to_string(),
                after: after.to_string(),
            },
        }
    }

    pub fn whole_file(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            change: FixChange::WholeFile,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Fixed,
    NoIssues,
    Unfixable,
    Error,
    Skipped,
}

impl FixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixStatus::Fixed => "fixed",
            FixStatus::NoIssues => "no_issues",
            FixStatus::Unfixable => "unfixable",
            FixStatus::Error => "error",
            FixStatus::Skipped => "skipped",
        }
    }
}

/// Outcome of one repairer run over one source text.
///
/// `new_source` equals the input whenever `applied` is false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairResult {
    pub new_source: String,
    pub applied: bool,
    pub status: FixStatus,
    pub records: Vec<FixRecord>,
    pub message: String,
}

impl RepairResult {
    pub fn unchanged(source: &str, status: FixStatus, message: impl Into<String>) -> Self {
        Self {
            new_source: source.to_string(),
            applied: false,
            status,
            records: Vec::new(),
            message: message.into(),
        }
    }

    pub fn fixed(new_source: String, records: Vec<FixRecord>, message: impl Into<String>) -> Self {
        Self {
            new_source,
            applied: true,
            status: FixStatus::Fixed,
            records,
            message: message.into(),
        }
    }

    pub fn fixes(&self) -> Vec<String> {
        self.records.iter().map(|r| r.description.clone()).collect()
    }
}

/// Everything wrong with a module, without changing it.
///
/// Router and operation-id checks need a parse tree, so they only run on
/// sources that validate.
pub fn detect_issues(source: &str, settings: &RouterSettings) -> Vec<Issue> {
    let validation = syntax::validate(source);
    if let Some(err) = validation.error.as_ref() {
        return vec![Issue::from_syntax(err)];
    }

    let mut issues = Vec::new();
    let inspection = router::inspect(source, settings);
    if inspection.has_route_decorators {
        if !inspection.has_router_import {
            issues.push(Issue {
                kind: IssueKind::MissingRouterImport,
                line: None,
                message: format!(
                    "{} is used but not imported from {}",
                    settings.class_name, settings.framework
                ),
            });
        }
        if !inspection.has_router_definition {
            issues.push(Issue {
                kind: IssueKind::MissingRouterDefinition,
                line: None,
                message: format!(
                    "Route decorators found but `{} = {}(...)` is never defined",
                    settings.variable, settings.class_name
                ),
            });
        }
    }

    let routes = operation_id::extract_routes(source, &settings.variable);
    for route in routes.iter().filter(|r| r.has_empty_path()) {
        issues.push(Issue {
            kind: IssueKind::EmptyRoutePath,
            line: Some(route.line),
            message: "Empty path in router decorator".to_string(),
        });
    }
    for route in routes.iter().filter(|r| r.operation_id.is_none()) {
        issues.push(Issue {
            kind: IssueKind::MissingOperationId,
            line: Some(route.line),
            message: format!("Route handler `{}` has no operation_id", route.function_name),
        });
    }
    for (id, lines) in operation_id::local_duplicates(&routes) {
        issues.push(Issue {
            kind: IssueKind::DuplicateOperationId,
            line: None,
            message: format!(
                "operation_id \"{}\" is used {} times (lines {})",
                id,
                lines.len(),
                lines
                    .iter()
                    .map(|l| l.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        });
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_unterminated_string() {
        let issues = detect_issues("x = 'abc\n", &RouterSettings::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::UnterminatedString);
        assert_eq!(issues[0].line, Some(1));
    }

    #[test]
    fn test_detect_router_and_operation_id_issues() {
        let src = "@router.get(\"/a\")\ndef list_items():\n    return []\n";
        let kinds: Vec<IssueKind> = detect_issues(src, &RouterSettings::default())
            .into_iter()
            .map(|i| i.kind)
            .collect();
        assert!(kinds.contains(&IssueKind::MissingRouterImport));
        assert!(kinds.contains(&IssueKind::MissingRouterDefinition));
        assert!(kinds.contains(&IssueKind::MissingOperationId));
    }

    #[test]
    fn test_clean_module_has_no_issues() {
        let src = "from fastapi import APIRouter\n\nrouter = APIRouter()\n\n@router.get(\"/a\", operation_id=\"list_items\")\ndef list_items():\n    return []\n";
        assert!(detect_issues(src, &RouterSettings::default()).is_empty());
    }

    #[test]
    fn test_detect_empty_route_path() {
        let src = "from fastapi import APIRouter\nrouter = APIRouter()\n\n@router.get(\"\", operation_id=\"index\")\ndef index():\n    return []\n";
        let issues = detect_issues(src, &RouterSettings::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::EmptyRoutePath);
        assert_eq!(issues[0].line, Some(4));
        assert_eq!(issues[0].message, "Empty path in router decorator");
    }

    #[test]
    fn test_duplicate_operation_id_is_file_scoped() {
        let src = "from fastapi import APIRouter\nrouter = APIRouter()\n\n@router.get(\"/a\", operation_id=\"same\")\ndef a():\n    pass\n\n@router.get(\"/b\", operation_id=\"same\")\ndef b():\n    pass\n";
        let issues = detect_issues(src, &RouterSettings::default());
        let dup = issues
            .iter()
            .find(|i| i.kind == IssueKind::DuplicateOperationId)
            .unwrap();
        assert_eq!(dup.line, None);
    }
}
