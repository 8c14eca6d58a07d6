//! Unterminated string literal repair
//!
//! Iterative: every accepted edit is re-validated and the next round
//! starts from wherever the validator points now. A candidate edit is kept
//! only if the file validates afterwards or the remaining unterminated
//! string sits further down the file.
//!
//! The validator here blames the line a literal opens on, but callers may
//! pass a line from elsewhere: interpreter tracebacks often point one line
//! past the opening quote. That is what the neighbour pass covers.

use super::quotes::{analyze_line, has_odd_quotes, QuoteKind};
use super::{FixRecord, FixStatus, RepairResult};
use crate::syntax::{self, ValidationResult};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

const EOF_CLOSERS: [&str; 3] = ["\"\"\"", "'''", "\"\"\"\n'''"];

#[derive(Debug, Clone, Copy)]
pub struct StringLiteralRepairer {
    max_iterations: usize,
}

impl Default for StringLiteralRepairer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

struct Candidate {
    source: String,
    record: FixRecord,
}

impl StringLiteralRepairer {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
        }
    }

    /// Repair unterminated strings starting from the 1-based `reported_line`.
    pub fn repair(&self, source: &str, reported_line: usize) -> RepairResult {
        let initial = syntax::validate(source);
        if initial.is_valid {
            return RepairResult::unchanged(source, FixStatus::NoIssues, "No syntax errors");
        }

        let line_count = split_lines(source).len();
        if reported_line == 0 || reported_line > line_count {
            return RepairResult::unchanged(
                source,
                FixStatus::Error,
                format!(
                    "Invalid error line {} (file has {} lines)",
                    reported_line, line_count
                ),
            );
        }

        if !initial.is_unterminated_string() {
            return RepairResult::unchanged(
                source,
                FixStatus::Unfixable,
                format!("Not an unterminated string: {}", describe(&initial)),
            );
        }

        let mut current = source.to_string();
        let mut line = reported_line;
        let mut records = Vec::new();

        for _ in 0..self.max_iterations {
            let Some(candidate) = self.next_candidate(&current, line) else {
                return RepairResult::unchanged(
                    source,
                    FixStatus::Unfixable,
                    format!("No quote fix resolves the string opened at line {}", line),
                );
            };
            current = candidate.source;
            records.push(candidate.record);

            let check = syntax::validate(&current);
            if check.is_valid {
                let message = format!("Fixed {} unterminated string(s)", records.len());
                return RepairResult::fixed(current, records, message);
            }
            match check.error_line() {
                Some(next) if check.is_unterminated_string() => line = next,
                _ => {
                    return RepairResult::unchanged(
                        source,
                        FixStatus::Unfixable,
                        format!("Remaining error is not a string literal: {}", describe(&check)),
                    )
                }
            }
        }

        RepairResult::unchanged(
            source,
            FixStatus::Unfixable,
            format!(
                "Still invalid after {} repair attempts: {}",
                self.max_iterations,
                describe(&syntax::validate(&current))
            ),
        )
    }

    /// First edit that makes progress on the string opened at `line`.
    fn next_candidate(&self, source: &str, line: usize) -> Option<Candidate> {
        let lines = split_lines(source);

        // 1. close the string on the blamed line
        if let Some(candidate) = lines
            .get(line - 1)
            .and_then(|text| analyze_line(text).quote_kind)
            .and_then(|kind| close_on_line(source, line, kind))
        {
            if makes_progress(&candidate.source, line) {
                return Some(candidate);
            }
        }

        // 2. the real culprit is often a neighbour
        let neighbours = [line.checked_sub(1), Some(line + 1)];
        for n in neighbours.into_iter().flatten() {
            if n == 0 || n > lines.len() || !has_odd_quotes(lines[n - 1]) {
                continue;
            }
            let Some(kind) = analyze_line(lines[n - 1]).quote_kind else {
                continue;
            };
            if let Some(candidate) = close_on_line(source, n, kind) {
                if makes_progress(&candidate.source, line) {
                    return Some(candidate);
                }
            }
        }

        // 3. last resort: close whatever is still open at end of file
        EOF_CLOSERS
            .iter()
            .map(|closer| close_at_eof(source, closer))
            .find(|candidate| makes_progress(&candidate.source, line))
    }
}

fn makes_progress(candidate: &str, line: usize) -> bool {
    let check = syntax::validate(candidate);
    check.is_valid
        || (check.is_unterminated_string() && check.error_line().is_some_and(|l| l > line))
}

fn describe(result: &ValidationResult) -> String {
    result
        .error
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "valid".to_string())
}

/// Line bodies without their terminators.
fn split_lines(source: &str) -> Vec<&str> {
    source
        .split_inclusive('\n')
        .map(|segment| segment.trim_end_matches(|c| c == '\n' || c == '\r'))
        .collect()
}

fn close_on_line(source: &str, line: usize, kind: QuoteKind) -> Option<Candidate> {
    let mut out = String::with_capacity(source.len() + 3);
    let mut record = None;
    for (idx, segment) in source.split_inclusive('\n').enumerate() {
        if idx + 1 != line {
            out.push_str(segment);
            continue;
        }
        let body = segment.trim_end_matches(|c| c == '\n' || c == '\r');
        let ending = &segment[body.len()..];
        let after = format!("{}{}", body, kind.as_str());
        out.push_str(&after);
        out.push_str(ending);
        record = Some(FixRecord::line(
            format!("Fixed unterminated string at line {}", line),
            line,
            body,
            &after,
        ));
    }
    record.map(|record| Candidate {
        source: out,
        record,
    })
}

fn close_at_eof(source: &str, closer: &str) -> Candidate {
    let mut out = source.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(closer);
    out.push('\n');
    Candidate {
        source: out,
        record: FixRecord::whole_file("Closed unterminated string at end of file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repair::FixChange;

    #[test]
    fn test_closes_single_quote_on_line() {
        let result = StringLiteralRepairer::default().repair("x = 'abc\n", 1);
        assert_eq!(result.status, FixStatus::Fixed);
        assert!(result.applied);
        assert_eq!(result.new_source, "x = 'abc'\n");
        assert_eq!(result.fixes(), vec!["Fixed unterminated string at line 1"]);
    }

    #[test]
    fn test_luxury_home_description() {
        let src = "description = \"Luxury home\n";
        let result = StringLiteralRepairer::default().repair(src, 1);
        assert_eq!(result.status, FixStatus::Fixed);
        assert_eq!(result.new_source, "description = \"Luxury home\"\n");
        match &result.records[0].change {
            FixChange::Line { line, before, after } => {
                assert_eq!(*line, 1);
                assert_eq!(before, "description = \"Luxury home");
                assert_eq!(after, "description = \"Luxury home\"");
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn test_valid_source_reports_no_issues() {
        let src = "x = 'abc'\n";
        let result = StringLiteralRepairer::default().repair(src, 1);
        assert_eq!(result.status, FixStatus::NoIssues);
        assert!(!result.applied);
        assert_eq!(result.new_source, src);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let repairer = StringLiteralRepairer::default();
        let first = repairer.repair("x = 'abc\n", 1);
        let second = repairer.repair(&first.new_source, 1);
        assert_eq!(second.status, FixStatus::NoIssues);
        assert_eq!(second.new_source, first.new_source);
    }

    #[test]
    fn test_multiple_unterminated_strings() {
        let src = "a = 'x\nb = \"y\n";
        let result = StringLiteralRepairer::default().repair(src, 1);
        assert_eq!(result.status, FixStatus::Fixed);
        assert_eq!(result.new_source, "a = 'x'\nb = \"y\"\n");
        assert_eq!(
            result.fixes(),
            vec![
                "Fixed unterminated string at line 1",
                "Fixed unterminated string at line 2"
            ]
        );
    }

    #[test]
    fn test_iteration_cap_returns_original() {
        let src = "a = 'x\nb = \"y\n";
        let result = StringLiteralRepairer::new(1).repair(src, 1);
        assert_eq!(result.status, FixStatus::Unfixable);
        assert!(!result.applied);
        assert_eq!(result.new_source, src);
    }

    #[test]
    fn test_neighbour_line_fixed_when_report_is_one_line_late() {
        let src = "x = 1\ny = 'abc\nz = 2\n";
        let result = StringLiteralRepairer::default().repair(src, 3);
        assert_eq!(result.status, FixStatus::Fixed);
        assert_eq!(result.new_source, "x = 1\ny = 'abc'\nz = 2\n");
        assert_eq!(result.fixes(), vec!["Fixed unterminated string at line 2"]);
    }

    #[test]
    fn test_neighbour_line_fixed_when_report_is_one_line_early() {
        let src = "x = 1\ny = \"abc\n";
        let result = StringLiteralRepairer::default().repair(src, 1);
        assert_eq!(result.status, FixStatus::Fixed);
        assert_eq!(result.new_source, "x = 1\ny = \"abc\"\n");
        assert_eq!(result.fixes(), vec!["Fixed unterminated string at line 2"]);
    }

    #[test]
    fn test_mixed_odd_quotes_without_usable_neighbour_is_unfixable() {
        let src = "x = \"it's\ny = 1\n";
        let result = StringLiteralRepairer::default().repair(src, 1);
        assert_eq!(result.status, FixStatus::Unfixable);
        assert_eq!(result.new_source, src);
    }

    #[test]
    fn test_open_docstring_closed_at_end_of_file() {
        let src = "x = 1\ns = \"\"\"abc\nmore text\n";
        let result = StringLiteralRepairer::default().repair(src, 2);
        assert_eq!(result.status, FixStatus::Fixed);
        assert!(syntax::validate(&result.new_source).is_valid);
        assert_eq!(
            result.fixes(),
            vec!["Closed unterminated string at end of file"]
        );
    }

    #[test]
    fn test_generic_syntax_error_is_unfixable() {
        let src = "def f(:\n    pass\n";
        let result = StringLiteralRepairer::default().repair(src, 1);
        assert_eq!(result.status, FixStatus::Unfixable);
        assert_eq!(result.new_source, src);
    }

    #[test]
    fn test_out_of_range_line_is_error() {
        let result = StringLiteralRepairer::default().repair("x = 'abc\n", 7);
        assert_eq!(result.status, FixStatus::Error);
        assert!(!result.applied);
    }

    #[test]
    fn test_crlf_line_endings_are_preserved() {
        let result = StringLiteralRepairer::default().repair("x = 'abc\r\ny = 1\r\n", 1);
        assert_eq!(result.status, FixStatus::Fixed);
        assert_eq!(result.new_source, "x = 'abc'\r\ny = 1\r\n");
    }
}
