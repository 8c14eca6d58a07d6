//! Syntax validation for Python modules
//!
//! Three stages, in the order the Python front end runs them: a literal
//! scan that catches unterminated strings (and blames the line where the
//! literal opens), a tree-sitter parse, then the checks CPython makes
//! while compiling a parsed module.

pub mod compile;
pub mod lexer;
pub mod parser;

use crate::error::{MendError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntaxErrorKind {
    UnterminatedString,
    SyntaxError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxIssue {
    pub kind: SyntaxErrorKind,
    /// 1-based line the parser blamed
    pub line: usize,
    pub column: Option<usize>,
    pub message: String,
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<SyntaxIssue>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    pub fn invalid(issue: SyntaxIssue) -> Self {
        Self {
            is_valid: false,
            error: Some(issue),
        }
    }

    pub fn is_unterminated_string(&self) -> bool {
        matches!(
            self.error,
            Some(SyntaxIssue {
                kind: SyntaxErrorKind::UnterminatedString,
                ..
            })
        )
    }

    pub fn error_line(&self) -> Option<usize> {
        self.error.as_ref().map(|e| e.line)
    }
}

/// Check whether `source` would get past the Python compiler's front end.
pub fn validate(source: &str) -> ValidationResult {
    if source.trim().is_empty() {
        return ValidationResult::valid();
    }

    if let Some(open) = lexer::find_unterminated_string(source) {
        let message = if open.triple {
            let last_line = source.lines().count().max(open.line);
            format!(
                "unterminated triple-quoted string literal (detected at line {})",
                last_line
            )
        } else {
            format!(
                "unterminated string literal (detected at line {})",
                open.line
            )
        };
        return ValidationResult::invalid(SyntaxIssue {
            kind: SyntaxErrorKind::UnterminatedString,
            line: open.line,
            column: Some(open.column),
            message,
        });
    }

    let tree = match parser::parse_python(source) {
        Ok(tree) => tree,
        Err(err) => {
            return ValidationResult::invalid(SyntaxIssue {
                kind: SyntaxErrorKind::SyntaxError,
                line: 1,
                column: None,
                message: err.to_string(),
            })
        }
    };

    let failure = parser::first_error(&tree, source)
        .or_else(|| compile::first_violation(&tree, source));
    match failure {
        None => ValidationResult::valid(),
        Some(failure) => ValidationResult::invalid(SyntaxIssue {
            kind: SyntaxErrorKind::SyntaxError,
            line: failure.line,
            column: Some(failure.column),
            message: failure.message,
        }),
    }
}

/// Decode raw file bytes and validate them.
///
/// Non-UTF-8 content is an error for the caller to report against the
/// module, not a panic.
pub fn validate_bytes(path: &Path, bytes: Vec<u8>) -> Result<(String, ValidationResult)> {
    let source = String::from_utf8(bytes).map_err(|source| MendError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let result = validate(&source);
    Ok((source, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source_is_valid() {
        assert!(validate("").is_valid);
        assert!(validate("\n\n   \n").is_valid);
    }

    #[test]
    fn test_unterminated_string_is_classified() {
        let result = validate("description = \"Luxury home\n");
        assert!(!result.is_valid);
        assert!(result.is_unterminated_string());
        assert_eq!(result.error_line(), Some(1));
        assert_eq!(
            result.error.unwrap().message,
            "unterminated string literal (detected at line 1)"
        );
    }

    #[test]
    fn test_generic_syntax_error() {
        let result = validate("def f(:\n    pass\n");
        assert!(!result.is_valid);
        assert!(!result.is_unterminated_string());
    }

    #[test]
    fn test_sources_that_parse_but_do_not_compile() {
        for src in [
            "print \"hello\"\n",
            "exec \"x = 1\"\n",
            "def f(**k, *a):\n    pass\n",
            "router.get(path=\"/\", path=\"/x\")\n",
            "return None\n",
        ] {
            let result = validate(src);
            assert!(!result.is_valid, "{:?} should be rejected", src);
            assert!(!result.is_unterminated_string());
            assert_eq!(result.error_line(), Some(1));
        }
    }

    #[test]
    fn test_validation_is_deterministic() {
        let src = "x = 'abc\n";
        assert_eq!(validate(src), validate(src));
    }

    #[test]
    fn test_non_utf8_bytes_surface_as_decode_error() {
        let err = validate_bytes(Path::new("mod/__init__.py"), vec![0x78, 0x20, 0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, MendError::Decode { .. }));
    }
}
