//! Quote balance heuristics for a single source line
//!
//! Counting only: this cannot tell an unterminated literal from prose
//! with an odd number of apostrophes ("the city's view"). Callers only
//! run it on lines the validator blamed and re-validate every guess.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuoteKind {
    #[serde(rename = "'")]
    Single,
    #[serde(rename = "\"")]
    Double,
    #[serde(rename = "'''")]
    TripleSingle,
    #[serde(rename = "\"\"\"")]
    TripleDouble,
}

impl QuoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteKind::Single => "'",
            QuoteKind::Double => "\"",
            QuoteKind::TripleSingle => "'''",
            QuoteKind::TripleDouble => "\"\"\"",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteBalance {
    pub unbalanced: bool,
    pub quote_kind: Option<QuoteKind>,
}

/// Unescaped quote counts on one line. `single`/`double` exclude the
/// characters already counted as part of a triple sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuoteCounts {
    pub single: usize,
    pub double: usize,
    pub triple_single: usize,
    pub triple_double: usize,
}

pub fn count_quotes(line: &str) -> QuoteCounts {
    let mut raw_single = 0;
    let mut raw_double = 0;
    let mut counts = QuoteCounts::default();

    let mut run: Option<(char, usize)> = None;
    let mut flush = |run: &mut Option<(char, usize)>, counts: &mut QuoteCounts| {
        match run.take() {
            Some(('\'', len)) => {
                raw_single += len;
                counts.triple_single += len / 3;
            }
            Some(('"', len)) => {
                raw_double += len;
                counts.triple_double += len / 3;
            }
            _ => {}
        }
    };

    let mut escaped = false;
    for ch in line.chars() {
        if escaped {
            escaped = false;
            flush(&mut run, &mut counts);
            continue;
        }
        match ch {
            '\\' => {
                flush(&mut run, &mut counts);
                escaped = true;
            }
            '\'' | '"' => match run {
                Some((c, len)) if c == ch => run = Some((c, len + 1)),
                _ => {
                    flush(&mut run, &mut counts);
                    run = Some((ch, 1));
                }
            },
            _ => flush(&mut run, &mut counts),
        }
    }
    flush(&mut run, &mut counts);

    counts.single = raw_single - counts.triple_single * 3;
    counts.double = raw_double - counts.triple_double * 3;
    counts
}

/// Pick the quote sequence most likely left open on `line`.
///
/// Priority: `"""`, `'''`, `"`, `'`. A lone single or double kind is only
/// flagged when the other kind's count is even.
pub fn analyze_line(line: &str) -> QuoteBalance {
    let counts = count_quotes(line);
    let quote_kind = if counts.triple_double % 2 == 1 {
        Some(QuoteKind::TripleDouble)
    } else if counts.triple_single % 2 == 1 {
        Some(QuoteKind::TripleSingle)
    } else if counts.double % 2 == 1 && counts.single % 2 == 0 {
        Some(QuoteKind::Double)
    } else if counts.single % 2 == 1 && counts.double % 2 == 0 {
        Some(QuoteKind::Single)
    } else {
        None
    };
    QuoteBalance {
        unbalanced: quote_kind.is_some(),
        quote_kind,
    }
}

/// True when any quote kind has an odd count on the line.
pub fn has_odd_quotes(line: &str) -> bool {
    let c = count_quotes(line);
    c.single % 2 == 1 || c.double % 2 == 1 || c.triple_single % 2 == 1 || c.triple_double % 2 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unterminated_single() {
        let b = analyze_line("x = 'abc");
        assert!(b.unbalanced);
        assert_eq!(b.quote_kind, Some(QuoteKind::Single));
    }

    #[test]
    fn test_unterminated_double() {
        assert_eq!(
            analyze_line("description = \"Luxury home").quote_kind,
            Some(QuoteKind::Double)
        );
    }

    #[test]
    fn test_triple_has_priority() {
        assert_eq!(
            analyze_line("\"\"\"Module docs with a 'quote").quote_kind,
            Some(QuoteKind::TripleDouble)
        );
        assert_eq!(analyze_line("s = '''abc").quote_kind, Some(QuoteKind::TripleSingle));
    }

    #[test]
    fn test_balanced_line() {
        let b = analyze_line("x = 'a' + \"b\"");
        assert!(!b.unbalanced);
        assert_eq!(b.quote_kind, None);
    }

    #[test]
    fn test_escaped_quotes_do_not_count() {
        let counts = count_quotes(r#"x = 'it\'s'"#);
        assert_eq!(counts.single, 2);
        assert!(!analyze_line(r#"x = 'it\'s'"#).unbalanced);
    }

    #[test]
    fn test_escaped_backslash_does_not_escape_quote() {
        let counts = count_quotes(r#"x = 'a\\'"#);
        assert_eq!(counts.single, 2);
    }

    #[test]
    fn test_triple_counts_are_subtracted() {
        let counts = count_quotes("''''");
        assert_eq!(counts.triple_single, 1);
        assert_eq!(counts.single, 1);
    }

    #[test]
    fn test_mixed_odd_counts_are_ambiguous() {
        // One stray quote of each kind: neither single rule fires.
        assert_eq!(analyze_line("x = \"it's").quote_kind, None);
    }

    #[test]
    fn test_possessive_in_prose_is_a_known_false_positive() {
        assert_eq!(analyze_line("# the city's skyline").quote_kind, Some(QuoteKind::Single));
    }
}
