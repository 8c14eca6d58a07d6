//! String-literal scanner
//!
//! Follows the Python tokenizer rules that decide where a string literal
//! starts and ends. Everything past literal boundaries is left to the
//! tree-sitter stage.

/// An opening quote that never found its closing delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnterminatedString {
    /// 1-based line of the opening quote
    pub line: usize,
    /// 0-based character column of the opening quote
    pub column: usize,
    pub quote: char,
    pub triple: bool,
}

/// Return the first string literal left open in `source`, if any.
pub fn find_unterminated_string(source: &str) -> Option<UnterminatedString> {
    let chars: Vec<char> = source.chars().collect();
    let mut scanner = Scanner {
        chars: &chars,
        pos: 0,
        line: 1,
        line_start: 0,
    };
    scanner.run()
}

struct Scanner<'a> {
    chars: &'a [char],
    pos: usize,
    line: usize,
    line_start: usize,
}

impl Scanner<'_> {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) {
        if self.chars.get(self.pos) == Some(&'\n') {
            self.line += 1;
            self.line_start = self.pos + 1;
        }
        self.pos += 1;
    }

    fn run(&mut self) -> Option<UnterminatedString> {
        while let Some(ch) = self.peek(0) {
            match ch {
                '#' => {
                    while matches!(self.peek(0), Some(c) if c != '\n') {
                        self.bump();
                    }
                }
                '\'' | '"' => {
                    if let Some(open) = self.string(ch) {
                        return Some(open);
                    }
                }
                _ => self.bump(),
            }
        }
        None
    }

    /// Consume one literal starting at the current quote.
    fn string(&mut self, quote: char) -> Option<UnterminatedString> {
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        let open = UnterminatedString {
            line: self.line,
            column: self.pos - self.line_start,
            quote,
            triple,
        };

        let delimiter_len = if triple { 3 } else { 1 };
        for _ in 0..delimiter_len {
            self.bump();
        }

        loop {
            let Some(ch) = self.peek(0) else {
                return Some(open);
            };
            match ch {
                '\\' => {
                    self.bump();
                    if self.peek(0).is_none() {
                        return Some(open);
                    }
                    self.bump();
                }
                '\n' if !triple => return Some(open),
                c if c == quote => {
                    if !triple {
                        self.bump();
                        return None;
                    }
                    if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                        self.bump();
                        self.bump();
                        self.bump();
                        return None;
                    }
                    self.bump();
                }
                _ => self.bump(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_literals_pass() {
        let src = "a = 'x'\nb = \"y\"\nc = '''multi\nline'''\nd = r\"\\\"\"\n";
        assert_eq!(find_unterminated_string(src), None);
    }

    #[test]
    fn test_single_quote_open_at_end_of_line() {
        let src = "x = 1\ny = 'abc\nz = 2\n";
        let open = find_unterminated_string(src).unwrap();
        assert_eq!(open.line, 2);
        assert_eq!(open.column, 4);
        assert_eq!(open.quote, '\'');
        assert!(!open.triple);
    }

    #[test]
    fn test_open_triple_quote_reports_start_line() {
        let src = "\"\"\"Module docs\n\nimport os\n";
        let open = find_unterminated_string(src).unwrap();
        assert_eq!(open.line, 1);
        assert!(open.triple);
    }

    #[test]
    fn test_quotes_inside_comments_are_ignored() {
        let src = "x = 1  # it's fine\n";
        assert_eq!(find_unterminated_string(src), None);
    }

    #[test]
    fn test_backslash_newline_continues_single_quoted_string() {
        let src = "x = 'abc\\\ndef'\n";
        assert_eq!(find_unterminated_string(src), None);
    }

    #[test]
    fn test_trailing_backslash_at_eof() {
        let src = "x = 'abc\\";
        assert!(find_unterminated_string(src).is_some());
    }

    #[test]
    fn test_other_quote_kind_inside_string() {
        let src = "msg = \"the city's best\"\n";
        assert_eq!(find_unterminated_string(src), None);
    }
}
