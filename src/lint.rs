//! Pre-execution lint pass.
//!
//! The linter walks the submitted cell with a small scanner (normal code,
//! string literal, comment) so that patterns inside strings and comments
//! are never reported. Two rules run:
//!
//! - **smart quotes**: `“` / `”` used as string delimiters are reported and
//!   rewritten to `"`. This is the only rule that changes the program.
//! - **implicit multiplication**: a number directly followed by a name or
//!   `(` (`3x`, `5(1+x)`) is reported; the code is left as is.
//!
//! Findings are advisory and never stop the cell from running.

use std::fmt;

use serde::Serialize;

use crate::config::LintConfig;

const LEFT_DOUBLE_QUOTE: char = '\u{201C}';
const RIGHT_DOUBLE_QUOTE: char = '\u{201D}';

/// Which rule produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    SmartQuote,
    ImplicitMultiplication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
}

/// 1-based position of a finding; columns count characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

/// A single advisory diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintFinding {
    pub rule: RuleKind,
    pub span: Span,
    pub message: String,
    pub severity: Severity,
}

impl fmt::Display for LintFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "*** WARNING (line {}, column {}): {} ***",
            self.span.line, self.span.column, self.message
        )
    }
}

/// Result of linting one cell: the code to execute plus the findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintOutcome {
    pub code: String,
    pub findings: Vec<LintFinding>,
}

/// Runs the enabled rules over submitted code.
#[derive(Debug, Clone, Copy, Default)]
pub struct Linter {
    config: LintConfig,
}

impl Linter {
    pub const fn new(config: LintConfig) -> Self {
        Self { config }
    }

    /// Lint `code`, returning the (possibly rewritten) source and findings
    /// in source order.
    pub fn check(&self, code: &str) -> LintOutcome {
        Scanner::new(code, self.config).run()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Comment,
    Str { quote: char, triple: bool, smart: bool },
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    state: State,
    config: LintConfig,
    out: String,
    findings: Vec<LintFinding>,
}

impl Scanner {
    fn new(code: &str, config: LintConfig) -> Self {
        Self {
            chars: code.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            state: State::Normal,
            config,
            out: String::with_capacity(code.len()),
            findings: Vec::new(),
        }
    }

    fn run(mut self) -> LintOutcome {
        while let Some(c) = self.peek(0) {
            match self.state {
                State::Normal => self.normal(c),
                State::Comment => {
                    if c == '\n' {
                        self.state = State::Normal;
                    }
                    self.take();
                }
                State::Str {
                    quote,
                    triple,
                    smart,
                } => self.string(c, quote, triple, smart),
            }
        }
        LintOutcome {
            code: self.out,
            findings: self.findings,
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    const fn span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
        }
    }

    /// Consume one character without copying it to the output.
    fn advance(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consume one character and copy it to the output.
    fn take(&mut self) {
        if let Some(c) = self.advance() {
            self.out.push(c);
        }
    }

    fn take_n(&mut self, n: usize) {
        for _ in 0..n {
            self.take();
        }
    }

    fn prev_is_word(&self) -> bool {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.chars.get(i))
            .is_some_and(|c| is_word_char(*c))
    }

    fn normal(&mut self, c: char) {
        if c == '#' {
            self.state = State::Comment;
            self.take();
        } else if is_smart_quote(c) && self.config.smart_quotes {
            self.smart_quote();
            self.state = State::Str {
                quote: '"',
                triple: false,
                smart: true,
            };
        } else if c == '\'' || c == '"' {
            let triple = self.peek(1) == Some(c) && self.peek(2) == Some(c);
            self.take_n(if triple { 3 } else { 1 });
            self.state = State::Str {
                quote: c,
                triple,
                smart: false,
            };
        } else if c.is_ascii_digit() && !self.prev_is_word() {
            self.number();
        } else {
            self.take();
        }
    }

    fn string(&mut self, c: char, quote: char, triple: bool, smart: bool) {
        if c == '\\' {
            self.take_n(2);
        } else if smart && is_smart_quote(c) {
            self.smart_quote();
            self.state = State::Normal;
        } else if c == quote {
            if !triple {
                self.take();
                self.state = State::Normal;
            } else if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                self.take_n(3);
                self.state = State::Normal;
            } else {
                self.take();
            }
        } else if c == '\n' && !triple {
            // Unterminated literal; the interpreter reports it.
            self.take();
            self.state = State::Normal;
        } else {
            self.take();
        }
    }

    fn smart_quote(&mut self) {
        let span = self.span();
        let Some(c) = self.advance() else {
            return;
        };
        self.out.push('"');
        self.findings.push(LintFinding {
            rule: RuleKind::SmartQuote,
            span,
            message: format!(
                "curly quote {c} (U+{:04X}) should be replaced by < \" >",
                u32::from(c)
            ),
            severity: Severity::Warning,
        });
    }

    /// Consume a numeric literal starting at the cursor and check what follows it.
    fn number(&mut self) {
        let span = self.span();
        let start = self.pos;
        let end = numeric_literal_end(&self.chars, start);

        let next = self.chars.get(end).copied();
        if self.config.implicit_multiplication
            && next.is_some_and(|n| n == '(' || n == '_' || n.is_alphabetic())
        {
            let literal: String = self.chars[start..end].iter().collect();
            let operand: String = if next == Some('(') {
                "(".to_string()
            } else {
                self.chars[end..]
                    .iter()
                    .take_while(|c| is_word_char(**c))
                    .collect()
            };
            self.findings.push(LintFinding {
                rule: RuleKind::ImplicitMultiplication,
                span,
                message: format!(
                    "possible implicit multiplication in \"{literal}{operand}\"; \
                     write \"{literal}*{operand}\" to multiply"
                ),
                severity: Severity::Warning,
            });
        }

        self.take_n(end - start);
    }
}

/// Index one past the end of the numeric literal starting at `start`.
///
/// Understands `_` separators, decimals, exponents, `0x`/`0o`/`0b` prefixes
/// and a trailing `j` imaginary suffix.
fn numeric_literal_end(chars: &[char], start: usize) -> usize {
    let at = |i: usize| chars.get(i).copied();
    let digit_at = |i: usize| at(i).is_some_and(|c| c.is_ascii_digit());
    let mut end = start;

    if at(start) == Some('0')
        && matches!(at(start + 1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B'))
        && at(start + 2).is_some_and(|c| c.is_ascii_hexdigit())
    {
        end = start + 2;
        while at(end).is_some_and(|c| c.is_ascii_hexdigit() || c == '_') {
            end += 1;
        }
        return end;
    }

    while at(end).is_some_and(|c| c.is_ascii_digit() || c == '_') {
        end += 1;
    }
    if at(end) == Some('.') && digit_at(end + 1) {
        end += 1;
        while at(end).is_some_and(|c| c.is_ascii_digit() || c == '_') {
            end += 1;
        }
    }
    if matches!(at(end), Some('e' | 'E')) {
        let mut exp = end + 1;
        if matches!(at(exp), Some('+' | '-')) {
            exp += 1;
        }
        if digit_at(exp) {
            end = exp;
            while at(end).is_some_and(|c| c.is_ascii_digit() || c == '_') {
                end += 1;
            }
        }
    }
    if matches!(at(end), Some('j' | 'J')) && !at(end + 1).is_some_and(is_word_char) {
        end += 1;
    }
    end
}

const fn is_smart_quote(c: char) -> bool {
    matches!(c, LEFT_DOUBLE_QUOTE | RIGHT_DOUBLE_QUOTE)
}

fn is_word_char(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lint(code: &str) -> LintOutcome {
        Linter::default().check(code)
    }

    fn rules(outcome: &LintOutcome) -> Vec<RuleKind> {
        outcome.findings.iter().map(|f| f.rule).collect()
    }

    #[test]
    fn smart_quotes_are_reported_and_rewritten() {
        let outcome = lint("x = “hello”\nprint(x)");
        assert_eq!(outcome.code, "x = \"hello\"\nprint(x)");
        assert_eq!(
            rules(&outcome),
            vec![RuleKind::SmartQuote, RuleKind::SmartQuote]
        );
        assert_eq!(outcome.findings[0].span, Span { line: 1, column: 5 });
        assert_eq!(outcome.findings[1].span, Span { line: 1, column: 11 });
        assert!(outcome.findings[0]
            .message
            .contains("should be replaced by < \" >"));
        assert_eq!(outcome.findings[0].severity, Severity::Warning);
    }

    #[test]
    fn lone_smart_quote_is_rewritten() {
        let outcome = lint("x = \u{201C}\nx");
        assert_eq!(outcome.code, "x = \"\nx");
        assert_eq!(rules(&outcome), vec![RuleKind::SmartQuote]);
    }

    #[test]
    fn smart_quote_string_closed_by_ascii_quote() {
        let outcome = lint("s = “mixed\" + '3x'");
        assert_eq!(outcome.code, "s = \"mixed\" + '3x'");
        assert_eq!(rules(&outcome), vec![RuleKind::SmartQuote]);
    }

    #[test]
    fn smart_quotes_inside_ascii_strings_and_comments_are_text() {
        let code = "a = '“quoted”'\nb = \"say “hi”\"  # “note”";
        let outcome = lint(code);
        assert_eq!(outcome.code, code);
        assert!(outcome.findings.is_empty());
    }

    #[test]
    fn escaped_quote_in_raw_string_stays_inside_it() {
        let code = r"s = r'a\' 3x' + '2y'";
        let outcome = lint(code);
        assert_eq!(outcome.code, code);
        assert!(outcome.findings.is_empty());
    }

    #[test]
    fn non_ascii_identifier_is_not_a_smart_quote() {
        let outcome = lint("x = \u{0127}\nx");
        assert!(outcome.findings.is_empty());
        assert_eq!(outcome.code, "x = \u{0127}\nx");
    }

    #[test]
    fn implicit_multiplication_is_reported() {
        let outcome = lint("x=1\ny=3x^2x");
        assert_eq!(
            rules(&outcome),
            vec![
                RuleKind::ImplicitMultiplication,
                RuleKind::ImplicitMultiplication
            ]
        );
        assert_eq!(outcome.findings[0].span, Span { line: 2, column: 3 });
        assert!(outcome.findings[0]
            .message
            .contains("implicit multiplication"));
        assert!(outcome.findings[0].message.contains("\"3x\""));
        assert!(outcome.findings[1].message.contains("\"2x\""));
        // Reported, never rewritten.
        assert_eq!(outcome.code, "x=1\ny=3x^2x");
    }

    #[test]
    fn number_before_parenthesis_is_reported() {
        let outcome = lint("y = 5(1+x)");
        assert_eq!(rules(&outcome), vec![RuleKind::ImplicitMultiplication]);
        assert!(outcome.findings[0].message.contains("\"5*(\""));
    }

    #[test]
    fn no_implicit_multiplication_inside_string() {
        let outcome = lint("x='1+3x'\ny=");
        assert!(outcome.findings.is_empty());
        let outcome = lint("s = \"\"\"2y\n4z\"\"\"\nt = 'it\\'s 3x'");
        assert!(outcome.findings.is_empty());
    }

    #[test]
    fn no_implicit_multiplication_inside_comment() {
        let outcome = lint("x=1 # x=3y\ny=");
        assert!(outcome.findings.is_empty());
    }

    #[test]
    fn ordinary_numbers_and_names_are_quiet() {
        let code = "x1y = 2\nz = 1e5 + 2.5e-3 + 0x1F + 0b101 + 1_000 + 3j + var2(4)\nw = 1.0";
        let outcome = lint(code);
        assert!(outcome.findings.is_empty(), "{:?}", outcome.findings);
    }

    #[test]
    fn zero_followed_by_name_is_reported() {
        let outcome = lint("y = 0x");
        assert_eq!(rules(&outcome), vec![RuleKind::ImplicitMultiplication]);
    }

    #[test]
    fn disabled_rules_report_nothing() {
        let linter = Linter::new(LintConfig {
            smart_quotes: false,
            implicit_multiplication: false,
        });
        let code = "x = “3x”";
        let outcome = linter.check(code);
        assert!(outcome.findings.is_empty());
        assert_eq!(outcome.code, code);
    }

    #[test]
    fn finding_renders_as_warning_line() {
        let outcome = lint("y = 2x");
        assert_eq!(
            outcome.findings[0].to_string(),
            "*** WARNING (line 1, column 5): possible implicit multiplication in \"2x\"; \
             write \"2*x\" to multiply ***"
        );
    }

    #[test]
    fn columns_count_characters() {
        let outcome = lint("ä = 1; b = 2c");
        assert_eq!(outcome.findings[0].span, Span { line: 1, column: 12 });
    }
}
