//! Tokenizer for the worksheet scripting language.

use super::{ErrorKind, ExecutionError};

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Ident(String),
    For,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semi,
    Assign,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Caret,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    Newline,
    Eof,
}

impl Tok {
    /// How the token reads in an error message.
    pub(super) fn describe(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Float(x) => x.to_string(),
            Self::Str(_) | Self::Bytes(_) => "string literal".to_string(),
            Self::Ident(name) => format!("'{name}'"),
            Self::Newline => "end of line".to_string(),
            Self::Eof => "end of input".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    const fn symbol(&self) -> &'static str {
        match self {
            Self::For => "for",
            Self::In => "in",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Comma => ",",
            Self::Colon => ":",
            Self::Semi => ";",
            Self::Assign => "=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::DoubleStar => "**",
            Self::Slash => "/",
            Self::DoubleSlash => "//",
            Self::Percent => "%",
            Self::Caret => "^",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Token {
    pub tok: Tok,
    pub line: usize,
}

pub(super) fn tokenize(source: &str) -> Result<Vec<Token>, ExecutionError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            depth: 0,
            tokens: Vec::new(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn push(&mut self, tok: Tok, line: usize) {
        self.tokens.push(Token { tok, line });
    }

    fn error(&self, message: impl Into<String>, line: usize) -> ExecutionError {
        ExecutionError::new(ErrorKind::SyntaxError, message, (line, line))
    }

    fn run(mut self) -> Result<Vec<Token>, ExecutionError> {
        while let Some(c) = self.peek(0) {
            let line = self.line;
            match c {
                '\n' => {
                    self.bump();
                    if self.depth == 0 {
                        self.push(Tok::Newline, line);
                    }
                }
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.bump();
                }
                '#' => {
                    while self.peek(0).is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                '\\' if self.peek(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                '\'' | '"' => self.string(StringFlags::default())?,
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek(1).is_some_and(|c| c.is_ascii_digit()) => self.number()?,
                c if c.is_ascii_alphabetic() || c == '_' => self.word()?,
                _ => self.operator(c)?,
            }
        }
        let line = self.line;
        self.push(Tok::Newline, line);
        self.push(Tok::Eof, line);
        Ok(self.tokens)
    }

    fn operator(&mut self, c: char) -> Result<(), ExecutionError> {
        let line = self.line;
        let next = self.peek(1);
        let (tok, width) = match (c, next) {
            ('*', Some('*')) => (Tok::DoubleStar, 2),
            ('/', Some('/')) => (Tok::DoubleSlash, 2),
            ('=', Some('=')) => (Tok::EqEq, 2),
            ('!', Some('=')) => (Tok::NotEq, 2),
            ('<', Some('=')) => (Tok::Le, 2),
            ('>', Some('=')) => (Tok::Ge, 2),
            ('(', _) => (Tok::LParen, 1),
            (')', _) => (Tok::RParen, 1),
            ('[', _) => (Tok::LBracket, 1),
            (']', _) => (Tok::RBracket, 1),
            (',', _) => (Tok::Comma, 1),
            (':', _) => (Tok::Colon, 1),
            (';', _) => (Tok::Semi, 1),
            ('=', _) => (Tok::Assign, 1),
            ('+', _) => (Tok::Plus, 1),
            ('-', _) => (Tok::Minus, 1),
            ('*', _) => (Tok::Star, 1),
            ('/', _) => (Tok::Slash, 1),
            ('%', _) => (Tok::Percent, 1),
            ('^', _) => (Tok::Caret, 1),
            ('<', _) => (Tok::Lt, 1),
            ('>', _) => (Tok::Gt, 1),
            _ if !c.is_ascii() => {
                return Err(self.error(
                    format!("invalid character '{c}' (U+{:04X})", u32::from(c)),
                    line,
                ))
            }
            _ => return Err(self.error("invalid syntax", line)),
        };
        match tok {
            Tok::LParen | Tok::LBracket => self.depth += 1,
            Tok::RParen | Tok::RBracket => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        for _ in 0..width {
            self.bump();
        }
        self.push(tok, line);
        Ok(())
    }

    fn word(&mut self) -> Result<(), ExecutionError> {
        let line = self.line;
        let mut word = String::new();
        while let Some(c) = self.peek(0).filter(|c| c.is_ascii_alphanumeric() || *c == '_') {
            word.push(c);
            self.bump();
        }

        if matches!(self.peek(0), Some('\'' | '"')) {
            if let Some(flags) = StringFlags::from_prefix(&word) {
                return self.string(flags);
            }
        }

        let tok = match word.as_str() {
            "for" => Tok::For,
            "in" => Tok::In,
            _ => Tok::Ident(word),
        };
        self.push(tok, line);
        Ok(())
    }

    fn number(&mut self) -> Result<(), ExecutionError> {
        let line = self.line;
        let mut text = String::new();

        if self.peek(0) == Some('0') && matches!(self.peek(1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B')) {
            let radix = match self.peek(1) {
                Some('x' | 'X') => 16,
                Some('o' | 'O') => 8,
                _ => 2,
            };
            self.bump();
            self.bump();
            while let Some(c) = self.peek(0).filter(|c| c.is_ascii_alphanumeric() || *c == '_') {
                if c != '_' {
                    text.push(c);
                }
                self.bump();
            }
            let value = i64::from_str_radix(&text, radix)
                .map_err(|_| self.error("invalid numeric literal", line))?;
            self.push(Tok::Int(value), line);
            return Ok(());
        }

        let mut is_float = false;
        self.digits(&mut text);
        if self.peek(0) == Some('.') {
            is_float = true;
            text.push('.');
            self.bump();
            self.digits(&mut text);
        }
        if matches!(self.peek(0), Some('e' | 'E')) {
            let signed = matches!(self.peek(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                for _ in 0..digit_at {
                    text.extend(self.bump());
                }
                self.digits(&mut text);
            }
        }

        let tok = if is_float {
            Tok::Float(
                text.parse()
                    .map_err(|_| self.error("invalid numeric literal", line))?,
            )
        } else {
            Tok::Int(text.parse().map_err(|_| {
                ExecutionError::new(
                    ErrorKind::OverflowError,
                    "integer literal is too large",
                    (line, line),
                )
            })?)
        };
        self.push(tok, line);
        Ok(())
    }

    fn digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek(0).filter(|c| c.is_ascii_digit() || *c == '_') {
            if c != '_' {
                text.push(c);
            }
            self.bump();
        }
    }

    fn string(&mut self, flags: StringFlags) -> Result<(), ExecutionError> {
        let line = self.line;
        let Some(quote) = self.bump() else {
            return Err(self.error("unterminated string literal", line));
        };
        let triple = self.peek(0) == Some(quote) && self.peek(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut text = String::new();
        let mut bytes = Vec::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(self.error("unterminated string literal", line));
            };
            if c == quote
                && (!triple || (self.peek(1) == Some(quote) && self.peek(2) == Some(quote)))
            {
                for _ in 0..if triple { 3 } else { 1 } {
                    self.bump();
                }
                break;
            }
            if c == '\n' && !triple {
                return Err(self.error("unterminated string literal", line));
            }
            self.bump();

            if c == '\\' {
                let Some(escaped) = self.bump() else {
                    return Err(self.error("unterminated string literal", line));
                };
                if flags.raw {
                    // The backslash stays, but it still shields the next character.
                    self.literal(c, flags.bytes, &mut text, &mut bytes, line)?;
                    self.literal(escaped, flags.bytes, &mut text, &mut bytes, line)?;
                } else {
                    self.escape(escaped, flags.bytes, &mut text, &mut bytes, line)?;
                }
            } else {
                self.literal(c, flags.bytes, &mut text, &mut bytes, line)?;
            }
        }

        let tok = if flags.bytes {
            Tok::Bytes(bytes)
        } else {
            Tok::Str(text)
        };
        self.push(tok, line);
        Ok(())
    }

    fn literal(
        &self,
        c: char,
        is_bytes: bool,
        text: &mut String,
        bytes: &mut Vec<u8>,
        line: usize,
    ) -> Result<(), ExecutionError> {
        if !is_bytes {
            text.push(c);
            return Ok(());
        }
        if !c.is_ascii() {
            return Err(self.error("bytes can only contain ASCII literal characters", line));
        }
        bytes.push(c as u8);
        Ok(())
    }

    fn escape(
        &mut self,
        c: char,
        is_bytes: bool,
        text: &mut String,
        bytes: &mut Vec<u8>,
        line: usize,
    ) -> Result<(), ExecutionError> {
        let simple = match c {
            '\n' => return Ok(()),
            '\\' => Some('\\'),
            '\'' => Some('\''),
            '"' => Some('"'),
            'n' => Some('\n'),
            't' => Some('\t'),
            'r' => Some('\r'),
            '0' => Some('\0'),
            _ => None,
        };
        if let Some(ch) = simple {
            if is_bytes {
                bytes.push(ch as u8);
            } else {
                text.push(ch);
            }
            return Ok(());
        }

        let width = match c {
            'x' => 2,
            'u' if !is_bytes => 4,
            'U' if !is_bytes => 8,
            _ => {
                // Unknown escapes are kept verbatim.
                if is_bytes {
                    bytes.push(b'\\');
                    if !c.is_ascii() {
                        return Err(self.error("bytes can only contain ASCII literal characters", line));
                    }
                    bytes.push(c as u8);
                } else {
                    text.push('\\');
                    text.push(c);
                }
                return Ok(());
            }
        };

        let mut hex = String::new();
        for _ in 0..width {
            match self.peek(0).filter(char::is_ascii_hexdigit) {
                Some(h) => {
                    hex.push(h);
                    self.bump();
                }
                None => {
                    return Err(self.error(format!("truncated \\{c} escape"), line));
                }
            }
        }
        let code = u32::from_str_radix(&hex, 16).map_err(|_| self.error("invalid escape", line))?;
        if is_bytes {
            // \x in a bytes literal is at most two hex digits
            bytes.push(u8::try_from(code).map_err(|_| self.error("invalid escape", line))?);
        } else {
            let ch = char::from_u32(code)
                .ok_or_else(|| self.error(format!("invalid code point \\{c}{hex}"), line))?;
            text.push(ch);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StringFlags {
    bytes: bool,
    raw: bool,
}

impl StringFlags {
    /// Flags for a literal prefix such as `u`, `b`, `r` or `rb`.
    fn from_prefix(prefix: &str) -> Option<Self> {
        let lower = prefix.to_ascii_lowercase();
        match lower.as_str() {
            "u" => Some(Self::default()),
            "r" | "ur" => Some(Self {
                bytes: false,
                raw: true,
            }),
            "b" => Some(Self {
                bytes: true,
                raw: false,
            }),
            "br" | "rb" => Some(Self {
                bytes: true,
                raw: true,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn tokenizes_assignment_and_arithmetic() {
        assert_eq!(
            toks("x = 3*y^2 // 4"),
            vec![
                Tok::Ident("x".into()),
                Tok::Assign,
                Tok::Int(3),
                Tok::Star,
                Tok::Ident("y".into()),
                Tok::Caret,
                Tok::Int(2),
                Tok::DoubleSlash,
                Tok::Int(4),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn implicit_multiplication_lexes_as_adjacent_tokens() {
        assert_eq!(
            toks("3x"),
            vec![
                Tok::Int(3),
                Tok::Ident("x".into()),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn string_prefixes_and_escapes() {
        assert_eq!(toks("u\"äöüß\"")[0], Tok::Str("äöüß".into()));
        assert_eq!(toks("'\\xe1\\u0127'")[0], Tok::Str("\u{e1}\u{127}".into()));
        assert_eq!(toks("b'\\xe1a'")[0], Tok::Bytes(vec![0xE1, b'a']));
        assert_eq!(toks("r'\\n'")[0], Tok::Str("\\n".into()));
        assert_eq!(toks("'it\\'s'")[0], Tok::Str("it's".into()));
    }

    #[test]
    fn raw_strings_keep_escaped_quotes() {
        assert_eq!(toks(r"r'a\'b'")[0], Tok::Str(r"a\'b".into()));
        assert_eq!(toks(r#"r"\"""#)[0], Tok::Str(r#"\""#.into()));
        assert_eq!(toks(r"r'\\'")[0], Tok::Str(r"\\".into()));
        assert_eq!(toks(r"rb'\'x'")[0], Tok::Bytes(br"\'x".to_vec()));
        assert!(tokenize(r"r'a\'").is_err());
    }

    #[test]
    fn triple_quoted_string_spans_lines() {
        let tokens = tokenize("s = \"\"\"a\nb\"\"\"\nt").unwrap();
        assert_eq!(tokens[2].tok, Tok::Str("a\nb".into()));
        assert_eq!(tokens[4].tok, Tok::Ident("t".into()));
        assert_eq!(tokens[4].line, 3);
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        assert_eq!(
            toks("[1,\n2]"),
            vec![
                Tok::LBracket,
                Tok::Int(1),
                Tok::Comma,
                Tok::Int(2),
                Tok::RBracket,
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(toks("0x1F")[0], Tok::Int(31));
        assert_eq!(toks("0b101")[0], Tok::Int(5));
        assert_eq!(toks("1_000")[0], Tok::Int(1000));
        assert_eq!(toks("2.5")[0], Tok::Float(2.5));
        assert_eq!(toks("1e3")[0], Tok::Float(1000.0));
        assert_eq!(toks(".5")[0], Tok::Float(0.5));
    }

    #[test]
    fn unterminated_string_is_syntax_error() {
        let err = tokenize("x = \"\nx").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert_eq!(err.lines, (1, 1));
        assert!(err.message.contains("unterminated string literal"));
    }

    #[test]
    fn non_ascii_outside_string_is_syntax_error() {
        let err = tokenize("x = \u{0127}\nx").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert_eq!(err.lines, (1, 1));
        assert!(err.message.contains("U+0127"));
    }

    #[test]
    fn huge_integer_literal_overflows() {
        let err = tokenize("99999999999999999999").unwrap_err();
        assert_eq!(err.kind, ErrorKind::OverflowError);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            toks("x=1 # x=3y"),
            vec![
                Tok::Ident("x".into()),
                Tok::Assign,
                Tok::Int(1),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }
}
