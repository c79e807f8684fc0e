//! Recursive-descent parser producing the statement list for one cell.

use super::eval::Value;
use super::lexer::{Tok, Token};
use super::{ErrorKind, ExecutionError};

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Expr {
    Const(Value),
    Name(String),
    List(Vec<Expr>),
    Neg(Box<Expr>),
    Pos(Box<Expr>),
    /// Left-associative operator chain: `lhs op1 e1 op2 e2 ...`.
    Binary {
        lhs: Box<Expr>,
        rest: Vec<(BinOp, Expr)>,
    },
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    pub(super) const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CmpOp {
    pub(super) const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum StmtKind {
    Assign { name: String, value: Expr },
    Expr(Expr),
    For {
        var: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Stmt {
    pub kind: StmtKind,
    /// First and last source line of the statement.
    pub lines: (usize, usize),
}

/// Parse a tokenized cell. The token list must end with `Tok::Eof`.
pub(super) fn parse(tokens: Vec<Token>) -> Result<Vec<Stmt>, ExecutionError> {
    Parser {
        tokens,
        pos: 0,
        depth: 0,
    }
    .cell()
}

/// Deepest expression nesting accepted (brackets, unary operators, powers).
/// Bounds the recursion of both the parser and the evaluator.
pub(super) const MAX_NESTING: usize = 100;

static EOF: Tok = Tok::Eof;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> &Tok {
        self.current().map_or(&EOF, |t| &t.tok)
    }

    fn peek_next(&self) -> Option<&Tok> {
        self.tokens.get(self.pos + 1).map(|t| &t.tok)
    }

    fn line(&self) -> usize {
        self.current()
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    /// Line of the most recently consumed token.
    fn prev_line(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or_else(|| self.line(), |t| t.line)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn unexpected(&self) -> ExecutionError {
        let line = self.line();
        ExecutionError::new(
            ErrorKind::SyntaxError,
            format!("invalid syntax: unexpected {}", self.peek().describe()),
            (line, line),
        )
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), ExecutionError> {
        if self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_ident(&mut self) -> Result<String, ExecutionError> {
        match self.peek() {
            Tok::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn cell(mut self) -> Result<Vec<Stmt>, ExecutionError> {
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline | Tok::Semi => {
                    self.advance();
                    continue;
                }
                Tok::For => stmts.push(self.for_stmt()?),
                _ => self.simple_stmts(&mut stmts)?,
            }
            self.end_of_line()?;
        }
        Ok(stmts)
    }

    fn end_of_line(&mut self) -> Result<(), ExecutionError> {
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::Eof => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    /// `stmt (';' stmt)* [';']`
    fn simple_stmts(&mut self, out: &mut Vec<Stmt>) -> Result<(), ExecutionError> {
        loop {
            out.push(self.simple_stmt()?);
            if self.peek() != &Tok::Semi {
                return Ok(());
            }
            self.advance();
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                return Ok(());
            }
        }
    }

    fn simple_stmt(&mut self) -> Result<Stmt, ExecutionError> {
        let start = self.line();
        let kind = match (self.peek(), self.peek_next()) {
            (Tok::Ident(name), Some(Tok::Assign)) => {
                let name = name.clone();
                self.advance();
                self.advance();
                StmtKind::Assign {
                    name,
                    value: self.expr()?,
                }
            }
            _ => StmtKind::Expr(self.expr()?),
        };
        Ok(Stmt {
            kind,
            lines: (start, self.prev_line()),
        })
    }

    /// `for NAME in expr: stmt (';' stmt)*`, body on the same line.
    fn for_stmt(&mut self) -> Result<Stmt, ExecutionError> {
        let start = self.line();
        self.expect(&Tok::For)?;
        let var = self.expect_ident()?;
        self.expect(&Tok::In)?;
        let iter = self.expr()?;
        self.expect(&Tok::Colon)?;
        if matches!(self.peek(), Tok::Newline | Tok::Eof) {
            let line = self.line();
            return Err(ExecutionError::new(
                ErrorKind::SyntaxError,
                "expected a statement on the same line after ':'",
                (line, line),
            ));
        }
        let mut body = Vec::new();
        self.simple_stmts(&mut body)?;
        Ok(Stmt {
            kind: StmtKind::For { var, iter, body },
            lines: (start, self.prev_line()),
        })
    }

    fn deepen(&mut self) -> Result<(), ExecutionError> {
        if self.depth >= MAX_NESTING {
            let line = self.line();
            return Err(ExecutionError::new(
                ErrorKind::SyntaxError,
                "too many nested parentheses",
                (line, line),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ExecutionError>,
    ) -> Result<T, ExecutionError> {
        self.deepen()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expr(&mut self) -> Result<Expr, ExecutionError> {
        self.nested(Self::comparison)
    }

    fn comparison(&mut self) -> Result<Expr, ExecutionError> {
        let lhs = self.arith()?;
        let op = match self.peek() {
            Tok::EqEq => CmpOp::Eq,
            Tok::NotEq => CmpOp::Ne,
            Tok::Lt => CmpOp::Lt,
            Tok::Gt => CmpOp::Gt,
            Tok::Le => CmpOp::Le,
            Tok::Ge => CmpOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.arith()?;
        Ok(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn arith(&mut self) -> Result<Expr, ExecutionError> {
        let lhs = self.term()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => return Ok(chain(lhs, rest)),
            };
            self.advance();
            rest.push((op, self.term()?));
        }
    }

    fn term(&mut self) -> Result<Expr, ExecutionError> {
        let lhs = self.unary()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::DoubleSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => return Ok(chain(lhs, rest)),
            };
            self.advance();
            rest.push((op, self.unary()?));
        }
    }

    fn unary(&mut self) -> Result<Expr, ExecutionError> {
        match self.peek() {
            Tok::Minus => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.nested(Self::unary)?)))
            }
            Tok::Plus => {
                self.advance();
                Ok(Expr::Pos(Box::new(self.nested(Self::unary)?)))
            }
            _ => self.power(),
        }
    }

    /// `**` and `^` are both exponentiation and bind right to left.
    fn power(&mut self) -> Result<Expr, ExecutionError> {
        let base = self.postfix()?;
        if matches!(self.peek(), Tok::DoubleStar | Tok::Caret) {
            self.advance();
            let exponent = self.nested(Self::unary)?;
            return Ok(chain(base, vec![(BinOp::Pow, exponent)]));
        }
        Ok(base)
    }

    /// Each call or index wraps the expression once more, so a chain of
    /// them counts toward the nesting limit.
    fn postfix(&mut self) -> Result<Expr, ExecutionError> {
        let outer = self.depth;
        let result = self.postfix_chain();
        self.depth = outer;
        result
    }

    fn postfix_chain(&mut self) -> Result<Expr, ExecutionError> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                Tok::LParen => {
                    self.deepen()?;
                    self.advance();
                    let args = self.sequence(&Tok::RParen)?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                Tok::LBracket => {
                    self.deepen()?;
                    self.advance();
                    let index = self.expr()?;
                    self.expect(&Tok::RBracket)?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Comma-separated expressions up to and including `close`.
    fn sequence(&mut self, close: &Tok) -> Result<Vec<Expr>, ExecutionError> {
        let mut items = Vec::new();
        while self.peek() != close {
            items.push(self.expr()?);
            if self.peek() == &Tok::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn atom(&mut self) -> Result<Expr, ExecutionError> {
        let expr = match self.peek() {
            Tok::Int(n) => Expr::Const(Value::Int(*n)),
            Tok::Float(x) => Expr::Const(Value::Float(*x)),
            Tok::Str(_) | Tok::Bytes(_) => return self.string_literals(),
            Tok::Ident(name) => match name.as_str() {
                "None" => Expr::Const(Value::None),
                "True" => Expr::Const(Value::Bool(true)),
                "False" => Expr::Const(Value::Bool(false)),
                _ => Expr::Name(name.clone()),
            },
            Tok::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(&Tok::RParen)?;
                return Ok(inner);
            }
            Tok::LBracket => {
                self.advance();
                return Ok(Expr::List(self.sequence(&Tok::RBracket)?));
            }
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(expr)
    }

    /// Adjacent string literals concatenate, as in `"a" "b"`.
    fn string_literals(&mut self) -> Result<Expr, ExecutionError> {
        let mut value = match self.advance() {
            Tok::Str(s) => Value::Str(s),
            Tok::Bytes(b) => Value::Bytes(b),
            _ => return Err(self.unexpected()),
        };
        loop {
            value = match (value, self.peek()) {
                (Value::Str(mut acc), Tok::Str(s)) => {
                    acc.push_str(s);
                    Value::Str(acc)
                }
                (Value::Bytes(mut acc), Tok::Bytes(b)) => {
                    acc.extend_from_slice(b);
                    Value::Bytes(acc)
                }
                (_, Tok::Str(_) | Tok::Bytes(_)) => {
                    let line = self.line();
                    return Err(ExecutionError::new(
                        ErrorKind::SyntaxError,
                        "cannot mix bytes and nonbytes literals",
                        (line, line),
                    ));
                }
                (value, _) => return Ok(Expr::Const(value)),
            };
            self.advance();
        }
    }
}

fn chain(lhs: Expr, rest: Vec<(BinOp, Expr)>) -> Expr {
    if rest.is_empty() {
        lhs
    } else {
        Expr::Binary {
            lhs: Box::new(lhs),
            rest,
        }
    }
}
