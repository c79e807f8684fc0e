//! Tree-walking evaluator and the per-session binding environment.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::mem;

use super::lexer::tokenize;
use super::parser::{parse, BinOp, CmpOp, Expr, Stmt, StmtKind, MAX_NESTING};
use super::{CancelFlag, ErrorKind, ExecutionError, OutputSender, Stream};
use crate::encoding::{self, Charset};

/// Largest approximate footprint in bytes of a single value built by
/// concatenation, repetition or a list display.
const MAX_VALUE_SIZE: usize = 1 << 26;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Range(i64, i64),
    Builtin(Builtin),
}

/// Functions available in every session without being bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    Repr,
    Str,
    Range,
    Encode,
    Decode,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "print" => Self::Print,
            "len" => Self::Len,
            "repr" => Self::Repr,
            "str" => Self::Str,
            "range" => Self::Range,
            "encode" => Self::Encode,
            "decode" => Self::Decode,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Len => "len",
            Self::Repr => "repr",
            Self::Str => "str",
            Self::Range => "range",
            Self::Encode => "encode",
            Self::Decode => "decode",
        }
    }
}

impl Value {
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Range(..) => "range",
            Self::Builtin(_) => "builtin_function_or_method",
        }
    }

    /// Printable representation, as echoed for bare expressions.
    pub fn repr(&self) -> String {
        match self {
            Self::None => "None".to_string(),
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(x) => float_repr(*x),
            Self::Str(s) => str_repr(s),
            Self::Bytes(b) => bytes_repr(b),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Self::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Self::Range(start, stop) => format!("range({start}, {stop})"),
            Self::Builtin(b) => format!("<built-in function {}>", b.name()),
        }
    }

    fn as_number(&self) -> Option<Number> {
        match self {
            Self::Bool(b) => Some(Number::Int(i64::from(*b))),
            Self::Int(n) => Some(Number::Int(*n)),
            Self::Float(x) => Some(Number::Float(*x)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            other => f.write_str(&other.repr()),
        }
    }
}

fn float_repr(x: f64) -> String {
    if x.is_nan() {
        "nan".to_string()
    } else if x.is_infinite() {
        String::from(if x > 0.0 { "inf" } else { "-inf" })
    } else if x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{x:.1}")
    } else if x.abs() >= 1e16 {
        format!("{x:e}")
    } else {
        x.to_string()
    }
}

fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {
                let cp = u32::from(c);
                let _ = if cp <= 0xFF {
                    write!(out, "\\x{cp:02x}")
                } else if cp <= 0xFFFF {
                    write!(out, "\\u{cp:04x}")
                } else {
                    write!(out, "\\U{cp:08x}")
                };
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn bytes_repr(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(char::from(quote));
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b == quote => {
                out.push('\\');
                out.push(char::from(b));
            }
            0x20..=0x7E => out.push(char::from(b)),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push(char::from(quote));
    out
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    #[allow(clippy::cast_precision_loss)]
    const fn to_f64(self) -> f64 {
        match self {
            Self::Int(n) => n as f64,
            Self::Float(x) => x,
        }
    }
}

/// Bindings that persist across the cells of one session.
///
/// Names are kept in sorted order so listings are deterministic.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    bindings: BTreeMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Parse and run one cell against `env`.
///
/// The whole cell is parsed first, so a syntax error runs nothing. Runtime
/// errors stop the cell at the failing statement; bindings made by earlier
/// statements are kept.
pub(super) fn run_cell(
    env: &mut Environment,
    source: &str,
    out: &OutputSender,
    cancel: &CancelFlag,
) -> Result<(), ExecutionError> {
    let program = parse(tokenize(source)?)?;
    let mut interp = Interpreter { env, out, cancel };
    for stmt in &program {
        interp.exec(stmt, true)?;
    }
    Ok(())
}

/// An exception before it is attached to a source location.
struct Raise {
    kind: ErrorKind,
    message: String,
}

fn raise(kind: ErrorKind, message: impl Into<String>) -> Raise {
    Raise {
        kind,
        message: message.into(),
    }
}

impl Raise {
    fn at(self, lines: (usize, usize)) -> ExecutionError {
        ExecutionError::new(self.kind, self.message, lines)
    }
}

type EvalResult = Result<Value, Raise>;

struct Interpreter<'a> {
    env: &'a mut Environment,
    out: &'a OutputSender,
    cancel: &'a CancelFlag,
}

impl Interpreter<'_> {
    fn check_cancel(&self, lines: (usize, usize)) -> Result<(), ExecutionError> {
        if self.cancel.is_cancelled() {
            return Err(ExecutionError::new(
                ErrorKind::KeyboardInterrupt,
                "execution interrupted",
                lines,
            ));
        }
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt, top_level: bool) -> Result<(), ExecutionError> {
        self.check_cancel(stmt.lines)?;
        match &stmt.kind {
            StmtKind::Assign { name, value } => {
                let value = self.eval(value).map_err(|r| r.at(stmt.lines))?;
                self.env.set(name.clone(), value);
            }
            StmtKind::Expr(expr) => {
                let value = self.eval(expr).map_err(|r| r.at(stmt.lines))?;
                if top_level && value != Value::None {
                    self.out.stdout(format!("{}\n", value.repr()));
                }
            }
            StmtKind::For { var, iter, body } => {
                let iterable = self.eval(iter).map_err(|r| r.at(stmt.lines))?;
                let items = iterate(iterable).map_err(|r| r.at(stmt.lines))?;
                for item in items {
                    self.check_cancel(stmt.lines)?;
                    self.env.set(var.clone(), item);
                    for inner in body {
                        self.exec(inner, false)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> EvalResult {
        match expr {
            Expr::Const(value) => Ok(value.clone()),
            Expr::Name(name) => self
                .env
                .get(name)
                .cloned()
                .or_else(|| Builtin::lookup(name).map(Value::Builtin))
                .ok_or_else(|| {
                    raise(
                        ErrorKind::NameError,
                        format!("name '{name}' is not defined"),
                    )
                }),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                let mut size = 0_usize;
                for item in items {
                    let value = self.eval(item)?;
                    let footprint = Footprint::of(&value);
                    if footprint.depth >= MAX_NESTING {
                        return Err(raise(ErrorKind::MemoryError, "list is nested too deeply"));
                    }
                    size = size
                        .saturating_add(footprint.size)
                        .saturating_add(mem::size_of::<Value>());
                    ensure_fits(Some(size))?;
                    values.push(value);
                }
                Ok(Value::List(values))
            }
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Float(x) => Ok(Value::Float(-x)),
                v => match v.as_number() {
                    Some(Number::Int(n)) => n
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| raise(ErrorKind::OverflowError, "integer overflow")),
                    _ => Err(raise(
                        ErrorKind::TypeError,
                        format!("bad operand type for unary -: '{}'", v.type_name()),
                    )),
                },
            },
            Expr::Pos(inner) => {
                let v = self.eval(inner)?;
                match v.as_number() {
                    Some(Number::Int(n)) => Ok(Value::Int(n)),
                    Some(Number::Float(x)) => Ok(Value::Float(x)),
                    None => Err(raise(
                        ErrorKind::TypeError,
                        format!("bad operand type for unary +: '{}'", v.type_name()),
                    )),
                }
            }
            Expr::Binary { lhs, rest } => {
                let mut acc = self.eval(lhs)?;
                for (op, rhs) in rest {
                    let rhs = self.eval(rhs)?;
                    acc = binary_op(*op, acc, rhs)?;
                }
                Ok(acc)
            }
            Expr::Compare { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                compare(*op, &lhs, &rhs).map(Value::Bool)
            }
            Expr::Call { callee, args } => {
                let callee = self.eval(callee)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                match callee {
                    Value::Builtin(builtin) => self.call(builtin, args),
                    other => Err(raise(
                        ErrorKind::TypeError,
                        format!("'{}' object is not callable", other.type_name()),
                    )),
                }
            }
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                subscript(&target, &index)
            }
        }
    }

    fn call(&self, builtin: Builtin, args: Vec<Value>) -> EvalResult {
        match builtin {
            Builtin::Print => {
                self.print(&args);
                Ok(Value::None)
            }
            Builtin::Len => {
                let [value] = exact_args::<1>(builtin, args)?;
                let len = match &value {
                    Value::Str(s) => s.chars().count(),
                    Value::Bytes(b) => b.len(),
                    Value::List(items) => items.len(),
                    Value::Range(start, stop) => {
                        usize::try_from(stop.saturating_sub(*start)).unwrap_or(0)
                    }
                    other => {
                        return Err(raise(
                            ErrorKind::TypeError,
                            format!("object of type '{}' has no len()", other.type_name()),
                        ))
                    }
                };
                i64::try_from(len)
                    .map(Value::Int)
                    .map_err(|_| raise(ErrorKind::OverflowError, "length too large"))
            }
            Builtin::Repr => {
                let [value] = exact_args::<1>(builtin, args)?;
                Ok(Value::Str(value.repr()))
            }
            Builtin::Str => match args.as_slice() {
                [] => Ok(Value::Str(String::new())),
                [value] => Ok(Value::Str(value.to_string())),
                _ => Err(arity_error(builtin, "at most 1 argument", args.len())),
            },
            Builtin::Range => {
                let (start, stop) = match args.as_slice() {
                    [stop] => (Value::Int(0), stop.clone()),
                    [start, stop] => (start.clone(), stop.clone()),
                    _ => return Err(arity_error(builtin, "1 or 2 arguments", args.len())),
                };
                match (start.as_number(), stop.as_number()) {
                    (Some(Number::Int(start)), Some(Number::Int(stop))) => {
                        Ok(Value::Range(start, stop))
                    }
                    _ => Err(raise(
                        ErrorKind::TypeError,
                        "range() arguments must be integers",
                    )),
                }
            }
            Builtin::Encode => {
                let (value, charset) = value_and_charset(builtin, args)?;
                match value {
                    Value::Str(s) => Ok(Value::Bytes(encoding::encode(&s, charset))),
                    other => Err(raise(
                        ErrorKind::TypeError,
                        format!("encode() argument must be str, not {}", other.type_name()),
                    )),
                }
            }
            Builtin::Decode => {
                let (value, charset) = value_and_charset(builtin, args)?;
                match value {
                    Value::Bytes(b) => Ok(Value::Str(encoding::decode(&b, charset))),
                    other => Err(raise(
                        ErrorKind::TypeError,
                        format!("decode() argument must be bytes, not {}", other.type_name()),
                    )),
                }
            }
        }
    }

    /// Text arguments go out as text; bytes arguments go out raw.
    fn print(&self, args: &[Value]) {
        let mut text = String::new();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                text.push(' ');
            }
            match arg {
                Value::Bytes(bytes) => {
                    self.out.stdout(std::mem::take(&mut text));
                    self.out.bytes(Stream::Stdout, bytes.clone());
                }
                other => {
                    let _ = write!(text, "{other}");
                }
            }
        }
        text.push('\n');
        self.out.stdout(text);
    }
}

fn exact_args<const N: usize>(builtin: Builtin, args: Vec<Value>) -> Result<[Value; N], Raise> {
    let given = args.len();
    args.try_into().map_err(|_: Vec<Value>| {
        let expected = if N == 1 {
            "exactly one argument".to_string()
        } else {
            format!("exactly {N} arguments")
        };
        arity_error(builtin, &expected, given)
    })
}

fn arity_error(builtin: Builtin, expected: &str, given: usize) -> Raise {
    raise(
        ErrorKind::TypeError,
        format!("{}() takes {expected} ({given} given)", builtin.name()),
    )
}

fn value_and_charset(builtin: Builtin, args: Vec<Value>) -> Result<(Value, Charset), Raise> {
    let given = args.len();
    let mut args = args.into_iter();
    let (Some(value), charset, None) = (args.next(), args.next(), args.next()) else {
        return Err(arity_error(builtin, "1 or 2 arguments", given));
    };
    let charset = match charset {
        None => Charset::Utf8,
        Some(Value::Str(name)) => name
            .parse::<Charset>()
            .map_err(|e: encoding::UnknownCharset| raise(ErrorKind::ValueError, e.to_string()))?,
        Some(other) => {
            return Err(raise(
                ErrorKind::TypeError,
                format!("encoding must be str, not {}", other.type_name()),
            ))
        }
    };
    Ok((value, charset))
}

fn iterate(value: Value) -> Result<Box<dyn Iterator<Item = Value>>, Raise> {
    Ok(match value {
        Value::List(items) => Box::new(items.into_iter()),
        Value::Range(start, stop) => Box::new((start..stop).map(Value::Int)),
        Value::Str(s) => Box::new(
            s.chars()
                .map(|c| Value::Str(c.to_string()))
                .collect::<Vec<_>>()
                .into_iter(),
        ),
        Value::Bytes(b) => Box::new(b.into_iter().map(|byte| Value::Int(i64::from(byte)))),
        other => {
            return Err(raise(
                ErrorKind::TypeError,
                format!("'{}' object is not iterable", other.type_name()),
            ))
        }
    })
}

fn unsupported(op: &str, lhs: &Value, rhs: &Value) -> Raise {
    raise(
        ErrorKind::TypeError,
        format!(
            "unsupported operand type(s) for {op}: '{}' and '{}'",
            lhs.type_name(),
            rhs.type_name()
        ),
    )
}

fn binary_op(op: BinOp, lhs: Value, rhs: Value) -> EvalResult {
    match (op, lhs, rhs) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            ensure_fits(a.len().checked_add(b.len()))?;
            Ok(Value::Str(a + &b))
        }
        (BinOp::Add, Value::Bytes(mut a), Value::Bytes(b)) => {
            ensure_fits(a.len().checked_add(b.len()))?;
            a.extend(b);
            Ok(Value::Bytes(a))
        }
        (BinOp::Add, Value::List(mut a), Value::List(b)) => {
            ensure_fits(Footprint::of_list(&a).size.checked_add(Footprint::of_list(&b).size))?;
            a.extend(b);
            Ok(Value::List(a))
        }
        (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) => {
            let count = repetitions(s.len(), n)?;
            Ok(Value::Str(s.repeat(count)))
        }
        (BinOp::Mul, Value::Bytes(b), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Bytes(b)) => {
            let count = repetitions(b.len(), n)?;
            Ok(Value::Bytes(b.repeat(count)))
        }
        (BinOp::Mul, Value::List(items), Value::Int(n))
        | (BinOp::Mul, Value::Int(n), Value::List(items)) => {
            if items.is_empty() {
                return Ok(Value::List(items));
            }
            let count = repetitions(Footprint::of_list(&items).size, n)?;
            let mut repeated = Vec::with_capacity(items.len() * count);
            for _ in 0..count {
                repeated.extend_from_slice(&items);
            }
            Ok(Value::List(repeated))
        }
        (op, lhs, rhs) => match (lhs.as_number(), rhs.as_number()) {
            (Some(Number::Int(a)), Some(Number::Int(b))) => int_op(op, a, b),
            (Some(a), Some(b)) => float_op(op, a.to_f64(), b.to_f64()),
            _ => Err(unsupported(op.symbol(), &lhs, &rhs)),
        },
    }
}

/// Non-positive counts repeat zero times.
fn repetitions(unit_size: usize, n: i64) -> Result<usize, Raise> {
    let count = usize::try_from(n).unwrap_or(0);
    ensure_fits(unit_size.checked_mul(count))?;
    Ok(count)
}

fn ensure_fits(size: Option<usize>) -> Result<(), Raise> {
    match size {
        Some(size) if size <= MAX_VALUE_SIZE => Ok(()),
        _ => Err(raise(ErrorKind::MemoryError, "result is too large")),
    }
}

/// Approximate memory held by a value and how deeply its lists nest.
///
/// Measuring stops once either bound is exceeded, so the result is only
/// exact for values within the limits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Footprint {
    size: usize,
    depth: usize,
}

impl Footprint {
    fn of(value: &Value) -> Self {
        match value {
            Value::List(items) => Self::of_list(items),
            Value::Str(s) => Self {
                size: s.len(),
                depth: 0,
            },
            Value::Bytes(b) => Self {
                size: b.len(),
                depth: 0,
            },
            _ => Self::default(),
        }
    }

    fn of_list(items: &[Value]) -> Self {
        let mut total = Self::default();
        let mut pending = vec![(items, 1_usize)];
        while let Some((items, depth)) = pending.pop() {
            total.depth = total.depth.max(depth);
            total.size = total
                .size
                .saturating_add(items.len().saturating_mul(mem::size_of::<Value>()));
            if total.size > MAX_VALUE_SIZE || total.depth > MAX_NESTING {
                break;
            }
            for item in items {
                match item {
                    Value::List(inner) => pending.push((inner, depth + 1)),
                    Value::Str(s) => total.size = total.size.saturating_add(s.len()),
                    Value::Bytes(b) => total.size = total.size.saturating_add(b.len()),
                    _ => {}
                }
            }
        }
        total
    }
}

fn int_op(op: BinOp, a: i64, b: i64) -> EvalResult {
    let overflow = || raise(ErrorKind::OverflowError, "integer overflow");
    let result = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(raise(ErrorKind::ZeroDivisionError, "division by zero"));
            }
            return float_op(op, Number::Int(a).to_f64(), Number::Int(b).to_f64());
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(raise(
                    ErrorKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                ));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(raise(ErrorKind::ZeroDivisionError, "integer modulo by zero"));
            }
            let r = a.checked_rem(b).unwrap_or(0);
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if b < 0 {
                return float_op(op, Number::Int(a).to_f64(), Number::Int(b).to_f64());
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
    };
    Ok(Value::Int(result))
}

fn float_op(op: BinOp, a: f64, b: f64) -> EvalResult {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => {
            return Err(raise(ErrorKind::ZeroDivisionError, "float division by zero"));
        }
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => {
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => a.powf(b),
    };
    Ok(Value::Float(result))
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, Raise> {
    let ordering = match (lhs.as_number(), rhs.as_number()) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => Some(a.cmp(&b)),
        (Some(a), Some(b)) => a.to_f64().partial_cmp(&b.to_f64()),
        _ => match (lhs, rhs) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            _ => match op {
                CmpOp::Eq => return Ok(lhs == rhs),
                CmpOp::Ne => return Ok(lhs != rhs),
                _ => {
                    return Err(raise(
                        ErrorKind::TypeError,
                        format!(
                            "'{}' not supported between instances of '{}' and '{}'",
                            op.symbol(),
                            lhs.type_name(),
                            rhs.type_name()
                        ),
                    ))
                }
            },
        },
    };
    use std::cmp::Ordering::{Equal, Greater, Less};
    Ok(match op {
        CmpOp::Eq => ordering == Some(Equal),
        CmpOp::Ne => ordering != Some(Equal),
        CmpOp::Lt => ordering == Some(Less),
        CmpOp::Gt => ordering == Some(Greater),
        CmpOp::Le => matches!(ordering, Some(Less | Equal)),
        CmpOp::Ge => matches!(ordering, Some(Greater | Equal)),
    })
}

fn subscript(target: &Value, index: &Value) -> EvalResult {
    let Some(Number::Int(i)) = index.as_number() else {
        return Err(raise(
            ErrorKind::TypeError,
            format!(
                "{} indices must be integers, not {}",
                target.type_name(),
                index.type_name()
            ),
        ));
    };
    let resolve = |len: usize| -> Option<usize> {
        let len = i64::try_from(len).ok()?;
        let pos = if i < 0 { i + len } else { i };
        if (0..len).contains(&pos) {
            usize::try_from(pos).ok()
        } else {
            None
        }
    };
    let out_of_range = || {
        raise(
            ErrorKind::IndexError,
            format!("{} index out of range", target.type_name()),
        )
    };
    match target {
        Value::List(items) => resolve(items.len())
            .map(|p| items[p].clone())
            .ok_or_else(out_of_range),
        Value::Bytes(bytes) => resolve(bytes.len())
            .map(|p| Value::Int(i64::from(bytes[p])))
            .ok_or_else(out_of_range),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            resolve(chars.len())
                .map(|p| Value::Str(chars[p].to_string()))
                .ok_or_else(out_of_range)
        }
        other => Err(raise(
            ErrorKind::TypeError,
            format!("'{}' object is not subscriptable", other.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ChunkData, OutputChunk};
    use super::*;

    /// Run cells in one environment, returning (stdout text, raw chunks, result of last cell).
    fn run(env: &mut Environment, source: &str) -> (String, Vec<OutputChunk>, Result<(), ExecutionError>) {
        let (out, mut rx) = OutputSender::channel();
        let result = run_cell(env, source, &out, &CancelFlag::new());
        drop(out);
        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        let text = chunks
            .iter()
            .filter_map(|c| match &c.data {
                ChunkData::Text(t) if c.stream == Stream::Stdout => Some(t.as_str()),
                _ => None,
            })
            .collect();
        (text, chunks, result)
    }

    fn eval_one(source: &str) -> String {
        let mut env = Environment::new();
        let (text, _, result) = run(&mut env, source);
        result.unwrap();
        text
    }

    fn error_of(source: &str) -> ExecutionError {
        let mut env = Environment::new();
        run(&mut env, source).2.unwrap_err()
    }

    #[test]
    fn bindings_persist_across_cells() {
        let mut env = Environment::new();
        run(&mut env, "x = 1").2.unwrap();
        let (text, _, result) = run(&mut env, "x");
        result.unwrap();
        assert_eq!(text, "1\n");
        assert_eq!(env.names().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn unbound_name_is_name_error() {
        let err = error_of("x");
        assert_eq!(err.kind, ErrorKind::NameError);
        assert_eq!(err.message, "name 'x' is not defined");
        assert_eq!(err.lines, (1, 1));
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval_one("1 + 2 * 3"), "7\n");
        assert_eq!(eval_one("2^10"), "1024\n");
        assert_eq!(eval_one("2**-1"), "0.5\n");
        assert_eq!(eval_one("7 / 2"), "3.5\n");
        assert_eq!(eval_one("-7 // 2"), "-4\n");
        assert_eq!(eval_one("-7 % 3"), "2\n");
        assert_eq!(eval_one("4 / 2"), "2.0\n");
        assert_eq!(eval_one("1 == 1.0"), "True\n");
        assert_eq!(eval_one("'a' < 'b'"), "True\n");
    }

    #[test]
    fn arithmetic_errors() {
        assert_eq!(error_of("1 / 0").kind, ErrorKind::ZeroDivisionError);
        assert_eq!(error_of("2 ** 100").kind, ErrorKind::OverflowError);
        assert_eq!(error_of("1 + 'a'").kind, ErrorKind::TypeError);
        assert_eq!(error_of("'a' < 1").kind, ErrorKind::TypeError);
        assert_eq!(error_of("5(1+2)").kind, ErrorKind::TypeError);
        assert_eq!(error_of("'ab' * 100000000").kind, ErrorKind::MemoryError);
    }

    #[test]
    fn repetition_of_sequences() {
        assert_eq!(eval_one("[1, 'a'] * 3"), "[1, 'a', 1, 'a', 1, 'a']\n");
        assert_eq!(eval_one("2 * [[]]"), "[[], []]\n");
        assert_eq!(eval_one("'ab' * 3"), "'ababab'\n");
        assert_eq!(eval_one("b'xy' * 2"), "b'xyxy'\n");
        assert_eq!(eval_one("[1] * -2"), "[]\n");
        assert_eq!(eval_one("'ab' * 0"), "''\n");
        assert_eq!(eval_one("b'x' * -1"), "b''\n");
        assert_eq!(eval_one("[] * 1000000000000"), "[]\n");
        assert_eq!(eval_one("len([None] * 1000)"), "1000\n");
    }

    #[test]
    fn large_results_raise_memory_error() {
        let err = error_of("[1] * 100000000");
        assert_eq!(err.kind, ErrorKind::MemoryError);
        assert_eq!(err.message, "result is too large");
        // Each element is small but the repeated list carries its strings.
        assert_eq!(error_of("['x' * 1000000] * 100").kind, ErrorKind::MemoryError);
        assert_eq!(error_of("b'ab' * 100000000").kind, ErrorKind::MemoryError);
        assert_eq!(error_of("'a' * 9223372036854775807").kind, ErrorKind::MemoryError);
    }

    #[test]
    fn concatenation_is_capped() {
        let err = error_of("s = 'x' * 40000000\nt = s + s");
        assert_eq!(err.kind, ErrorKind::MemoryError);
        assert_eq!(err.lines, (2, 2));
        assert_eq!(
            error_of("b = b'x' * 40000000\nb + b").kind,
            ErrorKind::MemoryError
        );
        assert_eq!(
            error_of("l = ['x' * 40000000]\nl + l").kind,
            ErrorKind::MemoryError
        );
        assert_eq!(
            error_of("s = 'x' * 40000000\n[s, s]").kind,
            ErrorKind::MemoryError
        );
        assert_eq!(eval_one("'ab' + 'cd'"), "'abcd'\n");
    }

    #[test]
    fn long_operator_chains_evaluate() {
        let source = format!("1{}", " + 1".repeat(50_000));
        assert_eq!(eval_one(&source), "50001\n");
        assert_eq!(eval_one("2 - 3 - 4"), "-5\n");
        assert_eq!(eval_one("2 ** 3 ** 2"), "512\n");
    }

    #[test]
    fn deeply_nested_lists_are_refused() {
        let mut env = Environment::new();
        let (_, _, result) = run(&mut env, "l = []\nfor i in range(100000): l = [l]");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MemoryError);
        assert_eq!(err.message, "list is nested too deeply");
        assert!(matches!(env.get("l"), Some(Value::List(_))));
    }

    #[test]
    fn runtime_error_keeps_earlier_bindings() {
        let mut env = Environment::new();
        let err = run(&mut env, "a = 1\nb = a / 0\nc = 3").2.unwrap_err();
        assert_eq!(err.lines, (2, 2));
        assert_eq!(err.to_string(), "Error in lines 2-2\nZeroDivisionError: division by zero");
        assert_eq!(env.get("a"), Some(&Value::Int(1)));
        assert!(env.get("c").is_none());
    }

    #[test]
    fn syntax_error_runs_nothing() {
        let mut env = Environment::new();
        let err = run(&mut env, "a = 1\ny=3x^2x").2.unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert!(env.is_empty());
    }

    #[test]
    fn unicode_strings_echo_their_repr() {
        assert_eq!(eval_one("u\"\u{e4}\u{f6}\u{fc}\u{df}\""), "'\u{e4}\u{f6}\u{fc}\u{df}'\n");
        assert_eq!(eval_one("\"\u{e4}\u{f6}\u{fc}\u{df}\""), "'\u{e4}\u{f6}\u{fc}\u{df}'\n");
        assert_eq!(eval_one("\"it's\""), "\"it's\"\n");
        assert_eq!(eval_one("'a\\nb'"), "'a\\nb'\n");
    }

    #[test]
    fn for_loop_prints_each_item() {
        assert_eq!(
            eval_one("for x in [u\"\u{e1}\u{e1}\u{e1}\", \"\u{e1}\u{e1}\u{e1}\"]: print(x)"),
            "\u{e1}\u{e1}\u{e1}\n\u{e1}\u{e1}\u{e1}\n"
        );
        assert_eq!(eval_one("t = 0\nfor i in range(5): t = t + i\nt"), "10\n");
    }

    #[test]
    fn print_sends_bytes_raw() {
        let mut env = Environment::new();
        let (_, chunks, result) = run(&mut env, "print(b'\\xe1')");
        result.unwrap();
        assert_eq!(
            chunks,
            vec![
                OutputChunk {
                    stream: Stream::Stdout,
                    data: ChunkData::Bytes(vec![0xE1]),
                },
                OutputChunk {
                    stream: Stream::Stdout,
                    data: ChunkData::Text("\n".into()),
                },
            ]
        );
    }

    #[test]
    fn encode_and_decode_builtins() {
        assert_eq!(eval_one("encode('\u{e4}', 'latin-1')"), "b'\\xe4'\n");
        assert_eq!(eval_one("encode('x = \u{127}', 'latin-1')"), "b'x = ?'\n");
        assert_eq!(eval_one("decode(b'\\xc3\\xa4')"), "'\u{e4}'\n");
        assert_eq!(eval_one("decode(b'\\xe1', 'utf-8')"), "'\u{fffd}'\n");
        assert_eq!(error_of("encode('a', 'klingon')").kind, ErrorKind::ValueError);
        assert_eq!(error_of("decode('a')").kind, ErrorKind::TypeError);
    }

    #[test]
    fn builtins_and_indexing() {
        assert_eq!(eval_one("len('\u{e4}\u{f6}')"), "2\n");
        assert_eq!(eval_one("len(range(3, 10))"), "7\n");
        assert_eq!(eval_one("[1, 2, 3][-1]"), "3\n");
        assert_eq!(eval_one("'abc'[1]"), "'b'\n");
        assert_eq!(eval_one("repr(1.5)"), "'1.5'\n");
        assert_eq!(eval_one("str([1, 'a'])"), "\"[1, 'a']\"\n");
        assert_eq!(eval_one("print"), "<built-in function print>\n");
        assert_eq!(error_of("[1][5]").kind, ErrorKind::IndexError);
        assert_eq!(error_of("len(1, 2)").kind, ErrorKind::TypeError);
    }

    #[test]
    fn print_returns_none_and_is_not_echoed() {
        assert_eq!(eval_one("print('a', 1, 2.5)"), "a 1 2.5\n");
        assert_eq!(eval_one("None"), "");
    }

    #[test]
    fn cancelled_run_is_interrupted() {
        let mut env = Environment::new();
        let (out, _rx) = OutputSender::channel();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = run_cell(&mut env, "for i in range(1000000000): x = i", &out, &cancel)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyboardInterrupt);
    }

    #[test]
    fn float_formatting() {
        assert_eq!(float_repr(2.0), "2.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(f64::INFINITY), "inf");
        assert_eq!(float_repr(1e20), "1e20");
    }
}
