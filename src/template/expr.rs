//! Implementation of `expr(...)` parameter expressions.
//!
//! A parameter whose value is of the form `expr(<expression>)` is computed
//! from other parameters once every name it references has been resolved.
//!
//! The expression language supports:
//!
//! * integer, float, string (single or double quoted) and boolean literals;
//! * parameter names;
//! * arithmetic: `+`, `-`, `*`, `/` (always a float), `//` (floor), `%`
//!   (sign of the divisor) and `**`;
//! * comparisons: `==`, `!=`, `<`, `<=`, `>`, `>=`;
//! * logic: `and`/`&&`, `or`/`||`, `not`/`!`;
//! * the functions `min`, `max`, `abs`, `round`, `floor`, `ceil`, `int`,
//!   `float` and `str`.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;

use logos::Logos;

use crate::value::Value;

/// The prefix of an expression value.
const EXPR_PREFIX: &str = "expr(";

/// Gets the body of an `expr(...)` value.
///
/// Returns `None` if the value is not an expression.
pub fn body(s: &str) -> Option<&str> {
    s.trim().strip_prefix(EXPR_PREFIX)?.strip_suffix(')')
}

/// An error that occurs while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    /// The expression contains an unrecognized character.
    #[error("unexpected character `{found}` at offset {offset}")]
    Lex {
        /// The unrecognized text.
        found: String,
        /// The byte offset of the text.
        offset: usize,
    },
    /// The expression is malformed.
    #[error("unexpected `{found}` at offset {offset}: expected {expected}")]
    Syntax {
        /// The text of the unexpected token.
        found: String,
        /// The byte offset of the token.
        offset: usize,
        /// A description of what was expected.
        expected: &'static str,
    },
    /// The expression ended early.
    #[error("unexpected end of expression: expected {expected}")]
    Eof {
        /// A description of what was expected.
        expected: &'static str,
    },
    /// The expression references an unknown parameter.
    #[error("unknown parameter `{0}`")]
    UnknownName(String),
    /// The expression calls an unknown function.
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    /// A function was called with the wrong number of arguments.
    #[error("function `{name}` expects {expected} but {found} were supplied")]
    Arity {
        /// The function name.
        name: String,
        /// A description of the accepted argument count.
        expected: &'static str,
        /// The number of supplied arguments.
        found: usize,
    },
    /// A binary operator was applied to unsupported operands.
    #[error("cannot apply `{op}` to {lhs} and {rhs}")]
    Type {
        /// The operator.
        op: BinaryOp,
        /// The type of the left operand.
        lhs: &'static str,
        /// The type of the right operand.
        rhs: &'static str,
    },
    /// A unary operator or function was applied to an unsupported operand.
    #[error("cannot apply `{op}` to {operand}")]
    UnaryType {
        /// The operator or function name.
        op: String,
        /// The type of the operand.
        operand: &'static str,
    },
    /// A division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Integer arithmetic overflowed.
    #[error("integer overflow")]
    Overflow,
    /// A string could not be converted to a number.
    #[error("cannot convert `{0}` to a number")]
    Conversion(String),
}

/// Represents a token of the expression language.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    /// An integer literal.
    #[regex(r"[0-9]+")]
    Integer,
    /// A float literal.
    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?")]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+")]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?")]
    Float,
    /// A string literal.
    #[regex(r#""([^"\\]|\\.)*""#)]
    #[regex(r"'([^'\\]|\\.)*'")]
    String,
    /// The `true` keyword.
    #[token("true")]
    #[token("True")]
    True,
    /// The `false` keyword.
    #[token("false")]
    #[token("False")]
    False,
    /// The logical and operator.
    #[token("and")]
    #[token("&&")]
    And,
    /// The logical or operator.
    #[token("or")]
    #[token("||")]
    Or,
    /// The logical not operator.
    #[token("not")]
    #[token("!")]
    Not,
    /// An identifier.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
    /// The `+` symbol.
    #[token("+")]
    Plus,
    /// The `-` symbol.
    #[token("-")]
    Minus,
    /// The `*` symbol.
    #[token("*")]
    Star,
    /// The `**` symbol.
    #[token("**")]
    StarStar,
    /// The `/` symbol.
    #[token("/")]
    Slash,
    /// The `//` symbol.
    #[token("//")]
    SlashSlash,
    /// The `%` symbol.
    #[token("%")]
    Percent,
    /// The `==` symbol.
    #[token("==")]
    Equal,
    /// The `!=` symbol.
    #[token("!=")]
    NotEqual,
    /// The `<` symbol.
    #[token("<")]
    Less,
    /// The `<=` symbol.
    #[token("<=")]
    LessEqual,
    /// The `>` symbol.
    #[token(">")]
    Greater,
    /// The `>=` symbol.
    #[token(">=")]
    GreaterEqual,
    /// The `(` symbol.
    #[token("(")]
    OpenParen,
    /// The `)` symbol.
    #[token(")")]
    CloseParen,
    /// The `,` symbol.
    #[token(",")]
    Comma,
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `or`
    Or,
    /// `and`
    And,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `//`
    FloorDivide,
    /// `%`
    Remainder,
    /// `**`
    Power,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::FloorDivide => "//",
            Self::Remainder => "%",
            Self::Power => "**",
        };

        write!(f, "{s}")
    }
}

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `not`
    Not,
    /// `-`
    Negate,
    /// `+`
    Plus,
}

/// Represents a parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value.
    Literal(Value),
    /// A reference to a parameter.
    Name(String),
    /// A unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// A binary operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// A function call.
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Parses an expression.
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let mut tokens = Vec::new();
        let mut lexer = Token::lexer(source);
        while let Some(token) = lexer.next() {
            match token {
                Ok(token) => tokens.push((token, lexer.span())),
                Err(()) => {
                    return Err(ExprError::Lex {
                        found: lexer.slice().to_string(),
                        offset: lexer.span().start,
                    });
                }
            }
        }

        let mut parser = Parser {
            source,
            tokens,
            next: 0,
        };
        let expr = parser.or()?;
        if let Some((_, span)) = parser.peek() {
            return Err(ExprError::Syntax {
                found: source[span.clone()].to_string(),
                offset: span.start,
                expected: "an operator or the end of the expression",
            });
        }

        Ok(expr)
    }

    /// Gets the parameter names referenced by the expression.
    pub fn names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    /// Collects the referenced parameter names into the given list.
    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::Name(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            Self::Unary(_, operand) => operand.collect_names(names),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_names(names);
                rhs.collect_names(names);
            }
            Self::Call(_, args) => args.iter().for_each(|a| a.collect_names(names)),
        }
    }

    /// Evaluates the expression, looking up parameters with the given
    /// function.
    pub fn eval(&self, lookup: &impl Fn(&str) -> Option<Value>) -> Result<Value, ExprError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Name(name) => lookup(name).ok_or_else(|| ExprError::UnknownName(name.clone())),
            Self::Unary(op, operand) => {
                let value = operand.eval(lookup)?;
                match op {
                    UnaryOp::Not => Ok(Value::Boolean(!value.is_truthy())),
                    UnaryOp::Plus => Num::try_from_value(&value, "+").map(Num::into_value),
                    UnaryOp::Negate => match Num::try_from_value(&value, "-")? {
                        Num::Integer(i) => i
                            .checked_neg()
                            .map(Value::Integer)
                            .ok_or(ExprError::Overflow),
                        Num::Float(f) => Ok(Value::Float(-f)),
                    },
                }
            }
            Self::Binary(BinaryOp::And, lhs, rhs) => {
                if !lhs.eval(lookup)?.is_truthy() {
                    return Ok(Value::Boolean(false));
                }

                Ok(Value::Boolean(rhs.eval(lookup)?.is_truthy()))
            }
            Self::Binary(BinaryOp::Or, lhs, rhs) => {
                if lhs.eval(lookup)?.is_truthy() {
                    return Ok(Value::Boolean(true));
                }

                Ok(Value::Boolean(rhs.eval(lookup)?.is_truthy()))
            }
            Self::Binary(op, lhs, rhs) => binary(*op, lhs.eval(lookup)?, rhs.eval(lookup)?),
            Self::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|a| a.eval(lookup))
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, args)
            }
        }
    }
}

/// A recursive descent parser over lexed tokens.
struct Parser<'a> {
    /// The expression source.
    source: &'a str,
    /// The lexed tokens and their spans.
    tokens: Vec<(Token, Range<usize>)>,
    /// The index of the next token.
    next: usize,
}

impl Parser<'_> {
    /// Peeks at the next token.
    fn peek(&self) -> Option<&(Token, Range<usize>)> {
        self.tokens.get(self.next)
    }

    /// Consumes the next token if it is one of the given tokens.
    fn eat(&mut self, expected: &[Token]) -> Option<Token> {
        let (token, _) = self.peek()?;
        if expected.contains(token) {
            let token = *token;
            self.next += 1;
            return Some(token);
        }

        None
    }

    /// Consumes the next token, failing if there is none.
    fn bump(&mut self, expected: &'static str) -> Result<(Token, Range<usize>), ExprError> {
        let token = self
            .tokens
            .get(self.next)
            .cloned()
            .ok_or(ExprError::Eof { expected })?;
        self.next += 1;
        Ok(token)
    }

    /// Builds a syntax error for the given span.
    fn unexpected(&self, span: Range<usize>, expected: &'static str) -> ExprError {
        ExprError::Syntax {
            found: self.source[span.clone()].to_string(),
            offset: span.start,
            expected,
        }
    }

    /// Parses a disjunction.
    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.and()?;
        while self.eat(&[Token::Or]).is_some() {
            let rhs = self.and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    /// Parses a conjunction.
    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.not()?;
        while self.eat(&[Token::And]).is_some() {
            let rhs = self.not()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    /// Parses a logical negation.
    fn not(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&[Token::Not]).is_some() {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.not()?)));
        }

        self.comparison()
    }

    /// Parses a comparison; comparisons do not chain.
    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.additive()?;
        let op = match self.eat(&[
            Token::Equal,
            Token::NotEqual,
            Token::Less,
            Token::LessEqual,
            Token::Greater,
            Token::GreaterEqual,
        ]) {
            Some(Token::Equal) => BinaryOp::Equal,
            Some(Token::NotEqual) => BinaryOp::NotEqual,
            Some(Token::Less) => BinaryOp::Less,
            Some(Token::LessEqual) => BinaryOp::LessEqual,
            Some(Token::Greater) => BinaryOp::Greater,
            Some(Token::GreaterEqual) => BinaryOp::GreaterEqual,
            _ => return Ok(lhs),
        };

        let rhs = self.additive()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    /// Parses an addition or subtraction.
    fn additive(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.multiplicative()?;
        while let Some(token) = self.eat(&[Token::Plus, Token::Minus]) {
            let op = if token == Token::Plus {
                BinaryOp::Add
            } else {
                BinaryOp::Subtract
            };
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    /// Parses a multiplication, division or remainder.
    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        while let Some(token) =
            self.eat(&[Token::Star, Token::Slash, Token::SlashSlash, Token::Percent])
        {
            let op = match token {
                Token::Star => BinaryOp::Multiply,
                Token::Slash => BinaryOp::Divide,
                Token::SlashSlash => BinaryOp::FloorDivide,
                _ => BinaryOp::Remainder,
            };
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    /// Parses a unary plus or minus.
    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.eat(&[Token::Minus, Token::Plus]) {
            Some(Token::Minus) => Ok(Expr::Unary(UnaryOp::Negate, Box::new(self.unary()?))),
            Some(_) => Ok(Expr::Unary(UnaryOp::Plus, Box::new(self.unary()?))),
            None => self.power(),
        }
    }

    /// Parses an exponentiation, which is right associative and binds
    /// tighter than a unary minus on its left.
    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.primary()?;
        if self.eat(&[Token::StarStar]).is_some() {
            let exponent = self.unary()?;
            return Ok(Expr::Binary(
                BinaryOp::Power,
                Box::new(base),
                Box::new(exponent),
            ));
        }

        Ok(base)
    }

    /// Parses a literal, name, call or parenthesized expression.
    fn primary(&mut self) -> Result<Expr, ExprError> {
        const EXPECTED: &str = "a literal, a parameter name, or `(`";

        let (token, span) = self.bump(EXPECTED)?;
        let source = self.source;
        let text = &source[span.clone()];
        match token {
            Token::Integer => text
                .parse()
                .map(|i| Expr::Literal(Value::Integer(i)))
                .map_err(|_| ExprError::Overflow),
            Token::Float => text
                .parse()
                .map(|f| Expr::Literal(Value::Float(f)))
                .map_err(|_| self.unexpected(span, EXPECTED)),
            Token::String => Ok(Expr::Literal(Value::String(unquote(text)))),
            Token::True => Ok(Expr::Literal(Value::Boolean(true))),
            Token::False => Ok(Expr::Literal(Value::Boolean(false))),
            Token::Ident => {
                if self.eat(&[Token::OpenParen]).is_none() {
                    return Ok(Expr::Name(text.to_string()));
                }

                let mut args = Vec::new();
                if self.eat(&[Token::CloseParen]).is_some() {
                    return Ok(Expr::Call(text.to_string(), args));
                }

                loop {
                    args.push(self.or()?);
                    let (token, span) = self.bump("`,` or `)`")?;
                    match token {
                        Token::Comma => continue,
                        Token::CloseParen => break,
                        _ => return Err(self.unexpected(span, "`,` or `)`")),
                    }
                }

                Ok(Expr::Call(text.to_string(), args))
            }
            Token::OpenParen => {
                let expr = self.or()?;
                let (token, span) = self.bump("`)`")?;
                if token != Token::CloseParen {
                    return Err(self.unexpected(span, "`)`"));
                }

                Ok(expr)
            }
            _ => Err(self.unexpected(span, EXPECTED)),
        }
    }
}

/// Removes the quotes from a string literal and processes escapes.
fn unquote(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some(c) => result.push(c),
            None => result.push('\\'),
        }
    }

    result
}

/// A numeric operand.
#[derive(Debug, Clone, Copy)]
enum Num {
    /// An integer.
    Integer(i64),
    /// A float.
    Float(f64),
}

impl Num {
    /// Converts a value into a number for the given operator.
    fn try_from_value(value: &Value, op: &str) -> Result<Self, ExprError> {
        match value {
            Value::Integer(i) => Ok(Self::Integer(*i)),
            Value::Float(f) => Ok(Self::Float(*f)),
            _ => Err(ExprError::UnaryType {
                op: op.to_string(),
                operand: value.type_name(),
            }),
        }
    }

    /// Gets the number as a float.
    fn as_f64(self) -> f64 {
        match self {
            Self::Integer(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    /// Converts the number into a value.
    fn into_value(self) -> Value {
        match self {
            Self::Integer(i) => Value::Integer(i),
            Self::Float(f) => Value::Float(f),
        }
    }
}

/// Gets both operands as numbers, if they are.
fn numbers(lhs: &Value, rhs: &Value) -> Option<(Num, Num)> {
    let num = |v: &Value| match v {
        Value::Integer(i) => Some(Num::Integer(*i)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    };

    Some((num(lhs)?, num(rhs)?))
}

/// Compares two values.
///
/// Returns `None` if the values are not comparable.
fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        _ => {
            let (a, b) = numbers(lhs, rhs)?;
            a.as_f64().partial_cmp(&b.as_f64())
        }
    }
}

/// Applies a (non short-circuiting) binary operator.
fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, ExprError> {
    let type_error = |lhs: &Value, rhs: &Value| ExprError::Type {
        op,
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    };

    match op {
        BinaryOp::Equal => return Ok(Value::Boolean(compare(&lhs, &rhs) == Some(Ordering::Equal))),
        BinaryOp::NotEqual => {
            return Ok(Value::Boolean(compare(&lhs, &rhs) != Some(Ordering::Equal)));
        }
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let ordering = compare(&lhs, &rhs).ok_or_else(|| type_error(&lhs, &rhs))?;
            let result = match op {
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::LessEqual => ordering.is_le(),
                BinaryOp::Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            return Ok(Value::Boolean(result));
        }
        BinaryOp::Add => {
            if let (Value::String(a), Value::String(b)) = (&lhs, &rhs) {
                return Ok(Value::String(format!("{a}{b}")));
            }
        }
        _ => {}
    }

    let (a, b) = numbers(&lhs, &rhs).ok_or_else(|| type_error(&lhs, &rhs))?;
    match (a, b) {
        (Num::Integer(a), Num::Integer(b)) => integer_binary(op, a, b),
        (a, b) => float_binary(op, a.as_f64(), b.as_f64()),
    }
}

/// Applies an arithmetic operator to integers.
fn integer_binary(op: BinaryOp, a: i64, b: i64) -> Result<Value, ExprError> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Subtract => a.checked_sub(b),
        BinaryOp::Multiply => a.checked_mul(b),
        BinaryOp::Divide => return float_binary(op, a as f64, b as f64),
        BinaryOp::FloorDivide | BinaryOp::Remainder if b == 0 => {
            return Err(ExprError::DivisionByZero);
        }
        BinaryOp::FloorDivide => {
            let q = a.checked_div(b).ok_or(ExprError::Overflow)?;
            // Round toward negative infinity
            if a % b != 0 && ((a < 0) != (b < 0)) {
                Some(q - 1)
            } else {
                Some(q)
            }
        }
        BinaryOp::Remainder => {
            let r = a.checked_rem(b).ok_or(ExprError::Overflow)?;
            // The result takes the sign of the divisor
            if r != 0 && ((r < 0) != (b < 0)) {
                Some(r + b)
            } else {
                Some(r)
            }
        }
        BinaryOp::Power => match u32::try_from(b) {
            Ok(exp) => a.checked_pow(exp),
            Err(_) if b < 0 => return float_binary(op, a as f64, b as f64),
            Err(_) => None,
        },
        _ => unreachable!("operator `{op}` is not arithmetic"),
    };

    result.map(Value::Integer).ok_or(ExprError::Overflow)
}

/// Applies an arithmetic operator to floats.
fn float_binary(op: BinaryOp, a: f64, b: f64) -> Result<Value, ExprError> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide | BinaryOp::FloorDivide | BinaryOp::Remainder if b == 0.0 => {
            return Err(ExprError::DivisionByZero);
        }
        BinaryOp::Divide => a / b,
        BinaryOp::FloorDivide => (a / b).floor(),
        BinaryOp::Remainder => a - b * (a / b).floor(),
        BinaryOp::Power => a.powf(b),
        _ => unreachable!("operator `{op}` is not arithmetic"),
    };

    Ok(Value::Float(result))
}

/// Calls a built-in function.
fn call(name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
    let arity = |expected: &'static str| ExprError::Arity {
        name: name.to_string(),
        expected,
        found: args.len(),
    };

    match name {
        "min" | "max" => {
            let mut iter = args.iter();
            let mut best = iter.next().ok_or_else(|| arity("at least one argument"))?;
            for candidate in iter {
                let ordering = compare(candidate, best).ok_or_else(|| ExprError::Type {
                    op: BinaryOp::Less,
                    lhs: candidate.type_name(),
                    rhs: best.type_name(),
                })?;
                if (name == "min" && ordering.is_lt()) || (name == "max" && ordering.is_gt()) {
                    best = candidate;
                }
            }

            Ok(best.clone())
        }
        "abs" => match single(&args).ok_or_else(|| arity("one argument"))? {
            Value::Integer(i) => i.checked_abs().map(Value::Integer).ok_or(ExprError::Overflow),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => Err(unary_type(name, other)),
        },
        "round" => match args.as_slice() {
            [value] => rounded(name, value, f64::round_ties_even),
            [value, digits] => {
                let x = Num::try_from_value(value, name)?.as_f64();
                let digits = digits
                    .as_integer()
                    .filter(|_| matches!(digits, Value::Integer(_)))
                    .ok_or_else(|| unary_type(name, digits))?;
                let factor = 10f64.powi(i32::try_from(digits).map_err(|_| ExprError::Overflow)?);
                Ok(Value::Float((x * factor).round_ties_even() / factor))
            }
            _ => Err(arity("one or two arguments")),
        },
        "floor" => rounded(name, single(&args).ok_or_else(|| arity("one argument"))?, f64::floor),
        "ceil" => rounded(name, single(&args).ok_or_else(|| arity("one argument"))?, f64::ceil),
        "int" => match single(&args).ok_or_else(|| arity("one argument"))? {
            Value::Integer(i) => Ok(Value::Integer(*i)),
            Value::Float(f) => float_to_integer(f.trunc()),
            Value::Boolean(b) => Ok(Value::Integer(i64::from(*b))),
            Value::String(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    return Ok(Value::Integer(i));
                }

                let f = s
                    .parse::<f64>()
                    .map_err(|_| ExprError::Conversion(s.to_string()))?;
                float_to_integer(f.trunc())
            }
        },
        "float" => match single(&args).ok_or_else(|| arity("one argument"))? {
            Value::Integer(i) => Ok(Value::Float(*i as f64)),
            Value::Float(f) => Ok(Value::Float(*f)),
            Value::Boolean(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
            Value::String(s) => s
                .trim()
                .parse()
                .map(Value::Float)
                .map_err(|_| ExprError::Conversion(s.clone())),
        },
        "str" => Ok(Value::String(
            single(&args)
                .ok_or_else(|| arity("one argument"))?
                .to_string(),
        )),
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}

/// Gets the only argument of a call.
fn single(args: &[Value]) -> Option<&Value> {
    match args {
        [value] => Some(value),
        _ => None,
    }
}

/// Builds a type error for a function applied to the given value.
fn unary_type(name: &str, value: &Value) -> ExprError {
    ExprError::UnaryType {
        op: name.to_string(),
        operand: value.type_name(),
    }
}

/// Applies a rounding function and converts the result to an integer.
fn rounded(name: &str, value: &Value, f: fn(f64) -> f64) -> Result<Value, ExprError> {
    match Num::try_from_value(value, name)? {
        Num::Integer(i) => Ok(Value::Integer(i)),
        Num::Float(x) => float_to_integer(f(x)),
    }
}

/// Converts an integral float to an integer value.
fn float_to_integer(f: f64) -> Result<Value, ExprError> {
    if !f.is_finite() || f < i64::MIN as f64 || f > i64::MAX as f64 {
        return Err(ExprError::Overflow);
    }

    Ok(Value::Integer(f as i64))
}
