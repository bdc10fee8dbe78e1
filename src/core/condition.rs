//! Step conditions.
//!
//! A condition is a small boolean expression over prior step outputs:
//!
//! ```text
//! search.count > 0 && !exists(stats.error)
//! len(search) >= 3 || analysis.status == "completed"
//! ```
//!
//! Operands are references (`step.path`), string literals in single or
//! double quotes, numbers, `true`, `false` and `null`. A bare operand is
//! tested for truthiness. Missing paths evaluate to `null`.

use crate::core::reference::Reference;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Len,
    Exists,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ref(Reference),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Call(Func, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    LParen,
    RParen,
    Not,
    And,
    Or,
    Cmp(CmpOp),
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' | '<' => {
                let op = match (c, next == Some('=')) {
                    ('>', true) => CmpOp::Ge,
                    ('>', false) => CmpOp::Gt,
                    ('<', true) => CmpOp::Le,
                    _ => CmpOp::Lt,
                };
                tokens.push(Token::Cmp(op));
                i += if next == Some('=') { 2 } else { 1 };
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            if let Some(&escaped) = chars.get(i + 1) {
                                text.push(escaped);
                            }
                            i += 2;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '-' | '.'))
                {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

/// Nesting limit for parentheses, `!` and function calls.
const MAX_DEPTH: usize = 64;
/// Token limit; also bounds the length of `&&`/`||` chains.
const MAX_TOKENS: usize = 512;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect_rparen(&mut self) -> Result<(), String> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            _ => Err("expected ')'".to_string()),
        }
    }

    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("condition nested too deeply".to_string());
        }
        Ok(())
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            left = Expr::And(Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            self.descend()?;
            let inner = self.or()?;
            self.expect_rparen()?;
            self.depth -= 1;
            return Ok(inner);
        }
        let left = self.operand()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.operand()?;
            return Ok(Expr::Compare(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn operand(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Word(word)) => {
                let func = match word.as_str() {
                    "len" => Some(Func::Len),
                    "exists" => Some(Func::Exists),
                    _ => None,
                };
                if let (Some(func), Some(Token::LParen)) = (func, self.peek()) {
                    self.pos += 1;
                    self.descend()?;
                    let arg = self.operand()?;
                    self.expect_rparen()?;
                    self.depth -= 1;
                    return Ok(Expr::Call(func, Box::new(arg)));
                }
                word_operand(&word)
            }
            Some(other) => Err(format!("unexpected token {:?}", other)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn word_operand(word: &str) -> Result<Expr, String> {
    match word {
        "true" => return Ok(Expr::Literal(Value::Bool(true))),
        "false" => return Ok(Expr::Literal(Value::Bool(false))),
        "null" => return Ok(Expr::Literal(Value::Null)),
        _ => {}
    }
    if let Ok(n) = word.parse::<i64>() {
        return Ok(Expr::Literal(Value::from(n)));
    }
    if let Ok(f) = word.parse::<f64>() {
        return Ok(Expr::Literal(Value::from(f)));
    }
    Reference::parse(word).map(Expr::Ref)
}

/// JSON truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match op {
        CmpOp::Eq => ordering.map(|o| o == Ordering::Equal).unwrap_or(left == right),
        CmpOp::Ne => !ordering.map(|o| o == Ordering::Equal).unwrap_or(left == right),
        CmpOp::Gt => ordering == Some(Ordering::Greater),
        CmpOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        CmpOp::Lt => ordering == Some(Ordering::Less),
        CmpOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
    }
}

impl Expr {
    fn eval<F>(&self, resolve: &F) -> Value
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Ref(r) => resolve(r).unwrap_or(Value::Null),
            Expr::Not(inner) => Value::Bool(!truthy(&inner.eval(resolve))),
            Expr::And(a, b) => Value::Bool(truthy(&a.eval(resolve)) && truthy(&b.eval(resolve))),
            Expr::Or(a, b) => Value::Bool(truthy(&a.eval(resolve)) || truthy(&b.eval(resolve))),
            Expr::Compare(a, op, b) => Value::Bool(compare(&a.eval(resolve), *op, &b.eval(resolve))),
            Expr::Call(Func::Exists, arg) => Value::Bool(!arg.eval(resolve).is_null()),
            Expr::Call(Func::Len, arg) => {
                let len = match arg.eval(resolve) {
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    Value::Object(map) => map.len(),
                    _ => 0,
                };
                Value::from(len)
            }
        }
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ref(r) => out.push(r),
            Expr::Not(inner) | Expr::Call(_, inner) => inner.collect_refs(out),
            Expr::And(a, b) | Expr::Or(a, b) | Expr::Compare(a, _, b) => {
                a.collect_refs(out);
                b.collect_refs(out);
            }
        }
    }
}

/// A parsed condition together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, String> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err("empty condition".to_string());
        }
        if tokens.len() > MAX_TOKENS {
            return Err(format!("condition longer than {} tokens", MAX_TOKENS));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.or()?;
        if parser.pos < parser.tokens.len() {
            return Err(format!("unexpected trailing input in '{}'", source));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every step reference the condition reads.
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.expr.collect_refs(&mut refs);
        refs
    }

    pub fn evaluate<F>(&self, resolve: &F) -> bool
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        truthy(&self.expr.eval(resolve))
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Condition::parse(&source).map_err(serde::de::Error::custom)
    }
}
