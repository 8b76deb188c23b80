//! Boolean predicates over resource properties.
//!
//! Predicates are parsed once, at normalization time, into a small expression
//! tree and then evaluated against [`Resource`]s without touching text again.
//!
//! ```text
//! expr    := or
//! or      := and ( OR and )*
//! and     := not ( AND not )*
//! not     := NOT not | primary
//! primary := '(' expr ')' | IDENT op value
//! ```
//!
//! `=`/`!=` compare strings or integers exactly. `<`, `<=`, `>`, `>=` compare
//! integers only. A resource that lacks the property never matches.
//!
//! Strings are quoted with `'` or `"`; a doubled quote inside stands for
//! itself, as in SQL.

use std::fmt;

use logos::Logos;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedError};
use crate::resource::{PropertyValue, Resource};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("AND", ignore(ascii_case))]
    #[token("&&")]
    And,
    #[token("OR", ignore(ascii_case))]
    #[token("||")]
    Or,
    #[token("NOT", ignore(ascii_case))]
    #[token("!")]
    Not,
    #[token("=")]
    #[token("==")]
    Eq,
    #[token("!=")]
    #[token("<>")]
    Ne,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),
    #[regex(r"'([^']|'')*'", |lex| unquote(lex.slice()))]
    #[regex(r#""([^"]|"")*""#, |lex| unquote(lex.slice()))]
    Str(String),
    #[regex(r"[A-Za-z_][A-Za-z0-9_.\-]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn unquote(s: &str) -> String {
    let quote = &s[..1];
    s[1..s.len() - 1].replace(&quote.repeat(2), quote)
}

/// Deepest nesting of parentheses and `NOT` accepted.
const MAX_DEPTH: usize = 64;
/// Longest predicate accepted, in tokens.
const MAX_TOKENS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    True,
    Compare {
        property: String,
        op: CompareOp,
        value: PropertyValue,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(property: &str, value: impl Into<PropertyValue>) -> Self {
        Predicate::Compare {
            property: property.to_string(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    /// Conjunction that folds away `True` operands.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::True, p) | (p, Predicate::True) => p,
            (a, b) => Predicate::And(Box::new(a), Box::new(b)),
        }
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Compare {
                property,
                op,
                value,
            } => match resource.property(property) {
                Some(actual) => compare(&actual, *op, value),
                None => false,
            },
            Predicate::And(a, b) => a.matches(resource) && b.matches(resource),
            Predicate::Or(a, b) => a.matches(resource) || b.matches(resource),
            Predicate::Not(p) => !p.matches(resource),
        }
    }
}

fn compare(actual: &PropertyValue, op: CompareOp, expected: &PropertyValue) -> bool {
    if op == CompareOp::Eq {
        return actual.loosely_equals(expected);
    }
    if op == CompareOp::Ne {
        return !actual.loosely_equals(expected);
    }
    let (Some(a), Some(b)) = (actual.as_int(), expected.as_int()) else {
        return false;
    };
    match op {
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        _ => a >= b,
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => f.write_str("TRUE"),
            Predicate::Compare {
                property,
                op,
                value,
            } => match value {
                PropertyValue::Int(i) => write!(f, "{} {} {}", property, op, i),
                PropertyValue::Str(s) => {
                    write!(f, "{} {} '{}'", property, op, s.replace('\'', "''"))
                }
            },
            Predicate::And(a, b) => write!(f, "({} AND {})", a, b),
            Predicate::Or(a, b) => write!(f, "({} OR {})", a, b),
            Predicate::Not(p) => write!(f, "NOT {}", p),
        }
    }
}

/// Parse a textual predicate. Blank input yields [`Predicate::True`].
pub fn parse(input: &str) -> Result<Predicate> {
    if input.trim().is_empty() {
        return Ok(Predicate::True);
    }

    let mut tokens = Vec::new();
    for (token, span) in Token::lexer(input).spanned() {
        match token {
            Ok(t) => tokens.push(t),
            Err(()) => {
                return Err(SchedError::MalformedRequest(format!(
                    "invalid token at offset {} in predicate '{}'",
                    span.start, input
                )))
            }
        }
        if tokens.len() > MAX_TOKENS {
            return Err(SchedError::MalformedRequest(format!(
                "predicate longer than {} tokens",
                MAX_TOKENS
            )));
        }
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        input,
    };
    let predicate = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(predicate)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    input: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, what: &str) -> SchedError {
        SchedError::MalformedRequest(format!("{} in predicate '{}'", what, self.input))
    }

    /// Run `f` one nesting level deeper.
    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<Predicate>) -> Result<Predicate> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn parse_or(&mut self) -> Result<Predicate> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Predicate> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.nested(Self::parse_not)?;
            return Ok(Predicate::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.nested(Self::parse_or)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("missing ')'")),
                }
            }
            Some(Token::Ident(property)) => {
                let op = match self.next() {
                    Some(Token::Eq) => CompareOp::Eq,
                    Some(Token::Ne) => CompareOp::Ne,
                    Some(Token::Lt) => CompareOp::Lt,
                    Some(Token::Le) => CompareOp::Le,
                    Some(Token::Gt) => CompareOp::Gt,
                    Some(Token::Ge) => CompareOp::Ge,
                    _ => return Err(self.error("expected comparison operator")),
                };
                let value = match self.next() {
                    Some(Token::Int(i)) => PropertyValue::Int(i),
                    Some(Token::Str(s)) | Some(Token::Ident(s)) => PropertyValue::Str(s),
                    _ => return Err(self.error("expected value")),
                };
                Ok(Predicate::Compare {
                    property,
                    op,
                    value,
                })
            }
            _ => Err(self.error("expected property or '('")),
        }
    }
}
