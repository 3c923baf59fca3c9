//! Segmentation rule compilation and caching.
//!
//! A segmentation rule is a boolean expression over user attributes that
//! decides whether a user is eligible for an experiment, e.g.
//! `country = US & (age >= 21 | vip = true)`. The lifecycle core compiles
//! expressions into a pre-parsed form and installs them in the
//! [`RuleCache`]; *evaluating* a rule against a user happens in the
//! assignment path, outside this crate.
//!
//! The cache is eagerly consistent with the most recent successful update:
//! the service writes it only after both stores have accepted the new rule.
//! It is purely advisory: correctness never depends on it, only
//! performance.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use switchyard_core::ExperimentId;

/// A rule expression failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parse error at byte {position}: {message}")]
pub struct RuleParseError {
    /// Byte offset into the expression where parsing failed.
    pub position: usize,
    /// Description of the failure.
    pub message: String,
}

impl RuleParseError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Comparison operators usable in rule expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// A literal a user attribute is compared against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    /// A bareword or quoted string.
    Text(String),
    /// A numeric literal.
    Number(f64),
    /// `true` or `false`.
    Boolean(bool),
}

/// The pre-parsed form of a rule expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleExpr {
    /// A single `attribute op value` comparison.
    Compare {
        /// User attribute name.
        attribute: String,
        /// Comparison operator.
        op: CompareOp,
        /// Literal to compare against.
        value: RuleValue,
    },
    /// Conjunction; true when every operand is true.
    And(Vec<RuleExpr>),
    /// Disjunction; true when any operand is true.
    Or(Vec<RuleExpr>),
}

/// A compiled segmentation rule: the source expression plus its parsed
/// form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledRule {
    source: String,
    expr: RuleExpr,
}

impl CompiledRule {
    /// Returns the original expression text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the parsed expression tree.
    #[must_use]
    pub const fn expr(&self) -> &RuleExpr {
        &self.expr
    }
}

/// Compiles a segmentation rule expression.
///
/// # Errors
///
/// Returns a [`RuleParseError`] when the expression is empty or
/// syntactically invalid.
pub fn compile(expression: &str) -> Result<CompiledRule, RuleParseError> {
    let mut parser = Parser::new(expression)?;
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(RuleParseError::new(
            token.position,
            format!("unexpected trailing input '{}'", token.kind),
        ));
    }
    Ok(CompiledRule {
        source: expression.to_string(),
        expr,
    })
}

// ----------------------------------------------------------------------------
// Tokenizer
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Quoted(String),
    Number(f64),
    Op(CompareOp),
    And,
    Or,
    LParen,
    RParen,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) => write!(f, "{s}"),
            Self::Quoted(s) => write!(f, "\"{s}\""),
            Self::Number(n) => write!(f, "{n}"),
            Self::Op(op) => write!(f, "{op}"),
            Self::And => f.write_str("&"),
            Self::Or => f.write_str("|"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

fn tokenize(input: &str) -> Result<Vec<Token>, RuleParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = char::from(bytes[pos]);
        match c {
            ' ' | '\t' | '\r' | '\n' => pos += 1,
            '(' => {
                tokens.push(Token {
                    kind: TokenKind::LParen,
                    position: pos,
                });
                pos += 1;
            }
            ')' => {
                tokens.push(Token {
                    kind: TokenKind::RParen,
                    position: pos,
                });
                pos += 1;
            }
            '&' => {
                tokens.push(Token {
                    kind: TokenKind::And,
                    position: pos,
                });
                pos += 1;
            }
            '|' => {
                tokens.push(Token {
                    kind: TokenKind::Or,
                    position: pos,
                });
                pos += 1;
            }
            '=' => {
                tokens.push(Token {
                    kind: TokenKind::Op(CompareOp::Eq),
                    position: pos,
                });
                pos += 1;
            }
            '!' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token {
                        kind: TokenKind::Op(CompareOp::Ne),
                        position: pos,
                    });
                    pos += 2;
                } else {
                    return Err(RuleParseError::new(pos, "expected '=' after '!'"));
                }
            }
            '<' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token {
                        kind: TokenKind::Op(CompareOp::Le),
                        position: pos,
                    });
                    pos += 2;
                } else {
                    tokens.push(Token {
                        kind: TokenKind::Op(CompareOp::Lt),
                        position: pos,
                    });
                    pos += 1;
                }
            }
            '>' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token {
                        kind: TokenKind::Op(CompareOp::Ge),
                        position: pos,
                    });
                    pos += 2;
                } else {
                    tokens.push(Token {
                        kind: TokenKind::Op(CompareOp::Gt),
                        position: pos,
                    });
                    pos += 1;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let start = pos;
                pos += 1;
                let content_start = pos;
                while pos < bytes.len() && char::from(bytes[pos]) != quote {
                    pos += 1;
                }
                if pos >= bytes.len() {
                    return Err(RuleParseError::new(start, "unterminated string literal"));
                }
                let content = input
                    .get(content_start..pos)
                    .unwrap_or_default()
                    .to_string();
                tokens.push(Token {
                    kind: TokenKind::Quoted(content),
                    position: start,
                });
                pos += 1;
            }
            c if c.is_ascii_digit() => {
                let start = pos;
                while pos < bytes.len()
                    && (char::from(bytes[pos]).is_ascii_digit() || bytes[pos] == b'.')
                {
                    pos += 1;
                }
                let text = input.get(start..pos).unwrap_or_default();
                let number: f64 = text
                    .parse()
                    .map_err(|_| RuleParseError::new(start, format!("invalid number '{text}'")))?;
                tokens.push(Token {
                    kind: TokenKind::Number(number),
                    position: start,
                });
            }
            c if is_ident_char(c) => {
                let start = pos;
                while pos < bytes.len() && is_ident_char(char::from(bytes[pos])) {
                    pos += 1;
                }
                let word = input.get(start..pos).unwrap_or_default();
                let kind = match word.to_ascii_lowercase().as_str() {
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    _ => TokenKind::Ident(word.to_string()),
                };
                tokens.push(Token {
                    kind,
                    position: start,
                });
            }
            other => {
                return Err(RuleParseError::new(
                    pos,
                    format!("unexpected character '{other}'"),
                ));
            }
        }
    }

    Ok(tokens)
}

// ----------------------------------------------------------------------------
// Parser
// ----------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    end: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Self, RuleParseError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(RuleParseError::new(0, "empty rule expression"));
        }
        Ok(Self {
            tokens,
            index: 0,
            end: input.len(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn error_position(&self) -> usize {
        self.peek().map_or(self.end, |t| t.position)
    }

    fn parse_or(&mut self) -> Result<RuleExpr, RuleParseError> {
        let mut operands = vec![self.parse_and()?];
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Or)) {
            self.advance();
            operands.push(self.parse_and()?);
        }
        if operands.len() == 1 {
            Ok(operands.remove(0))
        } else {
            Ok(RuleExpr::Or(operands))
        }
    }

    fn parse_and(&mut self) -> Result<RuleExpr, RuleParseError> {
        let mut operands = vec![self.parse_primary()?];
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::And)) {
            self.advance();
            operands.push(self.parse_primary()?);
        }
        if operands.len() == 1 {
            Ok(operands.remove(0))
        } else {
            Ok(RuleExpr::And(operands))
        }
    }

    fn parse_primary(&mut self) -> Result<RuleExpr, RuleParseError> {
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::LParen)) {
            let open = self.error_position();
            self.advance();
            let expr = self.parse_or()?;
            match self.advance() {
                Some(Token {
                    kind: TokenKind::RParen,
                    ..
                }) => Ok(expr),
                _ => Err(RuleParseError::new(open, "unbalanced parenthesis")),
            }
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<RuleExpr, RuleParseError> {
        let position = self.error_position();
        let attribute = match self.advance() {
            Some(Token {
                kind: TokenKind::Ident(name),
                ..
            }) => name,
            _ => return Err(RuleParseError::new(position, "expected attribute name")),
        };

        let position = self.error_position();
        let op = match self.advance() {
            Some(Token {
                kind: TokenKind::Op(op),
                ..
            }) => op,
            _ => {
                return Err(RuleParseError::new(
                    position,
                    "expected comparison operator",
                ))
            }
        };

        let position = self.error_position();
        let value = match self.advance() {
            Some(Token {
                kind: TokenKind::Quoted(text),
                ..
            }) => RuleValue::Text(text),
            Some(Token {
                kind: TokenKind::Number(number),
                ..
            }) => RuleValue::Number(number),
            Some(Token {
                kind: TokenKind::Ident(word),
                ..
            }) => match word.to_ascii_lowercase().as_str() {
                "true" => RuleValue::Boolean(true),
                "false" => RuleValue::Boolean(false),
                _ => RuleValue::Text(word),
            },
            _ => return Err(RuleParseError::new(position, "expected literal value")),
        };

        Ok(RuleExpr::Compare {
            attribute,
            op,
            value,
        })
    }
}

// ----------------------------------------------------------------------------
// Cache
// ----------------------------------------------------------------------------

/// In-memory mapping from experiment id to its compiled rule.
///
/// Readers take a read lock; writers are exclusive. Entries are shared as
/// `Arc` so the assignment path can hold a rule across a cache update.
#[derive(Debug, Default)]
pub struct RuleCache {
    inner: RwLock<HashMap<ExperimentId, Arc<CompiledRule>>>,
}

impl RuleCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled rule for an experiment, if cached.
    #[must_use]
    pub fn get(&self, id: ExperimentId) -> Option<Arc<CompiledRule>> {
        self.inner
            .read()
            .ok()
            .and_then(|guard| guard.get(&id).cloned())
    }

    /// Installs the compiled rule for an experiment.
    pub fn set(&self, id: ExperimentId, rule: Arc<CompiledRule>) {
        if let Ok(mut guard) = self.inner.write() {
            guard.insert(id, rule);
        }
    }

    /// Drops the cached rule for an experiment.
    pub fn clear(&self, id: ExperimentId) {
        if let Ok(mut guard) = self.inner.write() {
            guard.remove(&id);
        }
    }

    /// Returns the number of cached rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Returns true when no rules are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
