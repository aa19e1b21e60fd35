//! `${...}` expressions and replacement templates
//!
//! A field value such as `A ${2d6} headed ${monsters[name]}` is split into
//! literal text and [`Expression`]s once, at load time. Expressions that do
//! not parse are kept as their literal `${...}` text and reported to the
//! diagnostic sink.

use crate::arith::{DiceArith, UnsafeExpressionError};
use crate::diagnostic::{Diagnostic, DiagnosticSink};
use crate::directive::Namespace;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const REPLACE_OPEN: &str = "${";
pub const REPLACE_CLOSE: char = '}';
pub const FIELD_OPEN: char = '[';
pub const FIELD_CLOSE: char = ']';
/// Refers to the row most recently rolled in the current resolution chain.
pub const PREV_ROW: &str = "~";

/// First characters that mark a body as arithmetic rather than a reference.
const ARITHMETIC_START: &str = "+-0123456789(";

/// Why an expression was kept as literal text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionParseError {
    #[error("empty expression")]
    Empty,

    #[error("{0}")]
    Arithmetic(#[from] UnsafeExpressionError),

    #[error("missing table alias")]
    EmptyAlias,

    #[error("unknown alias '{0}'")]
    UnknownAlias(String),

    #[error("missing closing field bracket ']'")]
    UnclosedField,

    #[error("unexpected text '{0}' after field")]
    TrailingText(String),

    #[error("missing closing '}}'")]
    Unterminated,
}

/// Where a reference gets its row from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    /// `~`: the previous row in the chain
    Previous,
    /// An included table, already looked up in the namespace
    Table { alias: String, path: PathBuf },
}

/// `alias`, `alias[field]`, `~` or `~[field]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    raw: String,
    target: RefTarget,
    field: Option<String>,
}

impl Reference {
    pub fn parse(body: &str, namespace: &Namespace) -> Result<Self, ExpressionParseError> {
        let text = body.trim();
        let (alias, field) = match text.find(FIELD_OPEN) {
            None => (text, None),
            Some(open) => {
                let after = &text[open + 1..];
                let close = after.find(FIELD_CLOSE).ok_or(ExpressionParseError::UnclosedField)?;
                let trailing = after[close + 1..].trim();
                if !trailing.is_empty() {
                    return Err(ExpressionParseError::TrailingText(trailing.to_string()));
                }
                (text[..open].trim(), Some(after[..close].trim().to_string()))
            }
        };

        let target = match alias {
            "" => return Err(ExpressionParseError::EmptyAlias),
            PREV_ROW => RefTarget::Previous,
            _ => {
                let path = namespace
                    .get(alias)
                    .ok_or_else(|| ExpressionParseError::UnknownAlias(alias.to_string()))?;
                RefTarget::Table {
                    alias: alias.to_string(),
                    path: path.to_path_buf(),
                }
            }
        };

        Ok(Self {
            raw: body.to_string(),
            target,
            field,
        })
    }

    pub fn target(&self) -> &RefTarget {
        &self.target
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_previous(&self) -> bool {
        self.target == RefTarget::Previous
    }
}

/// A successfully parsed `${...}` body
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    DiceArith(DiceArith),
    Ref(Reference),
}

impl Expression {
    /// Parse the text between `${` and `}`.
    pub fn parse(body: &str, namespace: &Namespace) -> Result<Self, ExpressionParseError> {
        let first = body.trim_start().chars().next().ok_or(ExpressionParseError::Empty)?;
        if ARITHMETIC_START.contains(first) {
            Ok(Expression::DiceArith(DiceArith::parse(body)?))
        } else {
            Ok(Expression::Ref(Reference::parse(body, namespace)?))
        }
    }

    /// Text between the delimiters, as written
    pub fn body(&self) -> &str {
        match self {
            Expression::DiceArith(arith) => arith.raw(),
            Expression::Ref(reference) => reference.raw(),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{REPLACE_OPEN}{}{REPLACE_CLOSE}", self.body())
    }
}

/// One piece of a template
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Literal(String),
    Expr(Expression),
}

impl Element {
    pub fn is_expression(&self) -> bool {
        matches!(self, Element::Expr(_))
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Literal(text) => f.write_str(text),
            Element::Expr(expr) => fmt::Display::fmt(expr, f),
        }
    }
}

/// File and line a field came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub path: PathBuf,
    pub line: usize,
}

impl Origin {
    pub fn new(path: impl AsRef<Path>, line: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            line,
        }
    }
}

/// A field value split into literal text and expressions
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacementTemplate {
    elements: Vec<Element>,
    origin: Option<Origin>,
}

impl ReplacementTemplate {
    pub fn new(elements: Vec<Element>) -> Self {
        Self {
            elements,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    pub fn expressions(&self) -> impl Iterator<Item = &Expression> {
        self.elements.iter().filter_map(|e| match e {
            Element::Expr(expr) => Some(expr),
            Element::Literal(_) => None,
        })
    }

    pub fn has_expressions(&self) -> bool {
        self.elements.iter().any(Element::is_expression)
    }
}

impl fmt::Display for ReplacementTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.elements.iter().try_for_each(|e| fmt::Display::fmt(e, f))
    }
}

/// The value of one field of a loaded row
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Template(ReplacementTemplate),
}

impl Value {
    /// Split `raw` into a template, or keep it as text if it holds no
    /// valid expressions.
    pub fn parse(raw: &str, namespace: &Namespace, origin: &Origin, sink: &dyn DiagnosticSink) -> Self {
        let mut elements = Vec::new();
        let mut literal = String::new();
        let mut rest = raw;

        while let Some(open) = rest.find(REPLACE_OPEN) {
            literal.push_str(&rest[..open]);
            let after = &rest[open + REPLACE_OPEN.len()..];

            let Some(close) = after.find(REPLACE_CLOSE) else {
                let unterminated = &rest[open..];
                sink.emit(Diagnostic::expression(
                    &origin.path,
                    origin.line,
                    unterminated,
                    ExpressionParseError::Unterminated,
                ));
                literal.push_str(unterminated);
                rest = "";
                break;
            };

            let body = &after[..close];
            let source = &rest[open..open + REPLACE_OPEN.len() + close + 1];
            match Expression::parse(body, namespace) {
                Ok(expr) => {
                    if !literal.is_empty() {
                        elements.push(Element::Literal(std::mem::take(&mut literal)));
                    }
                    elements.push(Element::Expr(expr));
                }
                Err(e) => {
                    sink.emit(Diagnostic::expression(&origin.path, origin.line, source, e));
                    literal.push_str(source);
                }
            }
            rest = &after[close + 1..];
        }

        if elements.is_empty() {
            return Value::Text(raw.to_string());
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            elements.push(Element::Literal(literal));
        }
        Value::Template(ReplacementTemplate::new(elements).with_origin(origin.clone()))
    }

    /// Source text of the value
    pub fn raw(&self) -> String {
        self.to_string()
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            Value::Template(_) => None,
        }
    }

    pub fn as_template(&self) -> Option<&ReplacementTemplate> {
        match self {
            Value::Template(template) => Some(template),
            Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(text) => f.write_str(text),
            Value::Template(template) => fmt::Display::fmt(template, f),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
