//! Parsing of path expressions into [`PathExpr`].
//!
//! Grammar (after an optional `$` / `$.` root prefix):
//!
//! ```text
//! expr     := "" | fields | fields "[" selector "]" "." fields
//! fields   := name ("." name)*
//! selector := "*" | digits | "?(@." key "=" value ")"
//! ```
//!
//! At most one array selector is allowed per expression, and a field must follow it.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a path expression
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("path expression is empty")]
    Empty,

    #[error("empty field name in '{0}'")]
    EmptySegment(String),

    #[error("missing array name before '[' in '{0}'")]
    MissingArrayName(String),

    #[error("unterminated array selector in '{0}'")]
    UnterminatedSelector(String),

    #[error("invalid array selector '[{selector}]' in '{expr}'")]
    InvalidSelector { selector: String, expr: String },

    #[error("expected '.field' after array selector in '{0}'")]
    MissingField(String),

    #[error("only one array selector is supported in '{0}'")]
    NestedSelector(String),
}

/// Array element addressing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// `[*]`
    Wildcard,
    /// `[?(@.key=value)]`
    Filter { key: String, value: String },
    /// `[N]`
    Index(usize),
}

/// A parsed path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathExpr {
    /// `$`: the whole document
    Root,
    /// `a.b.c`
    Field(Vec<String>),
    /// `arr[sel].field`
    Array {
        array: Vec<String>,
        selector: Selector,
        field: Vec<String>,
    },
}

impl PathExpr {
    pub fn parse(expr: &str) -> Result<Self, ExpressionError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(ExpressionError::Empty);
        }

        let body = strip_root(trimmed);
        if body.is_empty() {
            return Ok(Self::Root);
        }

        let Some(open) = body.find('[') else {
            return Ok(Self::Field(split_fields(body, expr)?));
        };

        let array_part = &body[..open];
        if array_part.is_empty() {
            return Err(ExpressionError::MissingArrayName(expr.to_string()));
        }
        let array = split_fields(array_part, expr)?;

        let after_open = &body[open + 1..];
        // A filter value may itself contain ']', so a filter ends at ")]"
        let close = if after_open.starts_with("?(") {
            after_open.find(")]").map(|i| i + 1)
        } else {
            after_open.find(']')
        }
        .ok_or_else(|| ExpressionError::UnterminatedSelector(expr.to_string()))?;

        let selector = parse_selector(&after_open[..close], expr)?;

        let rest = &after_open[close + 1..];
        let field_part = rest
            .strip_prefix('.')
            .filter(|field| !field.is_empty())
            .ok_or_else(|| ExpressionError::MissingField(expr.to_string()))?;

        if field_part.contains('[') {
            return Err(ExpressionError::NestedSelector(expr.to_string()));
        }

        Ok(Self::Array {
            array,
            selector,
            field: split_fields(field_part, expr)?,
        })
    }

    /// Whether reading this expression can yield several values
    pub fn is_multi(&self) -> bool {
        matches!(
            self,
            Self::Array {
                selector: Selector::Wildcard | Selector::Filter { .. },
                ..
            }
        )
    }
}

impl FromStr for PathExpr {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "$"),
            Self::Field(path) => write!(f, "$.{}", path.join(".")),
            Self::Array { array, selector, field } => {
                write!(f, "$.{}", array.join("."))?;
                match selector {
                    Selector::Wildcard => write!(f, "[*]")?,
                    Selector::Index(index) => write!(f, "[{}]", index)?,
                    Selector::Filter { key, value } => write!(f, "[?(@.{}={})]", key, value)?,
                }
                write!(f, ".{}", field.join("."))
            }
        }
    }
}

fn strip_root(expr: &str) -> &str {
    expr.strip_prefix("$.")
        .or_else(|| expr.strip_prefix('$'))
        .unwrap_or(expr)
}

fn split_fields(path: &str, expr: &str) -> Result<Vec<String>, ExpressionError> {
    path.split('.')
        .map(|segment| {
            let segment = segment.trim();
            if segment.is_empty() {
                Err(ExpressionError::EmptySegment(expr.to_string()))
            } else {
                Ok(segment.to_string())
            }
        })
        .collect()
}

fn parse_selector(raw: &str, expr: &str) -> Result<Selector, ExpressionError> {
    let invalid = || ExpressionError::InvalidSelector {
        selector: raw.to_string(),
        expr: expr.to_string(),
    };

    let raw = raw.trim();
    if raw == "*" {
        return Ok(Selector::Wildcard);
    }

    if let Ok(index) = raw.parse::<usize>() {
        return Ok(Selector::Index(index));
    }

    let condition = raw
        .strip_prefix("?(@.")
        .and_then(|inner| inner.strip_suffix(')'))
        .ok_or_else(invalid)?;

    let (key, value) = condition.split_once('=').ok_or_else(invalid)?;
    let key = key.trim();
    if key.is_empty() {
        return Err(invalid());
    }

    // Accept `==` as well as `=`
    let value = value.strip_prefix('=').unwrap_or(value).trim();

    Ok(Selector::Filter {
        key: key.to_string(),
        value: unquote(value).to_string(),
    })
}

/// Drop one layer of surrounding `{}` or quotes from a filter value
fn unquote(value: &str) -> &str {
    for (open, close) in [('{', '}'), ('"', '"'), ('\'', '\'')] {
        if value.len() >= 2 && value.starts_with(open) && value.ends_with(close) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
