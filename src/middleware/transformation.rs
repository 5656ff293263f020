//! # Request/Response Transformation
//!
//! This module applies a service's declarative [`MappingRule`] lists to outbound requests
//! and backend responses. A rule reads a value from one location, falls back to its
//! `default` when nothing is found, optionally renders it through a template, and writes
//! it to another location on the same surface.
//!
//! ## Surfaces
//! - **body**: the JSON body, addressed with path expressions (`user.id`, `items[*].x`).
//!   A body that is not valid JSON is left untouched by body rules.
//! - **header**: headers as a flat name → value map
//! - **query**: query parameters as a flat name → value map (requests only)
//!
//! Rules run strictly in declared order and later rules observe earlier writes. Every rule
//! is a pure function of the current message, so applying a list twice to the same input
//! gives the same output.
//!
//! ## Templates
//! `"Bearer {value}"`, `"{value|upper}"`, `"{value|lower}"`, `"{value|trim}"`
//!
//! ## Rust Concepts Used
//! - Rules are compiled once per service into enums, so per-request work is a `match`
//! - `regex` splits templates into literal and placeholder pieces at compile time
//! - `Bytes` bodies are only re-serialized when a body rule actually wrote something

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::Bytes;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::core::config::{MappingRule, Surface};
use crate::expression::{stringify_scalar, PathExpr};

/// Mutable view of an outbound request that rules operate on
#[derive(Debug, Clone, Default)]
pub struct OutboundRequest {
    pub headers: HeaderMap,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    pub body: Bytes,
}

/// Compiled rule list for one direction of one service
#[derive(Debug, Default)]
pub struct TransformEngine {
    rules: Vec<CompiledRule>,
}

#[derive(Debug)]
struct CompiledRule {
    source: Source,
    destination: Destination,
    default: Option<JsonValue>,
    template: Option<Template>,
}

#[derive(Debug)]
enum Source {
    /// Empty `from`: only the default can produce a value
    Never,
    Body(PathExpr),
    Header(HeaderName),
    Query(String),
}

#[derive(Debug)]
enum Destination {
    Body(PathExpr),
    Header(HeaderName),
    Query(String),
}

impl TransformEngine {
    /// Compile `rules`; a rule with an invalid expression or name is logged and skipped
    pub fn new(service: &str, direction: &'static str, rules: &[MappingRule]) -> Self {
        let compiled = rules
            .iter()
            .filter_map(|rule| match CompiledRule::compile(rule) {
                Ok(compiled) => Some(compiled),
                Err(reason) => {
                    warn!(
                        service = %service,
                        direction = direction,
                        from = %rule.from,
                        to = %rule.to,
                        error = %reason,
                        "Skipping invalid transform rule"
                    );
                    None
                }
            })
            .collect();

        Self { rules: compiled }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of rules that survived compilation
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Apply the rules to an outbound request, returning how many rules wrote a value
    pub fn apply_request(&self, request: &mut OutboundRequest) -> usize {
        if self.rules.is_empty() {
            return 0;
        }

        let mut state = MessageState::new(&mut request.headers, Some(&request.query), &request.body, self.has_body_rules());
        let applied = self.run(&mut state);
        let (query, body) = state.finish();

        if let Some(query) = query {
            request.query = query;
        }
        if let Some(body) = body {
            request.body = body;
        }
        applied
    }

    /// Apply the rules to a backend response, returning how many rules wrote a value
    pub fn apply_response(&self, headers: &mut HeaderMap, body: &mut Bytes) -> usize {
        if self.rules.is_empty() {
            return 0;
        }

        let mut state = MessageState::new(headers, None, body, self.has_body_rules());
        let applied = self.run(&mut state);
        let (_, new_body) = state.finish();

        if let Some(new_body) = new_body {
            *body = new_body;
        }
        applied
    }

    fn has_body_rules(&self) -> bool {
        self.rules.iter().any(|rule| {
            matches!(rule.destination, Destination::Body(_)) || matches!(rule.source, Source::Body(_))
        })
    }

    fn run(&self, state: &mut MessageState<'_>) -> usize {
        let mut applied = 0;

        for rule in &self.rules {
            let Some(value) = state.read(&rule.source).or_else(|| rule.default.clone()) else {
                continue;
            };

            let value = match &rule.template {
                Some(template) => JsonValue::String(template.render(&value)),
                None => value,
            };

            if state.write(&rule.destination, value) {
                applied += 1;
            }
        }

        applied
    }
}

impl CompiledRule {
    fn compile(rule: &MappingRule) -> Result<Self, String> {
        let from = rule.from.trim();
        let to = rule.to.trim();

        let source = if from.is_empty() {
            Source::Never
        } else {
            match rule.surface {
                Surface::Body => Source::Body(PathExpr::parse(from).map_err(|e| e.to_string())?),
                Surface::Header => Source::Header(header_name(from)?),
                Surface::Query => Source::Query(from.to_string()),
            }
        };

        if to.is_empty() {
            return Err("destination cannot be empty".to_string());
        }

        let destination = match rule.surface {
            Surface::Body => Destination::Body(PathExpr::parse(to).map_err(|e| e.to_string())?),
            Surface::Header => Destination::Header(header_name(to)?),
            Surface::Query => Destination::Query(to.to_string()),
        };

        let template = rule
            .template
            .as_deref()
            .map(Template::compile)
            .transpose()
            .map_err(|e| format!("invalid template: {}", e))?;

        Ok(Self {
            source,
            destination,
            default: rule.default.clone(),
            template,
        })
    }
}

fn header_name(raw: &str) -> Result<HeaderName, String> {
    HeaderName::from_str(raw).map_err(|e| format!("invalid header name '{}': {}", raw, e))
}

/// Working copy of the surfaces a rule list touches
struct MessageState<'a> {
    headers: &'a mut HeaderMap,
    /// `None` for responses, which have no query surface
    query: Option<Vec<(String, String)>>,
    query_dirty: bool,
    /// `None` when there are no body rules or the body is not JSON
    body: Option<JsonValue>,
    body_dirty: bool,
}

impl<'a> MessageState<'a> {
    fn new(
        headers: &'a mut HeaderMap,
        query: Option<&Option<String>>,
        body: &Bytes,
        parse_body: bool,
    ) -> Self {
        let query = query.map(|raw| {
            raw.as_deref()
                .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
                .unwrap_or_default()
        });

        let body = if parse_body && !body.is_empty() {
            match serde_json::from_slice::<JsonValue>(body) {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!(error = %e, "Body is not JSON, body rules skipped");
                    None
                }
            }
        } else {
            None
        };

        Self {
            headers,
            query,
            query_dirty: false,
            body,
            body_dirty: false,
        }
    }

    fn read(&self, source: &Source) -> Option<JsonValue> {
        match source {
            Source::Never => None,
            Source::Body(expr) => self.body.as_ref().and_then(|body| expr.read(body)),
            Source::Header(name) => self
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(|value| JsonValue::String(value.to_string())),
            Source::Query(key) => self.query.as_ref().and_then(|pairs| {
                pairs
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| JsonValue::String(v.clone()))
            }),
        }
    }

    fn write(&mut self, destination: &Destination, value: JsonValue) -> bool {
        match destination {
            Destination::Body(expr) => {
                let Some(body) = self.body.as_mut() else {
                    return false;
                };
                let outcome = expr.write(body, value, None);
                if !outcome.is_applied() {
                    debug!(to = %expr, outcome = ?outcome, "Body rule wrote nothing");
                    return false;
                }
                self.body_dirty = true;
                true
            }
            Destination::Header(name) => match HeaderValue::from_str(&value_to_string(&value)) {
                Ok(header_value) => {
                    self.headers.insert(name.clone(), header_value);
                    true
                }
                Err(e) => {
                    warn!(header = %name, error = %e, "Transform produced an invalid header value");
                    false
                }
            },
            Destination::Query(key) => {
                let Some(pairs) = self.query.as_mut() else {
                    return false;
                };
                let value = value_to_string(&value);
                match pairs.iter().position(|(k, _)| k == key) {
                    Some(first) => {
                        pairs[first].1 = value;
                        let mut index = 0;
                        pairs.retain(|(k, _)| {
                            let keep = k != key || index == first;
                            index += 1;
                            keep
                        });
                    }
                    None => pairs.push((key.clone(), value)),
                }
                self.query_dirty = true;
                true
            }
        }
    }

    /// Serialized replacements for the query and body, when they changed
    fn finish(self) -> (Option<Option<String>>, Option<Bytes>) {
        let query = if self.query_dirty {
            self.query.map(|pairs| {
                if pairs.is_empty() {
                    None
                } else {
                    Some(
                        url::form_urlencoded::Serializer::new(String::new())
                            .extend_pairs(pairs)
                            .finish(),
                    )
                }
            })
        } else {
            None
        };

        let body = match (self.body_dirty, self.body) {
            (true, Some(body)) => match serde_json::to_vec(&body) {
                Ok(bytes) => Some(Bytes::from(bytes)),
                Err(e) => {
                    warn!(error = %e, "Failed to serialize transformed body");
                    None
                }
            },
            _ => None,
        };

        (query, body)
    }
}

fn value_to_string(value: &JsonValue) -> String {
    stringify_scalar(value).unwrap_or_else(|| match value {
        JsonValue::Null => String::new(),
        other => other.to_string(),
    })
}

/// `{value}` placeholder rendering with optional filters
#[derive(Debug)]
struct Template {
    pieces: Vec<Piece>,
}

#[derive(Debug)]
enum Piece {
    Literal(String),
    Value(Filter),
}

#[derive(Debug, Clone, Copy)]
enum Filter {
    None,
    Upper,
    Lower,
    Trim,
}

impl Template {
    fn compile(raw: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(r"\{value(?:\|(upper|lower|trim))?\}")?;

        let mut pieces = Vec::new();
        let mut last = 0;
        for captures in pattern.captures_iter(raw) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            if whole.start() > last {
                pieces.push(Piece::Literal(raw[last..whole.start()].to_string()));
            }
            let filter = match captures.get(1).map(|m| m.as_str()) {
                Some("upper") => Filter::Upper,
                Some("lower") => Filter::Lower,
                Some("trim") => Filter::Trim,
                _ => Filter::None,
            };
            pieces.push(Piece::Value(filter));
            last = whole.end();
        }
        if last < raw.len() {
            pieces.push(Piece::Literal(raw[last..].to_string()));
        }

        Ok(Self { pieces })
    }

    fn render(&self, value: &JsonValue) -> String {
        let text = value_to_string(value);
        self.pieces
            .iter()
            .map(|piece| match piece {
                Piece::Literal(literal) => literal.clone(),
                Piece::Value(Filter::None) => text.clone(),
                Piece::Value(Filter::Upper) => text.to_uppercase(),
                Piece::Value(Filter::Lower) => text.to_lowercase(),
                Piece::Value(Filter::Trim) => text.trim().to_string(),
            })
            .collect()
    }
}
