//! Read and write evaluation of [`PathExpr`] over `serde_json::Value` trees.

use serde_json::{Map, Value};

use super::parser::{PathExpr, Selector};

/// Result of a write, for logging by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value was written at this many locations
    Applied(usize),
    /// The array exists but no element matched the selector
    NoMatch,
    /// The addressed array is missing or is not an array
    MissingArray,
    /// `[N]` beyond the end of the array
    IndexOutOfRange { index: usize, len: usize },
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

impl PathExpr {
    /// Evaluate the expression against `root`
    ///
    /// Wildcard and filter selectors produce an array of every matching element's
    /// field, or `None` when nothing matched.
    pub fn read(&self, root: &Value) -> Option<Value> {
        let found = self.resolve(root);
        if self.is_multi() {
            if found.is_empty() {
                None
            } else {
                Some(Value::Array(found.into_iter().cloned().collect()))
            }
        } else {
            found.into_iter().next().cloned()
        }
    }

    /// Evaluate the expression and stringify every scalar it yields
    ///
    /// This is how dependency parameters are extracted: `items[*].id` yields one
    /// string per element carrying an `id`. Objects, arrays and nulls are skipped.
    pub fn extract_strings(&self, root: &Value) -> Vec<String> {
        self.resolve(root)
            .into_iter()
            .filter_map(stringify_scalar)
            .collect()
    }

    fn resolve<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        match self {
            Self::Root => vec![root],
            Self::Field(path) => get_path(root, path).into_iter().collect(),
            Self::Array { array, selector, field } => {
                let Some(Value::Array(items)) = get_path(root, array) else {
                    return Vec::new();
                };

                let candidates: Vec<&Value> = match selector {
                    Selector::Wildcard => items.iter().collect(),
                    Selector::Index(index) => items.get(*index).into_iter().collect(),
                    Selector::Filter { key, value } => items
                        .iter()
                        .filter(|item| field_equals(item, key, value))
                        .collect(),
                };

                candidates
                    .into_iter()
                    .filter(|item| item.is_object())
                    .filter_map(|item| get_path(item, field))
                    .collect()
            }
        }
    }

    /// Write `value` at the location the expression addresses
    ///
    /// Missing intermediate fields are created as empty objects (and a non-object
    /// intermediate is replaced by one). `drive` is the parameter value that produced
    /// `value`; a wildcard write with a drive value only touches array elements that
    /// have an id-suffixed field equal to it, and without one touches every element.
    pub fn write(&self, root: &mut Value, value: Value, drive: Option<&str>) -> WriteOutcome {
        match self {
            Self::Root => {
                *root = value;
                WriteOutcome::Applied(1)
            }
            Self::Field(path) => {
                if set_path(root, path, value) {
                    WriteOutcome::Applied(1)
                } else {
                    WriteOutcome::NoMatch
                }
            }
            Self::Array { array, selector, field } => {
                let Some(Value::Array(items)) = get_path_mut(root, array) else {
                    return WriteOutcome::MissingArray;
                };

                let targets: Vec<usize> = match selector {
                    Selector::Index(index) => {
                        if *index >= items.len() {
                            return WriteOutcome::IndexOutOfRange {
                                index: *index,
                                len: items.len(),
                            };
                        }
                        vec![*index]
                    }
                    Selector::Wildcard => matching_indices(items, |item| match drive {
                        Some(drive) => has_id_field_equal(item, drive),
                        None => true,
                    }),
                    Selector::Filter { key, value: expected } => {
                        matching_indices(items, |item| field_equals(item, key, expected))
                    }
                };

                let mut written = 0;
                for index in targets {
                    let item = &mut items[index];
                    if item.is_object() && set_path(item, field, value.clone()) {
                        written += 1;
                    }
                }

                if written == 0 {
                    WriteOutcome::NoMatch
                } else {
                    WriteOutcome::Applied(written)
                }
            }
        }
    }
}

/// Replace every `{name}` in `template` with `value`
pub fn substitute_placeholder(template: &str, name: &str, value: &str) -> String {
    template.replace(&format!("{{{}}}", name), value)
}

/// `"{uid}"` and `"uid"` both name the placeholder `uid`
pub fn placeholder_name(raw: &str) -> &str {
    let raw = raw.trim();
    let raw = raw.strip_prefix('{').unwrap_or(raw);
    raw.strip_suffix('}').unwrap_or(raw)
}

/// Stringify a scalar the way it would read in a URL or a comparison
///
/// Integral floats print without a fractional part (`5.0` becomes `"5"`).
pub fn stringify_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                return Some(n.to_string());
            }
            n.as_f64().map(|f| {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{}", f as i64)
                } else {
                    f.to_string()
                }
            })
        }
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn get_path<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |current, key| current.as_object()?.get(key))
}

fn get_path_mut<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut current = root;
    for key in path {
        current = current.as_object_mut()?.get_mut(key)?;
    }
    Some(current)
}

/// Set `path` under an object root; returns false when `root` is not an object
fn set_path(root: &mut Value, path: &[String], value: Value) -> bool {
    let Some((first, rest)) = path.split_first() else {
        *root = value;
        return true;
    };

    let Value::Object(map) = root else {
        return false;
    };

    if rest.is_empty() {
        map.insert(first.clone(), value);
        return true;
    }

    let child = map
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        *child = Value::Object(Map::new());
    }
    set_path(child, rest, value)
}

fn matching_indices<F>(items: &[Value], predicate: F) -> Vec<usize>
where
    F: Fn(&Value) -> bool,
{
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_object() && predicate(item))
        .map(|(index, _)| index)
        .collect()
}

fn field_equals(item: &Value, key: &str, expected: &str) -> bool {
    item.get(key)
        .and_then(stringify_scalar)
        .map_or(false, |actual| actual == expected)
}

/// Any field whose name ends in "id" (case-insensitive) stringifies to `drive`
fn has_id_field_equal(item: &Value, drive: &str) -> bool {
    item.as_object().map_or(false, |map| {
        map.iter().any(|(key, value)| {
            key.to_ascii_lowercase().ends_with("id")
                && stringify_scalar(value).map_or(false, |s| s == drive)
        })
    })
}
