//! Where predicates: decoding bracket-notation query keys into a typed predicate tree.
//!
//! `where[title][$like]=%rust%&where[$or][0][views][$gt]=10` becomes a nested JSON object,
//! which is then parsed into [`WhereOptions`]. Query-string leaves are coerced with
//! [`decode_value`], except on text columns, which keep the raw token. Predicates from JSON
//! (named filters, `where={...}`) keep their types.

use crate::config::{FieldType, Resource};
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Like,
    Ilike,
    Null,
}

impl CompareOp {
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "$eq" => CompareOp::Eq,
            "$ne" => CompareOp::Ne,
            "$gt" => CompareOp::Gt,
            "$gte" => CompareOp::Gte,
            "$lt" => CompareOp::Lt,
            "$lte" => CompareOp::Lte,
            "$in" => CompareOp::In,
            "$nin" => CompareOp::Nin,
            "$like" => CompareOp::Like,
            "$ilike" => CompareOp::Ilike,
            "$null" => CompareOp::Null,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WhereOptions {
    And(Vec<WhereOptions>),
    Or(Vec<WhereOptions>),
    Not(Box<WhereOptions>),
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
}

impl Default for WhereOptions {
    fn default() -> Self {
        WhereOptions::And(Vec::new())
    }
}

/// Coerce one query-string value: numbers, `true`/`false`, `null`/`undefined`; anything else stays a string.
pub fn decode_value(s: &str) -> Value {
    match s {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "undefined" => return Value::Null,
        _ => {}
    }
    let numeric_chars = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        && s.chars().any(|c| c.is_ascii_digit());
    if numeric_chars {
        if let Ok(n) = s.parse::<i64>() {
            return Value::Number(n.into());
        }
        if let Ok(f) = s.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(s.to_string())
}

enum Segment<'a> {
    Key(&'a str),
    Push,
}

/// Split `where[a][b][]` into `[Key(a), Key(b), Push]`. Returns None when `key` is not under `root`.
fn bracket_segments<'a>(key: &'a str, root: &str) -> Option<Vec<Segment<'a>>> {
    let mut rest = key.strip_prefix(root)?;
    let mut segments = Vec::new();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let end = inner.find(']')?;
        let name = &inner[..end];
        segments.push(if name.is_empty() {
            Segment::Push
        } else {
            Segment::Key(name)
        });
        rest = &inner[end + 1..];
    }
    (!segments.is_empty()).then_some(segments)
}

fn insert_path(target: &mut Value, segments: &[Segment<'_>], leaf: Value) {
    let Some((head, tail)) = segments.split_first() else {
        *target = leaf;
        return;
    };
    match head {
        Segment::Push => {
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            if let Value::Array(items) = target {
                let mut slot = Value::Null;
                insert_path(&mut slot, tail, leaf);
                items.push(slot);
            }
        }
        Segment::Key(k) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                let slot = map.entry(k.to_string()).or_insert(Value::Null);
                insert_path(slot, tail, leaf);
            }
        }
    }
}

/// Collect `root[...]` pairs into one nested JSON object. Leaves stay raw strings.
pub fn expand_brackets(pairs: &[(String, String)], root: &str) -> Value {
    let mut out = Value::Object(Map::new());
    for (k, v) in pairs {
        if let Some(segments) = bracket_segments(k, root) {
            insert_path(&mut out, &segments, Value::String(v.clone()));
        }
    }
    out
}

/// Coerce a raw leaf. `keep_text` leaves everything but `null`/`undefined` as the original string.
fn decode_leaf(v: Value, keep_text: bool) -> Value {
    match v {
        Value::String(s) if keep_text => match s.as_str() {
            "null" | "undefined" => Value::Null,
            _ => Value::String(s),
        },
        Value::String(s) => decode_value(&s),
        Value::Array(items) => Value::Array(items.into_iter().map(|i| decode_leaf(i, keep_text)).collect()),
        other => other,
    }
}

/// Items of a `$and` / `$or` / `$in` operand: arrays as-is, objects keyed "0", "1", ... in index order.
fn operand_items(v: &Value) -> Vec<Value> {
    match v {
        Value::Array(items) => items.clone(),
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.parse::<usize>().is_ok()) => {
            let mut indexed: Vec<(usize, &Value)> = map
                .iter()
                .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v)))
                .collect();
            indexed.sort_by_key(|(i, _)| *i);
            indexed.into_iter().map(|(_, v)| v.clone()).collect()
        }
        Value::String(s) if s.contains(',') => s.split(',').map(|part| Value::String(part.to_string())).collect(),
        other => vec![other.clone()],
    }
}

impl WhereOptions {
    /// Parse a JSON predicate object. Unknown operators are dropped.
    pub fn from_value(value: &Value) -> Self {
        let Value::Object(map) = value else {
            return WhereOptions::default();
        };
        let mut parts = Vec::new();
        for (key, v) in map {
            match key.as_str() {
                "$and" => parts.push(WhereOptions::And(
                    operand_items(v).iter().map(WhereOptions::from_value).collect(),
                )),
                "$or" => parts.push(WhereOptions::Or(
                    operand_items(v).iter().map(WhereOptions::from_value).collect(),
                )),
                "$not" => {
                    let inner = WhereOptions::from_value(v);
                    if !inner.is_empty() {
                        parts.push(WhereOptions::Not(Box::new(inner)));
                    }
                }
                k if k.starts_with('$') => tracing::debug!(operator = %k, "ignoring unknown where operator"),
                field => parts.extend(Self::field_predicates(field, v)),
            }
        }
        WhereOptions::And(parts).flatten()
    }

    fn field_predicates(field: &str, v: &Value) -> Vec<WhereOptions> {
        match v {
            Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) => ops
                .iter()
                .filter_map(|(op_key, operand)| {
                    let op = CompareOp::from_key(op_key).or_else(|| {
                        tracing::debug!(field = %field, operator = %op_key, "ignoring unknown where operator");
                        None
                    })?;
                    let value = match op {
                        CompareOp::In | CompareOp::Nin => Value::Array(operand_items(operand)),
                        _ => operand.clone(),
                    };
                    Some(WhereOptions::Compare {
                        field: field.to_string(),
                        op,
                        value,
                    })
                })
                .collect(),
            other => vec![WhereOptions::Compare {
                field: field.to_string(),
                op: CompareOp::Eq,
                value: other.clone(),
            }],
        }
    }

    /// Parse `where[...]` pairs of a query string, decoding every leaf.
    pub fn from_query(pairs: &[(String, String)]) -> Self {
        Self::parse_query(pairs, None)
    }

    /// Parse `where[...]` pairs, decoding leaves according to the column types of `resource`.
    pub fn from_query_for(pairs: &[(String, String)], resource: &Resource) -> Self {
        Self::parse_query(pairs, Some(resource))
    }

    fn parse_query(pairs: &[(String, String)], resource: Option<&Resource>) -> Self {
        let mut out = Self::from_value(&expand_brackets(pairs, "where")).decode_leaves(resource);
        for (_, v) in pairs.iter().filter(|(k, _)| k == "where") {
            match serde_json::from_str::<Value>(v) {
                Ok(obj @ Value::Object(_)) => out = out.and(Self::from_value(&obj)),
                _ => tracing::debug!(value = %v, "ignoring non-object where value"),
            }
        }
        out
    }

    fn decode_leaves(self, resource: Option<&Resource>) -> Self {
        match self {
            WhereOptions::And(parts) => {
                WhereOptions::And(parts.into_iter().map(|p| p.decode_leaves(resource)).collect())
            }
            WhereOptions::Or(parts) => {
                WhereOptions::Or(parts.into_iter().map(|p| p.decode_leaves(resource)).collect())
            }
            WhereOptions::Not(inner) => WhereOptions::Not(Box::new(inner.decode_leaves(resource))),
            WhereOptions::Compare { field, op, value } => {
                let text_column = resource
                    .and_then(|r| r.field(&field))
                    .is_some_and(|f| matches!(f.type_, FieldType::String | FieldType::Text));
                let keep_text = match op {
                    CompareOp::Null => false,
                    CompareOp::Like | CompareOp::Ilike => true,
                    _ => text_column,
                };
                WhereOptions::Compare {
                    field,
                    op,
                    value: decode_leaf(value, keep_text),
                }
            }
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        WhereOptions::Compare {
            field: field.into(),
            op: CompareOp::Eq,
            value,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, WhereOptions::And(parts) if parts.is_empty())
    }

    /// Conjunction of two predicates.
    pub fn and(self, other: WhereOptions) -> WhereOptions {
        WhereOptions::And(vec![self, other]).flatten()
    }

    /// Collapse nested conjunctions and single-element `And`s.
    fn flatten(self) -> WhereOptions {
        match self {
            WhereOptions::And(parts) => {
                let mut out = Vec::new();
                for p in parts {
                    match p.flatten() {
                        WhereOptions::And(inner) => out.extend(inner),
                        other => out.push(other),
                    }
                }
                if out.len() == 1 {
                    out.pop().unwrap_or_default()
                } else {
                    WhereOptions::And(out)
                }
            }
            other => other,
        }
    }

    /// Drop comparisons on names that are not columns of `resource`.
    pub fn restrict_to(self, resource: &Resource) -> WhereOptions {
        match self {
            WhereOptions::And(parts) => WhereOptions::And(
                parts
                    .into_iter()
                    .map(|p| p.restrict_to(resource))
                    .filter(|p| !p.is_empty())
                    .collect(),
            )
            .flatten(),
            WhereOptions::Or(parts) => {
                let parts: Vec<_> = parts
                    .into_iter()
                    .map(|p| p.restrict_to(resource))
                    .filter(|p| !p.is_empty())
                    .collect();
                if parts.is_empty() {
                    WhereOptions::default()
                } else {
                    WhereOptions::Or(parts)
                }
            }
            WhereOptions::Not(inner) => {
                let inner = inner.restrict_to(resource);
                if inner.is_empty() {
                    WhereOptions::default()
                } else {
                    WhereOptions::Not(Box::new(inner))
                }
            }
            WhereOptions::Compare { ref field, .. } if !resource.is_column(field) => {
                tracing::debug!(resource = %resource.name, field = %field, "dropping where on unknown field");
                WhereOptions::default()
            }
            cmp => cmp,
        }
    }

    /// Evaluate the predicate against an entity (field name -> value).
    pub fn matches(&self, entity: &Map<String, Value>) -> bool {
        match self {
            WhereOptions::And(parts) => parts.iter().all(|p| p.matches(entity)),
            WhereOptions::Or(parts) => parts.iter().any(|p| p.matches(entity)),
            WhereOptions::Not(inner) => !inner.matches(entity),
            WhereOptions::Compare { field, op, value } => {
                let actual = entity.get(field).unwrap_or(&Value::Null);
                compare_matches(actual, *op, value)
            }
        }
    }
}

fn compare_matches(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    match op {
        CompareOp::Eq => loose_eq(actual, expected),
        CompareOp::Ne => !loose_eq(actual, expected),
        CompareOp::Gt => !actual.is_null() && compare_values(actual, expected) == Ordering::Greater,
        CompareOp::Gte => !actual.is_null() && compare_values(actual, expected) != Ordering::Less,
        CompareOp::Lt => !actual.is_null() && compare_values(actual, expected) == Ordering::Less,
        CompareOp::Lte => !actual.is_null() && compare_values(actual, expected) != Ordering::Greater,
        CompareOp::In => operand_items(expected).iter().any(|e| loose_eq(actual, e)),
        CompareOp::Nin => !operand_items(expected).iter().any(|e| loose_eq(actual, e)),
        CompareOp::Like | CompareOp::Ilike => {
            let (Some(text), Some(pattern)) = (value_text(actual), value_text(expected)) else {
                return false;
            };
            like_regex(&pattern, op == CompareOp::Ilike)
                .map(|re| re.is_match(&text))
                .unwrap_or(false)
        }
        CompareOp::Null => {
            let want_null = !matches!(expected, Value::Bool(false));
            actual.is_null() == want_null
        }
    }
}

fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// SQL LIKE pattern (`%`, `_`) as an anchored regex.
fn like_regex(pattern: &str, case_insensitive: bool) -> Option<Regex> {
    let mut re = String::from(if case_insensitive { "(?i)^" } else { "^" });
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// Equality tolerant of numbers arriving as strings (and vice versa).
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        (Value::String(s), Value::Bool(b)) | (Value::Bool(b), Value::String(s)) => s == &b.to_string(),
        _ => a == b,
    }
}

/// Total order used for sorting and range comparisons. Nulls sort first.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(s), Value::Number(n)) => match s.parse::<f64>() {
            Ok(f) => f.partial_cmp(&n.as_f64().unwrap_or(0.0)).unwrap_or(Ordering::Equal),
            Err(_) => s.as_str().cmp(n.to_string().as_str()),
        },
        (Value::Number(n), Value::String(s)) => compare_values(&Value::String(s.clone()), &Value::Number(n.clone())).reverse(),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn decodes_primitives() {
        assert_eq!(decode_value("5"), json!(5));
        assert_eq!(decode_value("2.5"), json!(2.5));
        assert_eq!(decode_value("-3"), json!(-3));
        assert_eq!(decode_value("true"), json!(true));
        assert_eq!(decode_value("false"), json!(false));
        assert_eq!(decode_value("null"), Value::Null);
        assert_eq!(decode_value("undefined"), Value::Null);
        assert_eq!(decode_value("hello"), json!("hello"));
        assert_eq!(decode_value("where"), json!("where"));
        assert_eq!(decode_value(""), json!(""));
        assert_eq!(decode_value("inf"), json!("inf"));
        assert_eq!(decode_value("1-2"), json!("1-2"));
    }

    #[test]
    fn bare_field_means_eq() {
        let w = WhereOptions::from_query(&pairs(&[("where[title]", "Hello")]));
        assert_eq!(w, WhereOptions::eq("title", json!("Hello")));
    }

    #[test]
    fn operators_and_or_groups() {
        let w = WhereOptions::from_query(&pairs(&[
            ("where[views][$gte]", "10"),
            ("where[$or][0][title][$like]", "%rust%"),
            ("where[$or][1][published]", "true"),
        ]));
        let entity = |title: &str, views: i64, published: bool| {
            json!({ "title": title, "views": views, "published": published })
                .as_object()
                .cloned()
                .unwrap()
        };
        assert!(w.matches(&entity("learning rust", 12, false)));
        assert!(w.matches(&entity("go", 12, true)));
        assert!(!w.matches(&entity("go", 12, false)));
        assert!(!w.matches(&entity("rust", 3, true)));
    }

    #[test]
    fn in_accepts_pushes_and_commas() {
        let pushed = WhereOptions::from_query(&pairs(&[("where[id][$in][]", "1"), ("where[id][$in][]", "3")]));
        let commas = WhereOptions::from_query(&pairs(&[("where[id][$in]", "1,3")]));
        for w in [pushed, commas] {
            assert!(w.matches(json!({ "id": 3 }).as_object().unwrap()));
            assert!(!w.matches(json!({ "id": 2 }).as_object().unwrap()));
        }
    }

    #[test]
    fn json_where_value() {
        let w = WhereOptions::from_query(&pairs(&[("where", r#"{"title":{"$ne":"x"}}"#)]));
        assert_eq!(
            w,
            WhereOptions::Compare { field: "title".into(), op: CompareOp::Ne, value: json!("x") }
        );
    }

    #[test]
    fn unknown_operator_dropped() {
        let w = WhereOptions::from_query(&pairs(&[("where[title][$regex]", "x")]));
        assert!(w.is_empty());
        let w = WhereOptions::from_query(&pairs(&[("where[$not][title][$regex]", "x")]));
        assert!(w.is_empty());
    }

    #[test]
    fn not_and_null_operator_decode_leaves() {
        let w = WhereOptions::from_query(&pairs(&[("where[$not][views]", "3"), ("where[author][$null]", "false")]));
        assert_eq!(
            w,
            WhereOptions::And(vec![
                WhereOptions::Not(Box::new(WhereOptions::eq("views", json!(3)))),
                WhereOptions::Compare { field: "author".into(), op: CompareOp::Null, value: json!(false) },
            ])
        );
    }

    #[test]
    fn null_operator() {
        let w = WhereOptions::from_query(&pairs(&[("where[author][$null]", "true")]));
        assert!(w.matches(json!({ "author": null }).as_object().unwrap()));
        assert!(!w.matches(json!({ "author": 1 }).as_object().unwrap()));
    }

    #[test]
    fn ilike_is_case_insensitive() {
        let w = WhereOptions::from_query(&pairs(&[("where[title][$ilike]", "rust%")]));
        assert!(w.matches(json!({ "title": "Rust in Action" }).as_object().unwrap()));
    }
}
