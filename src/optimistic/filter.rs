//! Best-effort evaluation of `where` filters against cached rows.
//!
//! Client-side evaluation cannot reproduce every server-side predicate, so
//! the result is tri-state. Callers decide how to treat [`FilterMatch::Unknown`]:
//! inserts count it as a match (an unconfirmed row is better than a missing
//! one), batch updates and deletes only touch definite matches.

use std::cmp::Ordering;

use chrono::DateTime;
use serde_json::{Map, Value};

use crate::graph::RelationGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMatch {
    Match,
    NoMatch,
    Unknown,
}

impl FilterMatch {
    fn from_bool(b: bool) -> Self {
        if b { Self::Match } else { Self::NoMatch }
    }

    /// Conjunction: any `NoMatch` wins, then any `Unknown`.
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::NoMatch, _) | (_, Self::NoMatch) => Self::NoMatch,
            (Self::Unknown, _) | (_, Self::Unknown) => Self::Unknown,
            _ => Self::Match,
        }
    }

    /// Disjunction: any `Match` wins, then any `Unknown`.
    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::Match, _) | (_, Self::Match) => Self::Match,
            (Self::Unknown, _) | (_, Self::Unknown) => Self::Unknown,
            _ => Self::NoMatch,
        }
    }

    pub fn not(self) -> Self {
        match self {
            Self::Match => Self::NoMatch,
            Self::NoMatch => Self::Match,
            Self::Unknown => Self::Unknown,
        }
    }

    /// Treat `Unknown` as a match.
    pub fn is_possible(self) -> bool {
        self != Self::NoMatch
    }

    pub fn is_match(self) -> bool {
        self == Self::Match
    }
}

/// How scalar values of a field compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    Plain,
    /// RFC 3339 timestamps, compared as instants.
    DateTime,
}

/// Evaluate `filter` (a `where` object of `model`) against `row`.
///
/// A missing or `null` filter matches everything.
pub fn evaluate(
    graph: &RelationGraph,
    model: &str,
    filter: Option<&Value>,
    row: &Value,
) -> FilterMatch {
    match filter {
        None | Some(Value::Null) => FilterMatch::Match,
        Some(Value::Object(conditions)) => evaluate_object(graph, model, conditions, row),
        Some(_) => FilterMatch::Unknown,
    }
}

fn evaluate_object(
    graph: &RelationGraph,
    model: &str,
    conditions: &Map<String, Value>,
    row: &Value,
) -> FilterMatch {
    let Value::Object(fields) = row else {
        return FilterMatch::Unknown;
    };

    let mut result = FilterMatch::Match;
    for (name, condition) in conditions {
        let outcome = match name.as_str() {
            "AND" => each(condition)
                .map(|c| evaluate(graph, model, Some(c), row))
                .fold(FilterMatch::Match, FilterMatch::and),
            "OR" => each(condition)
                .map(|c| evaluate(graph, model, Some(c), row))
                .fold(FilterMatch::NoMatch, FilterMatch::or),
            "NOT" => each(condition)
                .map(|c| evaluate(graph, model, Some(c), row))
                .fold(FilterMatch::Match, FilterMatch::and)
                .not(),
            field => evaluate_field(graph, model, field, condition, fields.get(field)),
        };
        result = result.and(outcome);
        if result == FilterMatch::NoMatch {
            break;
        }
    }
    result
}

fn evaluate_field(
    graph: &RelationGraph,
    model: &str,
    field: &str,
    condition: &Value,
    actual: Option<&Value>,
) -> FilterMatch {
    let Some(def) = graph.schema().get_model(model).and_then(|m| m.get_field(field)) else {
        return FilterMatch::Unknown;
    };
    if graph.relation(model, field).is_some() || def.ty == "Json" {
        return FilterMatch::Unknown;
    }
    let Some(actual) = actual else {
        return FilterMatch::Unknown;
    };

    let scalar = if def.ty == "DateTime" {
        Scalar::DateTime
    } else {
        Scalar::Plain
    };
    match condition {
        Value::Object(ops) => evaluate_ops(ops, actual, scalar),
        expected => equals(actual, expected, scalar),
    }
}

fn evaluate_ops(ops: &Map<String, Value>, actual: &Value, scalar: Scalar) -> FilterMatch {
    let insensitive = ops.get("mode").and_then(Value::as_str) == Some("insensitive");
    let mut result = FilterMatch::Match;

    for (op, operand) in ops {
        let outcome = match op.as_str() {
            "mode" => continue,
            "equals" => equals(actual, operand, scalar),
            "not" => match operand {
                Value::Object(inner) => evaluate_ops(inner, actual, scalar).not(),
                other => equals(actual, other, scalar).not(),
            },
            "in" => membership(actual, operand, scalar),
            "notIn" => membership(actual, operand, scalar).not(),
            "lt" => ordering(actual, operand, scalar, |o| o == Ordering::Less),
            "lte" => ordering(actual, operand, scalar, |o| o != Ordering::Greater),
            "gt" => ordering(actual, operand, scalar, |o| o == Ordering::Greater),
            "gte" => ordering(actual, operand, scalar, |o| o != Ordering::Less),
            "contains" => text(actual, operand, insensitive, |a, b| a.contains(b)),
            "startsWith" => text(actual, operand, insensitive, |a, b| a.starts_with(b)),
            "endsWith" => text(actual, operand, insensitive, |a, b| a.ends_with(b)),
            _ => FilterMatch::Unknown,
        };
        result = result.and(outcome);
    }
    result
}

fn equals(actual: &Value, expected: &Value, scalar: Scalar) -> FilterMatch {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) if scalar == Scalar::DateTime => {
            instants(a, b).map_or(FilterMatch::Unknown, |o| FilterMatch::from_bool(o.is_eq()))
        }
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => FilterMatch::from_bool(a == b),
            _ => FilterMatch::Unknown,
        },
        (Value::Object(_), _) | (_, Value::Object(_)) => FilterMatch::Unknown,
        (Value::Array(_), _) | (_, Value::Array(_)) => FilterMatch::Unknown,
        (a, b) if std::mem::discriminant(a) == std::mem::discriminant(b) => {
            FilterMatch::from_bool(a == b)
        }
        (Value::Null, _) | (_, Value::Null) => FilterMatch::NoMatch,
        _ => FilterMatch::Unknown,
    }
}

fn membership(actual: &Value, candidates: &Value, scalar: Scalar) -> FilterMatch {
    let Value::Array(candidates) = candidates else {
        return FilterMatch::Unknown;
    };
    candidates
        .iter()
        .map(|c| equals(actual, c, scalar))
        .fold(FilterMatch::NoMatch, FilterMatch::or)
}

fn ordering(
    actual: &Value,
    operand: &Value,
    scalar: Scalar,
    accept: impl Fn(Ordering) -> bool,
) -> FilterMatch {
    let ord = match (actual, operand) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => match scalar {
            Scalar::DateTime => instants(a, b),
            Scalar::Plain => Some(a.as_str().cmp(b.as_str())),
        },
        _ => None,
    };
    ord.map_or(FilterMatch::Unknown, |o| FilterMatch::from_bool(accept(o)))
}

// `...00Z` and `...00.000+00:00` are the same instant. Unparseable input
// compares as unknown.
fn instants(a: &str, b: &str) -> Option<Ordering> {
    let a = DateTime::parse_from_rfc3339(a).ok()?;
    let b = DateTime::parse_from_rfc3339(b).ok()?;
    Some(a.cmp(&b))
}

fn text(
    actual: &Value,
    operand: &Value,
    insensitive: bool,
    test: impl Fn(&str, &str) -> bool,
) -> FilterMatch {
    match (actual.as_str(), operand.as_str()) {
        (Some(a), Some(b)) if insensitive => {
            FilterMatch::from_bool(test(&a.to_lowercase(), &b.to_lowercase()))
        }
        (Some(a), Some(b)) => FilterMatch::from_bool(test(a, b)),
        _ => FilterMatch::Unknown,
    }
}

fn each(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Array(items) => Box::new(items.iter()),
        other => Box::new(std::iter::once(other)),
    }
}
