//! Row-level helpers: building provisional rows, merging updates, id matching.

use serde_json::{Map, Value};

use crate::graph::RelationGraph;
use crate::schema::FieldDefault;

/// Marker field set on rows produced or patched optimistically.
pub const OPTIMISTIC_MARKER: &str = "$optimistic";

/// Whether `row` carries the optimistic marker.
pub fn is_provisional(row: &Value) -> bool {
    row.get(OPTIMISTIC_MARKER).and_then(Value::as_bool) == Some(true)
}

/// Build the provisional row a `create` payload would produce.
///
/// `siblings` are the rows already cached next to the new one; they seed
/// sequential integer ids.
pub fn build_row(
    graph: &RelationGraph,
    model: &str,
    payload: &Value,
    siblings: &[Value],
) -> Option<Value> {
    let Value::Object(input) = payload else {
        return None;
    };
    let Some(model_def) = graph.schema().get_model(model) else {
        // unknown model: best we can do is echo the payload
        let mut row = input.clone();
        row.insert(OPTIMISTIC_MARKER.to_string(), Value::Bool(true));
        return Some(Value::Object(row));
    };

    let mut row = Map::new();
    for field in model_def.fields.values() {
        if let Some(edge) = graph.relation(model, &field.name) {
            if let Some(directive) = input.get(&field.name) {
                assign_foreign_keys(&edge.foreign_keys, directive, &mut row);
            }
            continue;
        }

        if let Some(value) = input.get(&field.name) {
            row.insert(field.name.clone(), value.clone());
            continue;
        }

        match &field.default {
            _ if field.ty == "DateTime" && (field.default.is_some() || field.updated_at) => {
                row.insert(field.name.clone(), Value::String(now_rfc3339()));
            }
            Some(FieldDefault::Value(value)) => {
                row.insert(field.name.clone(), value.clone());
            }
            _ => {}
        }
    }

    for id in model_def.id_field_defs() {
        if row.contains_key(&id.name) {
            continue;
        }
        let value = if id.is_integer() {
            Value::from(next_sequential_id(&id.name, siblings))
        } else {
            Value::String(uuid::Uuid::new_v4().to_string())
        };
        row.insert(id.name.clone(), value);
    }

    row.insert(OPTIMISTIC_MARKER.to_string(), Value::Bool(true));
    Some(Value::Object(row))
}

/// Shallow-merge an update payload into `row`.
///
/// Only scalar fields known to the model are merged, plus relation `connect`s
/// converted into foreign-key assignments. Atomic number operations
/// (`increment`, `decrement`, `multiply`, `divide`) are applied to numeric
/// values; `set` assigns. Returns `None` when nothing changed.
pub fn merge_update(
    graph: &RelationGraph,
    model: &str,
    row: &Value,
    data: &Value,
) -> Option<Value> {
    let (Value::Object(current), Value::Object(updates)) = (row, data) else {
        return None;
    };
    let model_def = graph.schema().get_model(model)?;

    let mut merged = current.clone();
    let mut changed = false;
    for (name, value) in updates {
        let Some(field) = model_def.get_field(name) else {
            continue;
        };
        if let Some(edge) = graph.relation(model, name) {
            changed |= assign_foreign_keys(&edge.foreign_keys, value, &mut merged);
            continue;
        }

        let next = match value {
            Value::Object(op) if field.ty != "Json" => match apply_atomic(op, current.get(name)) {
                Some(next) => next,
                None => continue,
            },
            other => other.clone(),
        };
        merged.insert(name.clone(), next);
        changed = true;
    }

    if !changed {
        return None;
    }
    merged.insert(OPTIMISTIC_MARKER.to_string(), Value::Bool(true));
    Some(Value::Object(merged))
}

/// Whether `row` and `filter` agree on every id field of `model`.
///
/// Filters that do not pin every id field never match.
pub fn id_fields_match(graph: &RelationGraph, model: &str, row: &Value, filter: &Value) -> bool {
    let (Value::Object(row), Value::Object(filter)) = (row, filter) else {
        return false;
    };
    let Some(model_def) = graph.schema().get_model(model) else {
        return false;
    };
    if model_def.id_fields.is_empty() {
        return false;
    }
    model_def.id_fields.iter().all(|id| {
        match (row.get(id), filter.get(id)) {
            (Some(a), Some(b)) => same_scalar(a, b),
            _ => false,
        }
    })
}

fn same_scalar(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        // `{ id: { equals: .. } }` in a unique filter
        (_, Value::Object(op)) => op.get("equals").is_some_and(|e| same_scalar(a, e)),
        _ => a == b,
    }
}

// `{ connect: { id: .. } }` on the owning side sets the local foreign keys.
fn assign_foreign_keys(
    foreign_keys: &[(String, String)],
    directive: &Value,
    row: &mut Map<String, Value>,
) -> bool {
    let Some(Value::Object(connect)) = directive.get("connect") else {
        return false;
    };
    let mut assigned = false;
    for (reference, fk_field) in foreign_keys {
        if let Some(value) = connect.get(reference) {
            row.insert(fk_field.clone(), value.clone());
            assigned = true;
        }
    }
    assigned
}

fn apply_atomic(op: &Map<String, Value>, current: Option<&Value>) -> Option<Value> {
    if let Some(value) = op.get("set") {
        return Some(value.clone());
    }
    let current = current?.as_f64()?;
    let (name, operand) = op.iter().next()?;
    let operand = operand.as_f64()?;
    let result = match name.as_str() {
        "increment" => current + operand,
        "decrement" => current - operand,
        "multiply" => current * operand,
        "divide" if operand != 0.0 => current / operand,
        _ => return None,
    };
    Some(number(result))
}

// Keep integers integral so equality with server data still holds.
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

fn next_sequential_id(field: &str, siblings: &[Value]) -> i64 {
    let max = siblings
        .iter()
        .filter_map(|row| row.get(field))
        .filter_map(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    max + 1
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
