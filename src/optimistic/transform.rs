//! Built-in structural transform.
//!
//! Dispatch is `QueryShape × WriteAction`: each write event of a mutation is
//! replayed against the cached result in order, and every cell of the matrix
//! either produces new data or declines. Declined cells leave the entry for
//! the settlement-time invalidation pass.

use serde_json::{Map, Value};

use super::filter::evaluate;
use super::row::{build_row, id_fields_match, merge_update};
use crate::graph::{RelationGraph, WriteAction, WriteEvent, enumerate};
use crate::key::CacheKey;
use crate::types::QueryOperation;

const NON_COUNT_AGGREGATES: [&str; 4] = ["_avg", "_sum", "_min", "_max"];
const PAGINATION_ARGS: [&str; 3] = ["take", "skip", "cursor"];

/// How a cached result is laid out, as far as patching is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    /// `findUnique` / `findFirst`: a row or `null`.
    Single,
    /// `findMany`: an array of rows.
    List,
    /// Plain `count`: a number.
    Count,
    /// `aggregate` with only `_count: true`: `{ "_count": n }`.
    CountAggregate,
    /// Anything else; never patched.
    Unsupported,
}

impl QueryShape {
    pub fn of(operation: &QueryOperation, args: Option<&Value>) -> Self {
        match operation {
            QueryOperation::FindUnique | QueryOperation::FindFirst => Self::Single,
            QueryOperation::FindMany => Self::List,
            QueryOperation::Count if !has_any(args, &PAGINATION_ARGS) => Self::Count,
            QueryOperation::Aggregate if counts_only(args) => Self::CountAggregate,
            _ => Self::Unsupported,
        }
    }
}

/// Replay `events` against `data`, the cached result of `key`.
///
/// Returns `None` when no event changed anything.
pub fn transform(
    graph: &RelationGraph,
    key: &CacheKey,
    data: &Value,
    events: &[WriteEvent],
) -> Option<Value> {
    let shape = QueryShape::of(&key.operation, key.args.as_ref());
    if shape == QueryShape::Unsupported {
        return None;
    }

    let query = QueryScope {
        graph,
        model: &key.model,
        filter: key
            .args
            .as_ref()
            .and_then(|a| a.get("where"))
            .filter(|w| !is_empty_filter(w)),
    };

    let mut current = data.clone();
    let mut changed = false;
    for event in events {
        let next = match shape {
            QueryShape::Single => query.patch_single(&current, event),
            QueryShape::List => query.patch_list(&current, event),
            QueryShape::Count => query.patch_count(&current, event),
            QueryShape::CountAggregate => query.patch_count_aggregate(&current, event),
            QueryShape::Unsupported => None,
        };
        if let Some(next) = next {
            current = next;
            changed = true;
        }
    }
    changed.then_some(current)
}

struct QueryScope<'a> {
    graph: &'a RelationGraph,
    model: &'a str,
    filter: Option<&'a Value>,
}

impl QueryScope<'_> {
    fn patch_single(&self, data: &Value, event: &WriteEvent) -> Option<Value> {
        match patch_tree(self.graph, self.model, data, event) {
            RowPatch::Keep => None,
            RowPatch::Replace(row) => Some(row),
            RowPatch::Remove => Some(Value::Null),
        }
    }

    fn patch_list(&self, data: &Value, event: &WriteEvent) -> Option<Value> {
        let Value::Array(rows) = data else {
            return None;
        };

        if event.model == self.model {
            match event.action {
                WriteAction::Create => return self.append(rows, std::iter::once(&event.payload)),
                WriteAction::CreateMany => {
                    let items = event.payload.get("data").unwrap_or(&Value::Null);
                    return self.append(rows, enumerate(items));
                }
                WriteAction::Upsert => {
                    let filter = event.payload.get("where").unwrap_or(&Value::Null);
                    let exists = rows
                        .iter()
                        .any(|row| selects(self.graph, self.model, row, filter, event));
                    if !exists {
                        let create = event.payload.get("create").unwrap_or(&Value::Null);
                        return self.append(rows, std::iter::once(create));
                    }
                }
                _ => {}
            }
        }

        patch_rows(self.graph, self.model, rows, event).map(Value::Array)
    }

    // Append rows built from create payloads, skipping ones the query filter
    // rules out and ones already present.
    fn append<'v>(
        &self,
        rows: &[Value],
        payloads: impl Iterator<Item = &'v Value>,
    ) -> Option<Value> {
        let mut out = rows.to_vec();
        let mut added = false;
        for payload in payloads {
            let Some(row) = build_row(self.graph, self.model, payload, &out) else {
                continue;
            };
            if !evaluate(self.graph, self.model, self.filter, &row).is_possible() {
                continue;
            }
            if out.iter().any(|existing| id_fields_match(self.graph, self.model, existing, &row)) {
                continue;
            }
            out.push(row);
            added = true;
        }
        added.then_some(Value::Array(out))
    }

    fn patch_count(&self, data: &Value, event: &WriteEvent) -> Option<Value> {
        let count = data.as_u64()?;
        self.adjust_count(count, event).map(Value::from)
    }

    fn patch_count_aggregate(&self, data: &Value, event: &WriteEvent) -> Option<Value> {
        let Value::Object(fields) = data else {
            return None;
        };
        if fields.len() != 1 {
            return None;
        }
        let count = fields.get("_count")?.as_u64()?;
        let next = self.adjust_count(count, event)?;
        let mut out = Map::new();
        out.insert("_count".to_string(), Value::from(next));
        Some(Value::Object(out))
    }

    fn adjust_count(&self, count: u64, event: &WriteEvent) -> Option<u64> {
        if event.model != self.model {
            return None;
        }
        match event.action {
            WriteAction::Create => self
                .count_new(std::iter::once(&event.payload))
                .map(|n| count + n),
            WriteAction::CreateMany => {
                let items = event.payload.get("data").unwrap_or(&Value::Null);
                self.count_new(enumerate(items)).map(|n| count + n)
            }
            WriteAction::Delete if self.filter.is_none() => Some(count.saturating_sub(1)),
            WriteAction::DeleteMany
                if event.depth == 0 && self.filter.is_none() && is_empty_filter(&event.payload) =>
            {
                Some(0)
            }
            _ => None,
        }
    }

    fn count_new<'v>(&self, payloads: impl Iterator<Item = &'v Value>) -> Option<u64> {
        let added = payloads
            .filter_map(|payload| build_row(self.graph, self.model, payload, &[]))
            .filter(|row| evaluate(self.graph, self.model, self.filter, row).is_possible())
            .count() as u64;
        (added > 0).then_some(added)
    }
}

enum RowPatch {
    Keep,
    Replace(Value),
    Remove,
}

// Patch one row of `model` and every row embedded in it through relation fields.
fn patch_tree(graph: &RelationGraph, model: &str, row: &Value, event: &WriteEvent) -> RowPatch {
    let patched = patch_row(graph, model, row, event);
    let base = match &patched {
        RowPatch::Remove => return RowPatch::Remove,
        RowPatch::Replace(next) => next,
        RowPatch::Keep => row,
    };
    match patch_embedded(graph, model, base, event) {
        Some(next) => RowPatch::Replace(next),
        None => patched,
    }
}

fn patch_rows(
    graph: &RelationGraph,
    model: &str,
    rows: &[Value],
    event: &WriteEvent,
) -> Option<Vec<Value>> {
    let mut out = Vec::with_capacity(rows.len());
    let mut changed = false;
    for row in rows {
        match patch_tree(graph, model, row, event) {
            RowPatch::Keep => out.push(row.clone()),
            RowPatch::Replace(next) => {
                out.push(next);
                changed = true;
            }
            RowPatch::Remove => changed = true,
        }
    }
    changed.then_some(out)
}

fn patch_embedded(
    graph: &RelationGraph,
    model: &str,
    row: &Value,
    event: &WriteEvent,
) -> Option<Value> {
    let Value::Object(fields) = row else {
        return None;
    };

    let mut out = fields.clone();
    let mut changed = false;
    for edge in graph.relations(model) {
        let Some(value) = fields.get(&edge.field) else {
            continue;
        };
        let next = match value {
            Value::Array(items) => patch_rows(graph, &edge.target, items, event).map(Value::Array),
            Value::Object(_) => match patch_tree(graph, &edge.target, value, event) {
                RowPatch::Keep => None,
                RowPatch::Replace(next) => Some(next),
                RowPatch::Remove => Some(Value::Null),
            },
            _ => None,
        };
        if let Some(next) = next {
            out.insert(edge.field.clone(), next);
            changed = true;
        }
    }
    changed.then_some(Value::Object(out))
}

// Update / delete cells for a single row. Creates never touch existing rows.
fn patch_row(graph: &RelationGraph, model: &str, row: &Value, event: &WriteEvent) -> RowPatch {
    if event.model != model || !row.is_object() {
        return RowPatch::Keep;
    }
    let payload = &event.payload;
    let (filter, changes) = match event.action {
        WriteAction::Update | WriteAction::UpdateMany => {
            (payload.get("where"), payload.get("data"))
        }
        WriteAction::Upsert => (payload.get("where"), payload.get("update")),
        WriteAction::Delete | WriteAction::DeleteMany => {
            return if selects(graph, model, row, payload, event) {
                RowPatch::Remove
            } else {
                RowPatch::Keep
            };
        }
        _ => return RowPatch::Keep,
    };

    let filter = filter.unwrap_or(&Value::Null);
    match changes {
        Some(changes) if selects(graph, model, row, filter, event) => {
            merge_update(graph, model, row, changes).map_or(RowPatch::Keep, RowPatch::Replace)
        }
        _ => RowPatch::Keep,
    }
}

// Unique writes select by id or a definite filter match; batch writes only
// at the top level (nested batches are scoped to a parent we cannot see), and
// only on a definite match.
fn selects(
    graph: &RelationGraph,
    model: &str,
    row: &Value,
    filter: &Value,
    event: &WriteEvent,
) -> bool {
    match event.action {
        WriteAction::Update | WriteAction::Upsert | WriteAction::Delete => {
            !filter.is_null()
                && (id_fields_match(graph, model, row, filter)
                    || evaluate(graph, model, Some(filter), row).is_match())
        }
        WriteAction::UpdateMany | WriteAction::DeleteMany => {
            event.depth == 0 && evaluate(graph, model, Some(filter), row).is_match()
        }
        _ => false,
    }
}

fn is_empty_filter(filter: &Value) -> bool {
    match filter {
        Value::Null => true,
        Value::Object(conditions) => conditions.is_empty(),
        _ => false,
    }
}

fn has_any(args: Option<&Value>, keys: &[&str]) -> bool {
    args.and_then(Value::as_object)
        .is_some_and(|a| keys.iter().any(|k| a.contains_key(*k)))
}

fn counts_only(args: Option<&Value>) -> bool {
    let Some(Value::Object(args)) = args else {
        return false;
    };
    args.get("_count") == Some(&Value::Bool(true))
        && !NON_COUNT_AGGREGATES.iter().any(|k| args.contains_key(*k))
        && !PAGINATION_ARGS.iter().any(|k| args.contains_key(*k))
}
