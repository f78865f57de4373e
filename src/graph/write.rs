//! Nested write traversal.
//!
//! A mutation's arguments are a tree of relational write directives. The
//! visitor flattens that tree into an ordered list of [`WriteEvent`]s, one per
//! directive, each tagged with the model it applies to. The relation graph
//! uses the events to compute the mutated model set and the optimistic
//! applier replays them against cached data.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::{Map, Value, json};

use super::{RelationEdge, RelationGraph};
use crate::types::{MutationDescriptor, WriteOperation};

/// Kind of a single (possibly nested) write directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteAction {
    Create,
    CreateMany,
    ConnectOrCreate,
    Connect,
    Update,
    UpdateMany,
    Upsert,
    Delete,
    DeleteMany,
    Disconnect,
    Set,
}

impl WriteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::CreateMany => "createMany",
            Self::ConnectOrCreate => "connectOrCreate",
            Self::Connect => "connect",
            Self::Update => "update",
            Self::UpdateMany => "updateMany",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
            Self::DeleteMany => "deleteMany",
            Self::Disconnect => "disconnect",
            Self::Set => "set",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "create" => Self::Create,
            "createMany" => Self::CreateMany,
            "connectOrCreate" => Self::ConnectOrCreate,
            "connect" => Self::Connect,
            "update" => Self::Update,
            "updateMany" => Self::UpdateMany,
            "upsert" => Self::Upsert,
            "delete" => Self::Delete,
            "deleteMany" => Self::DeleteMany,
            "disconnect" => Self::Disconnect,
            "set" => Self::Set,
            _ => return None,
        })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete | Self::DeleteMany)
    }
}

impl fmt::Display for WriteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One write directive, normalised.
///
/// Payload shapes by action:
///
/// | action | payload |
/// | ------ | ------- |
/// | `Create` | row data |
/// | `CreateMany` | `{ data: [row, ..] }` |
/// | `ConnectOrCreate` | `{ where, create }` |
/// | `Update` / `UpdateMany` | `{ where, data }` (`where` may be `null` for to-one) |
/// | `Upsert` | `{ where, create, update }` |
/// | `Delete` / `DeleteMany` | the `where` filter (`null` when unfiltered) |
/// | `Connect` / `Disconnect` / `Set` | the raw directive value |
#[derive(Debug, Clone, PartialEq)]
pub struct WriteEvent {
    pub model: String,
    pub action: WriteAction,
    pub payload: Value,
    /// Nesting depth; 0 for the top-level operation.
    pub depth: usize,
}

/// Flatten a mutation into its write events, top-level first.
pub fn visit_writes(graph: &RelationGraph, mutation: &MutationDescriptor) -> Vec<WriteEvent> {
    let mut visitor = Visitor {
        graph,
        events: Vec::new(),
    };
    visitor.visit_top(&mutation.model, mutation.operation, &mutation.args);
    visitor.events
}

impl RelationGraph {
    /// Models a write on `model` may alter: `model` itself, every model
    /// targeted by a nested relational write directive, and every model that
    /// cascades from a deleted one.
    pub fn models_affected_by_write(&self, mutation: &MutationDescriptor) -> BTreeSet<String> {
        let mut affected = BTreeSet::new();
        affected.insert(mutation.model.clone());

        for event in visit_writes(self, mutation) {
            if event.action.is_delete() {
                self.collect_cascades(&event.model, &mut affected);
            }
            affected.insert(event.model);
        }
        affected
    }

    fn collect_cascades(&self, model: &str, affected: &mut BTreeSet<String>) {
        let mut visited = BTreeSet::new();
        let mut stack = vec![model.to_string()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for dependent in self.cascade_dependents(&current) {
                affected.insert(dependent.clone());
                stack.push(dependent.clone());
            }
        }
    }
}

struct Visitor<'a> {
    graph: &'a RelationGraph,
    events: Vec<WriteEvent>,
}

impl Visitor<'_> {
    fn emit(&mut self, model: &str, action: WriteAction, payload: Value, depth: usize) {
        self.events.push(WriteEvent {
            model: model.to_string(),
            action,
            payload,
            depth,
        });
    }

    fn visit_top(&mut self, model: &str, operation: WriteOperation, args: &Value) {
        let data = args.get("data").cloned().unwrap_or(Value::Null);
        let filter = args.get("where").cloned().unwrap_or(Value::Null);

        match operation {
            WriteOperation::Create => {
                self.emit(model, WriteAction::Create, data.clone(), 0);
                self.visit_data(model, &data, 1);
            }
            WriteOperation::CreateMany | WriteOperation::CreateManyAndReturn => {
                self.emit(model, WriteAction::CreateMany, json!({ "data": data }), 0);
            }
            WriteOperation::Update => {
                self.emit(
                    model,
                    WriteAction::Update,
                    json!({ "where": filter, "data": data }),
                    0,
                );
                self.visit_data(model, &data, 1);
            }
            WriteOperation::UpdateMany | WriteOperation::UpdateManyAndReturn => {
                self.emit(
                    model,
                    WriteAction::UpdateMany,
                    json!({ "where": filter, "data": data }),
                    0,
                );
            }
            WriteOperation::Upsert => {
                self.emit(model, WriteAction::Upsert, args.clone(), 0);
                for branch in ["create", "update"] {
                    if let Some(payload) = args.get(branch) {
                        self.visit_data(model, payload, 1);
                    }
                }
            }
            WriteOperation::Delete => self.emit(model, WriteAction::Delete, filter, 0),
            WriteOperation::DeleteMany => self.emit(model, WriteAction::DeleteMany, filter, 0),
        }
    }

    // Walk a row payload of `model`, descending into relation fields.
    fn visit_data(&mut self, model: &str, data: &Value, depth: usize) {
        let Value::Object(fields) = data else {
            return;
        };
        for (field, value) in fields {
            let Some(edge) = self.graph.relation(model, field) else {
                continue;
            };
            let Value::Object(directives) = value else {
                continue;
            };
            let edge = edge.clone();
            self.visit_directives(&edge, directives, depth);
        }
    }

    fn visit_directives(
        &mut self,
        edge: &RelationEdge,
        directives: &Map<String, Value>,
        depth: usize,
    ) {
        let target = edge.target.as_str();
        for (key, value) in directives {
            let Some(action) = WriteAction::from_key(key) else {
                continue;
            };
            match action {
                WriteAction::Create => {
                    for item in enumerate(value) {
                        self.emit(target, action, item.clone(), depth);
                        self.visit_data(target, item, depth + 1);
                    }
                }
                WriteAction::CreateMany => {
                    let data = value.get("data").cloned().unwrap_or(Value::Null);
                    self.emit(target, action, json!({ "data": data }), depth);
                }
                WriteAction::ConnectOrCreate => {
                    for item in enumerate(value) {
                        self.emit(target, action, item.clone(), depth);
                        if let Some(create) = item.get("create") {
                            self.visit_data(target, create, depth + 1);
                        }
                    }
                }
                WriteAction::Update | WriteAction::UpdateMany => {
                    for item in enumerate(value) {
                        let payload = normalize_update(edge, action, item);
                        let data = payload.get("data").cloned().unwrap_or(Value::Null);
                        self.emit(target, action, payload, depth);
                        if action == WriteAction::Update {
                            self.visit_data(target, &data, depth + 1);
                        }
                    }
                }
                WriteAction::Upsert => {
                    for item in enumerate(value) {
                        self.emit(target, action, item.clone(), depth);
                        for branch in ["create", "update"] {
                            if let Some(payload) = item.get(branch) {
                                self.visit_data(target, payload, depth + 1);
                            }
                        }
                    }
                }
                WriteAction::Delete | WriteAction::DeleteMany => {
                    if edge.to_many || value.is_object() || value.is_array() {
                        for item in enumerate(value) {
                            self.emit(target, action, item.clone(), depth);
                        }
                    } else {
                        // to-one `delete: true`
                        self.emit(target, action, Value::Null, depth);
                    }
                }
                WriteAction::Connect | WriteAction::Disconnect | WriteAction::Set => {
                    self.emit(target, action, value.clone(), depth);
                }
            }
        }
    }
}

// To-one updates may pass the row data directly instead of `{ where, data }`.
fn normalize_update(edge: &RelationEdge, action: WriteAction, item: &Value) -> Value {
    let wrapped = item.get("data").is_some()
        && (edge.to_many || action == WriteAction::UpdateMany || item.get("where").is_some());
    if wrapped {
        json!({
            "where": item.get("where").cloned().unwrap_or(Value::Null),
            "data": item.get("data").cloned().unwrap_or(Value::Null),
        })
    } else {
        json!({ "where": Value::Null, "data": item.clone() })
    }
}

/// Iterate a directive value that may be a single object or a list.
pub(crate) fn enumerate(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Array(items) => Box::new(items.iter()),
        Value::Null => Box::new(std::iter::empty()),
        other => Box::new(std::iter::once(other)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::schema::{FieldDef, ModelDef, ReferentialAction, Schema};

    fn graph() -> RelationGraph {
        let schema = Schema::new()
            .model(
                ModelDef::new("User")
                    .field(FieldDef::scalar("id", "String").id())
                    .field(FieldDef::relation("posts", "Post").array())
                    .field(FieldDef::relation("profile", "Profile").optional()),
            )
            .model(
                ModelDef::new("Post")
                    .field(FieldDef::scalar("id", "String").id())
                    .field(FieldDef::scalar("authorId", "String"))
                    .field(
                        FieldDef::relation("author", "User")
                            .references(&["authorId"], &["id"])
                            .on_delete(ReferentialAction::Cascade),
                    )
                    .field(FieldDef::relation("tags", "Tag").array()),
            )
            .model(
                ModelDef::new("Comment")
                    .field(FieldDef::scalar("id", "String").id())
                    .field(FieldDef::scalar("postId", "String"))
                    .field(
                        FieldDef::relation("post", "Post")
                            .references(&["postId"], &["id"])
                            .on_delete(ReferentialAction::Cascade),
                    ),
            )
            .model(
                ModelDef::new("Profile")
                    .field(FieldDef::scalar("id", "String").id())
                    .field(FieldDef::scalar("bio", "String")),
            )
            .model(ModelDef::new("Tag").field(FieldDef::scalar("id", "String").id()))
            .finish()
            .unwrap();
        RelationGraph::new(Arc::new(schema))
    }

    fn names(set: BTreeSet<String>) -> Vec<String> {
        set.into_iter().collect()
    }

    #[test]
    fn plain_update_affects_only_its_model() {
        let mutation = MutationDescriptor::update(
            "User",
            json!({"where": {"id": "u1"}, "data": {"name": "Bob"}}),
        );
        assert_eq!(names(graph().models_affected_by_write(&mutation)), vec!["User"]);
    }

    #[test]
    fn nested_directives_add_targets() {
        let mutation = MutationDescriptor::create(
            "User",
            json!({"data": {
                "id": "u1",
                "posts": {"create": [{"id": "p1", "tags": {"connect": {"id": "t1"}}}]},
                "profile": {"connectOrCreate": {"where": {"id": "pr1"}, "create": {"bio": "x"}}}
            }}),
        );
        assert_eq!(
            names(graph().models_affected_by_write(&mutation)),
            vec!["Post", "Profile", "Tag", "User"]
        );
    }

    #[test]
    fn deletes_pull_in_cascading_dependents() {
        let mutation = MutationDescriptor::delete("User", json!({"where": {"id": "u1"}}));
        assert_eq!(
            names(graph().models_affected_by_write(&mutation)),
            vec!["Comment", "Post", "User"]
        );
    }

    #[test]
    fn nested_delete_cascades_too() {
        let mutation = MutationDescriptor::update(
            "User",
            json!({"where": {"id": "u1"}, "data": {"posts": {"delete": {"id": "p1"}}}}),
        );
        assert_eq!(
            names(graph().models_affected_by_write(&mutation)),
            vec!["Comment", "Post", "User"]
        );
    }

    #[test]
    fn events_are_ordered_top_level_first() {
        let mutation = MutationDescriptor::update(
            "User",
            json!({"where": {"id": "u1"}, "data": {
                "posts": {"update": {"where": {"id": "p1"}, "data": {"title": "T"}}},
                "profile": {"update": {"bio": "hello"}}
            }}),
        );
        let events = visit_writes(&graph(), &mutation);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].model, "User");
        assert_eq!(events[0].depth, 0);
        assert_eq!(events[1].model, "Post");
        assert_eq!(events[1].payload, json!({"where": {"id": "p1"}, "data": {"title": "T"}}));
        assert_eq!(events[2].model, "Profile");
        assert_eq!(events[2].payload, json!({"where": null, "data": {"bio": "hello"}}));
    }

    #[test]
    fn create_many_wraps_data() {
        let mutation = MutationDescriptor::new(
            "User",
            WriteOperation::CreateMany,
            json!({"data": [{"id": "a"}, {"id": "b"}]}),
        );
        let events = visit_writes(&graph(), &mutation);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, WriteAction::CreateMany);
        assert_eq!(events[0].payload, json!({"data": [{"id": "a"}, {"id": "b"}]}));
    }

    #[test]
    fn non_object_arguments_are_tolerated() {
        let mutation = MutationDescriptor::create("User", json!("garbage"));
        let events = visit_writes(&graph(), &mutation);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, Value::Null);
    }
}
