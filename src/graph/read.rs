//! Models embedded in a query result through relation selections.

use std::collections::BTreeSet;

use serde_json::Value;

use super::{RelationGraph, enumerate};

const SELECTION_KEYS: [&str; 2] = ["select", "include"];
const COUNT_FIELD: &str = "_count";
const LOGICAL_KEYS: [&str; 3] = ["AND", "OR", "NOT"];
const RELATION_FILTER_KEYS: [&str; 5] = ["some", "every", "none", "is", "isNot"];

impl RelationGraph {
    /// Models whose rows (or row counts) are embedded in the result of a query
    /// on `model` with the given arguments, or whose rows decide which rows
    /// the result contains.
    ///
    /// Walks the `select` / `include` trees and the relation filters in
    /// `where` of `args`, following only fields the schema marks as
    /// relations. `model` itself is not included unless a selection reaches
    /// it again (e.g. a self relation).
    ///
    /// If a relation target repeats along the current selection path, the
    /// walk stops descending there and adds the schema closure of that target
    /// instead, so the result over-approximates rather than under-approximates.
    pub fn models_reachable_from(&self, model: &str, args: Option<&Value>) -> BTreeSet<String> {
        let mut reached = BTreeSet::new();
        if let Some(args) = args {
            let mut path = vec![model.to_string()];
            self.walk_selection(model, args, &mut path, &mut reached);
        }
        reached
    }

    fn walk_selection(
        &self,
        model: &str,
        args: &Value,
        path: &mut Vec<String>,
        reached: &mut BTreeSet<String>,
    ) {
        if let Some(filter) = args.get("where") {
            self.walk_filter(model, filter, path, reached);
        }

        for key in SELECTION_KEYS {
            let Some(Value::Object(selection)) = args.get(key) else {
                continue;
            };

            for (field, sub) in selection {
                if !is_selected(sub) {
                    continue;
                }
                if field == COUNT_FIELD {
                    self.collect_counted(model, sub, reached);
                    continue;
                }
                let Some(edge) = self.relation(model, field) else {
                    continue;
                };

                reached.insert(edge.target.clone());
                if path.contains(&edge.target) {
                    reached.extend(self.schema_closure(&edge.target));
                    continue;
                }
                if sub.is_object() {
                    path.push(edge.target.clone());
                    self.walk_selection(&edge.target, sub, path, reached);
                    path.pop();
                }
            }
        }
    }

    // Relation filters: `{author: {name: ..}}`, `{author: {is: ..}}`,
    // `{posts: {some: ..}}`, nested through `AND` / `OR` / `NOT`.
    fn walk_filter(
        &self,
        model: &str,
        filter: &Value,
        path: &mut Vec<String>,
        reached: &mut BTreeSet<String>,
    ) {
        let Value::Object(conditions) = filter else {
            return;
        };

        for (field, condition) in conditions {
            if LOGICAL_KEYS.contains(&field.as_str()) {
                for inner in enumerate(condition) {
                    self.walk_filter(model, inner, path, reached);
                }
                continue;
            }
            let Some(edge) = self.relation(model, field) else {
                continue;
            };

            reached.insert(edge.target.clone());
            if path.contains(&edge.target) {
                reached.extend(self.schema_closure(&edge.target));
                continue;
            }

            path.push(edge.target.clone());
            let wrapped: Vec<&Value> = RELATION_FILTER_KEYS
                .iter()
                .filter_map(|key| condition.get(*key))
                .collect();
            if wrapped.is_empty() {
                self.walk_filter(&edge.target, condition, path, reached);
            } else {
                for inner in wrapped {
                    self.walk_filter(&edge.target, inner, path, reached);
                }
            }
            path.pop();
        }
    }

    // `_count: true` counts every to-many relation, `_count: { select: { posts: .. } }`
    // only the listed ones.
    fn collect_counted(&self, model: &str, sub: &Value, reached: &mut BTreeSet<String>) {
        match sub.get("select") {
            Some(Value::Object(counted)) => {
                for (field, selected) in counted {
                    if !is_selected(selected) {
                        continue;
                    }
                    if let Some(edge) = self.relation(model, field) {
                        reached.insert(edge.target.clone());
                    }
                }
            }
            _ => {
                for edge in self.relations(model).iter().filter(|e| e.to_many) {
                    reached.insert(edge.target.clone());
                }
            }
        }
    }
}

fn is_selected(value: &Value) -> bool {
    !matches!(value, Value::Bool(false) | Value::Null)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::graph::RelationGraph;
    use crate::schema::{FieldDef, ModelDef, Schema};

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
                    .field(FieldDef::relation("author", "User"))
                    .field(FieldDef::relation("comments", "Comment").array()),
            )
            .model(
                ModelDef::new("Comment")
                    .field(FieldDef::scalar("id", "String").id())
                    .field(FieldDef::relation("post", "Post")),
            )
            .model(
                ModelDef::new("Profile")
                    .field(FieldDef::scalar("id", "String").id())
                    .field(FieldDef::relation("user", "User")),
            )
            .finish()
            .unwrap();
        RelationGraph::new(Arc::new(schema))
    }

    fn names(set: std::collections::BTreeSet<String>) -> Vec<String> {
        set.into_iter().collect()
    }

    #[test]
    fn include_reaches_relation_target() {
        let reached =
            graph().models_reachable_from("Post", Some(&json!({"include": {"author": true}})));
        assert_eq!(names(reached), vec!["User"]);
    }

    #[test]
    fn no_selection_reaches_nothing() {
        let g = graph();
        assert!(g.models_reachable_from("Post", Some(&json!({}))).is_empty());
        assert!(g.models_reachable_from("Post", None).is_empty());
    }

    #[test]
    fn scalar_and_disabled_selections_are_ignored() {
        let reached = graph().models_reachable_from(
            "Post",
            Some(&json!({"select": {"id": true, "author": false, "comments": null}})),
        );
        assert!(reached.is_empty());
    }

    #[test]
    fn nested_selection_is_transitive() {
        let reached = graph().models_reachable_from(
            "User",
            Some(&json!({"include": {"posts": {"select": {"comments": true}}}})),
        );
        assert_eq!(names(reached), vec!["Comment", "Post"]);
    }

    #[test]
    fn count_selection_reaches_counted_relations() {
        let g = graph();
        let reached = g.models_reachable_from(
            "User",
            Some(&json!({"select": {"_count": {"select": {"posts": true}}}})),
        );
        assert_eq!(names(reached), vec!["Post"]);

        let reached = g.models_reachable_from("Post", Some(&json!({"include": {"_count": true}})));
        assert_eq!(names(reached), vec!["Comment"]);
    }

    #[test]
    fn relation_filters_reach_their_targets() {
        let g = graph();
        let reached =
            g.models_reachable_from("Post", Some(&json!({"where": {"author": {"id": "u1"}}})));
        assert_eq!(names(reached), vec!["User"]);

        let reached = g.models_reachable_from(
            "User",
            Some(&json!({
                "where": {"OR": [
                    {"profile": {"isNot": null}},
                    {"posts": {"some": {"comments": {"none": {}}}}}
                ]}
            })),
        );
        assert_eq!(names(reached), vec!["Comment", "Post", "Profile"]);

        let reached =
            g.models_reachable_from("Post", Some(&json!({"where": {"id": "p1", "title": "x"}})));
        assert!(reached.is_empty());
    }

    #[test]
    fn filters_inside_nested_selections_are_walked() {
        let reached = graph().models_reachable_from(
            "User",
            Some(&json!({"include": {"posts": {"where": {"comments": {"some": {}}}}}})),
        );
        assert_eq!(names(reached), vec!["Comment", "Post"]);
    }

    #[test]
    fn cycle_falls_back_to_schema_closure() {
        let reached = graph().models_reachable_from(
            "Post",
            Some(&json!({
                "include": {"author": {"include": {"posts": {"include": {"author": true}}}}}
            })),
        );
        // Post -> User -> Post repeats; the closure of Post covers every connected model.
        assert_eq!(names(reached), vec!["Comment", "Post", "Profile", "User"]);
    }
}
