//! Tests for the invalidation predicate.

use std::sync::Arc;

use muninn::{
    InvalidationPredicate, KeyFlags, MutationDescriptor, RelationGraph, Schema, WriteOperation,
    build_key, make_invalidation_predicate,
};
use serde_json::json;

fn graph() -> RelationGraph {
    let schema = Schema::from_value(json!({
        "models": {
            "User": {
                "fields": {
                    "id": { "type": "String", "id": true },
                    "name": { "type": "String" },
                    "posts": { "type": "Post", "array": true }
                }
            },
            "Post": {
                "fields": {
                    "id": { "type": "String", "id": true },
                    "authorId": { "type": "String" },
                    "author": {
                        "type": "User",
                        "relation": { "fields": ["authorId"], "references": ["id"], "onDelete": "Cascade" }
                    }
                }
            },
            "Setting": {
                "fields": { "key": { "type": "String", "id": true } }
            }
        }
    }))
    .unwrap();
    RelationGraph::new(Arc::new(schema))
}

fn update_user() -> MutationDescriptor {
    MutationDescriptor::update("User", json!({"where": {"id": "u1"}, "data": {"name": "Bob"}}))
}

// ============================================================================
// Relation reachability
// ============================================================================

#[test]
fn included_author_is_invalidated_by_user_update() {
    let graph = graph();
    let predicate = make_invalidation_predicate(&graph, &update_user());
    let key = build_key("Post", "findMany", Some(json!({"include": {"author": true}})), None);
    assert!(predicate(&key));
}

#[test]
fn relation_filter_is_invalidated_by_user_update() {
    let graph = graph();
    let predicate = make_invalidation_predicate(&graph, &update_user());
    let by_author_name = json!({"where": {"author": {"name": "Alice"}}});
    assert!(predicate(&build_key("Post", "findMany", Some(by_author_name), None)));

    let wrapped = json!({
        "where": {"AND": [{"id": {"not": "p0"}}, {"author": {"is": {"name": "Al"}}}]}
    });
    assert!(predicate(&build_key("Post", "count", Some(wrapped), None)));

    let scalar_only = json!({"where": {"authorId": "u1"}});
    assert!(!predicate(&build_key("Post", "findMany", Some(scalar_only), None)));
}

#[test]
fn post_update_reaches_users_filtered_by_posts() {
    let graph = graph();
    let mutation = MutationDescriptor::update("Post", json!({"where": {"id": "p1"}, "data": {}}));
    let predicate = make_invalidation_predicate(&graph, &mutation);
    let with_posts = json!({"where": {"posts": {"some": {"id": "p1"}}}});
    assert!(predicate(&build_key("User", "findMany", Some(with_posts), None)));
}

#[test]
fn plain_post_query_survives_user_update() {
    let graph = graph();
    let predicate = make_invalidation_predicate(&graph, &update_user());
    assert!(!predicate(&build_key("Post", "findMany", Some(json!({})), None)));
    assert!(!predicate(&build_key("Post", "findMany", None, None)));
}

#[test]
fn same_model_queries_always_match() {
    let graph = graph();
    let predicate = InvalidationPredicate::new(&graph, &update_user());
    for operation in [
        "findUnique",
        "findMany",
        "count",
        "aggregate",
        "groupBy",
        "exists",
        "custom",
    ] {
        assert!(predicate.matches(&build_key("User", operation, None, None)), "{operation}");
    }
}

#[test]
fn flags_do_not_affect_matching() {
    let graph = graph();
    let predicate = InvalidationPredicate::new(&graph, &update_user());
    let flags = KeyFlags::new().infinite(true);
    assert!(predicate.matches(&build_key("User", "findMany", None, Some(flags))));
}

// ============================================================================
// Nested writes and cascades
// ============================================================================

#[test]
fn nested_create_invalidates_target_model() {
    let graph = graph();
    let mutation = MutationDescriptor::update(
        "User",
        json!({"where": {"id": "u1"}, "data": {"posts": {"create": {"id": "p1"}}}}),
    );
    let predicate = make_invalidation_predicate(&graph, &mutation);
    assert!(predicate(&build_key("Post", "findMany", None, None)));
    assert!(!predicate(&build_key("Setting", "findMany", None, None)));
}

#[test]
fn cascading_delete_invalidates_dependents() {
    let graph = graph();
    let mutation = MutationDescriptor::new("User", WriteOperation::DeleteMany, json!({}));
    let predicate = InvalidationPredicate::new(&graph, &mutation);
    assert!(predicate.mutated_models().contains("Post"));
    assert!(predicate.matches(&build_key("Post", "count", None, None)));
}

#[test]
fn post_update_reaches_user_queries_including_posts() {
    let graph = graph();
    let mutation = MutationDescriptor::update("Post", json!({"where": {"id": "p1"}, "data": {}}));
    let predicate = make_invalidation_predicate(&graph, &mutation);
    let include_posts = json!({"include": {"posts": true}});
    let count_posts = json!({"select": {"_count": true}});
    let name_only = json!({"select": {"name": true}});
    assert!(predicate(&build_key("User", "findUnique", Some(include_posts), None)));
    assert!(predicate(&build_key("User", "findMany", Some(count_posts), None)));
    assert!(!predicate(&build_key("User", "findMany", Some(name_only), None)));
}

// ============================================================================
// Unrelated entries
// ============================================================================

#[test]
fn foreign_entries_are_never_matched() {
    let graph = graph();
    let predicate = make_invalidation_predicate(&graph, &update_user());
    assert!(!predicate(&json!(["todos", "User"])));
    assert!(!predicate(&json!(["other-lib", "User", "findMany", null, {}])));
    assert!(!predicate(&json!({"model": "User"})));
}
