//! Invalidation analyzer.
//!
//! Builds a pure predicate over raw cache keys that answers "may this cached
//! result be stale after the mutation?". A key matches when its model is in
//! the mutation's affected set, or when its `select` / `include` tree embeds
//! rows of an affected model, or its `where` filters on one.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::graph::RelationGraph;
use crate::key::parse_key;
use crate::types::MutationDescriptor;

/// Predicate over raw cache keys for one mutation.
///
/// Holds the mutated model set so repeated calls only walk the key's own
/// selection tree.
#[derive(Debug, Clone)]
pub struct InvalidationPredicate<'a> {
    graph: &'a RelationGraph,
    mutated: BTreeSet<String>,
}

impl<'a> InvalidationPredicate<'a> {
    pub fn new(graph: &'a RelationGraph, mutation: &MutationDescriptor) -> Self {
        Self {
            graph,
            mutated: graph.models_affected_by_write(mutation),
        }
    }

    /// Models the mutation may alter.
    pub fn mutated_models(&self) -> &BTreeSet<String> {
        &self.mutated
    }

    /// Whether the entry under `key` should be invalidated. Keys that are not
    /// muninn keys never match.
    pub fn matches(&self, key: &Value) -> bool {
        let Some(parsed) = parse_key(key) else {
            return false;
        };

        self.mutated.contains(&parsed.model)
            || self
                .graph
                .models_reachable_from(&parsed.model, parsed.args.as_ref())
                .iter()
                .any(|m| self.mutated.contains(m))
    }
}

/// Build the invalidation predicate for `mutation`.
pub fn make_invalidation_predicate<'a>(
    graph: &'a RelationGraph,
    mutation: &MutationDescriptor,
) -> impl Fn(&Value) -> bool + Send + Sync + 'a {
    let predicate = InvalidationPredicate::new(graph, mutation);
    move |key| predicate.matches(key)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::key::build_key;
    use crate::schema::{FieldDef, ModelDef, Schema};

    fn graph() -> RelationGraph {
        let schema = Schema::new()
            .model(
                ModelDef::new("User")
                    .field(FieldDef::scalar("id", "String").id())
                    .field(FieldDef::relation("posts", "Post").array()),
            )
            .model(
                ModelDef::new("Post")
                    .field(FieldDef::scalar("id", "String").id())
                    .field(FieldDef::relation("author", "User")),
            )
            .finish()
            .unwrap();
        RelationGraph::new(Arc::new(schema))
    }

    #[test]
    fn foreign_keys_never_match() {
        let g = graph();
        let mutation = MutationDescriptor::update("User", json!({}));
        let predicate = make_invalidation_predicate(&g, &mutation);
        assert!(!predicate(&json!(["other", "User", "findMany", null, {}])));
        assert!(!predicate(&json!("User")));
    }

    #[test]
    fn direct_and_reachable_hits() {
        let g = graph();
        let mutation = MutationDescriptor::update("User", json!({}));
        let predicate = InvalidationPredicate::new(&g, &mutation);
        assert!(predicate.matches(&build_key("User", "count", None, None)));
        assert!(predicate.matches(&build_key(
            "Post",
            "findMany",
            Some(json!({"include": {"author": true}})),
            None
        )));
        assert!(!predicate.matches(&build_key("Post", "findMany", Some(json!({})), None)));
    }
}
