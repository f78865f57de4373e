//! Relation graph derived from a [`Schema`].
//!
//! The graph is an explicit adjacency list `model → [(field, target)]`,
//! computed once per schema. Two read operations are layered on top of it:
//!
//! - [`RelationGraph::models_reachable_from`]: models whose rows appear in a
//!   query result through `select` / `include` relation selections, or
//!   filter it through relation conditions in `where`.
//! - [`RelationGraph::models_affected_by_write`]: models a write may alter,
//!   including through nested relational writes and cascading deletes.
//!
//! Both are deliberately conservative: reporting an extra model only costs a
//! refetch, missing one leaves stale data in the cache.

mod read;
mod write;

pub use write::{WriteAction, WriteEvent, visit_writes};
pub(crate) use write::enumerate;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::schema::{ReferentialAction, Schema};

/// One relation field of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationEdge {
    /// Relation field name on the source model.
    pub field: String,
    /// Model the field points at.
    pub target: String,
    /// List relation (`posts Post[]`).
    pub to_many: bool,
    /// `(reference on target, local foreign-key field)` pairs when this side
    /// owns the foreign key.
    pub foreign_keys: Vec<(String, String)>,
}

/// Read-only relation view of a schema.
#[derive(Debug, Clone)]
pub struct RelationGraph {
    schema: Arc<Schema>,
    edges: HashMap<String, Vec<RelationEdge>>,
    // target model -> models whose foreign key to it cascades on delete
    cascades: HashMap<String, Vec<String>>,
}

impl RelationGraph {
    /// Build the graph, normalizing a copy of `schema` first if it was
    /// deserialized without [`Schema::finish`].
    pub fn new(mut schema: Arc<Schema>) -> Self {
        if !schema.is_normalized() {
            Arc::make_mut(&mut schema).normalize();
        }
        let mut edges: HashMap<String, Vec<RelationEdge>> = HashMap::new();
        let mut cascades: HashMap<String, Vec<String>> = HashMap::new();

        for (model_name, model) in &schema.models {
            let model_edges = edges.entry(model_name.clone()).or_default();
            for field in model.fields.values() {
                if !schema.is_relation(field) {
                    continue;
                }
                let foreign_keys = field
                    .relation
                    .as_ref()
                    .map(|r| {
                        r.references
                            .iter()
                            .cloned()
                            .zip(r.fields.iter().cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                model_edges.push(RelationEdge {
                    field: field.name.clone(),
                    target: field.ty.clone(),
                    to_many: field.array,
                    foreign_keys,
                });

                let cascades_on_delete = field
                    .relation
                    .as_ref()
                    .is_some_and(|r| r.on_delete == Some(ReferentialAction::Cascade));
                if cascades_on_delete {
                    let dependents = cascades.entry(field.ty.clone()).or_default();
                    if !dependents.contains(model_name) {
                        dependents.push(model_name.clone());
                    }
                }
            }
        }

        Self {
            schema,
            edges,
            cascades,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Shared handle to the underlying schema.
    pub fn schema_arc(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    pub fn contains_model(&self, model: &str) -> bool {
        self.edges.contains_key(model)
    }

    /// All relation fields of `model`. Empty for unknown models.
    pub fn relations(&self, model: &str) -> &[RelationEdge] {
        self.edges.get(model).map(Vec::as_slice).unwrap_or_default()
    }

    /// Relation field `field` of `model`, if it is one.
    pub fn relation(&self, model: &str, field: &str) -> Option<&RelationEdge> {
        self.relations(model).iter().find(|e| e.field == field)
    }

    /// Models holding a cascading foreign key to `model`.
    pub fn cascade_dependents(&self, model: &str) -> &[String] {
        self.cascades
            .get(model)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every model reachable from `model` by following relation fields,
    /// `model` included.
    pub fn schema_closure(&self, model: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![model.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for edge in self.relations(&current) {
                if !seen.contains(&edge.target) {
                    stack.push(edge.target.clone());
                }
            }
        }
        seen
    }
}
