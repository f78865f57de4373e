//! Optimistic mutation applier.
//!
//! Given a mutation that has not completed yet, compute for every cached
//! query entry whether its data should be patched to reflect the mutation's
//! expected effect. Each entry is decided independently:
//!
//! 1. Entries that are not muninn keys, carry an error, or opted out of
//!    optimistic updates are left alone.
//! 2. A caller-supplied [`OptimisticDataProvider`] may decide first: skip the
//!    entry, supply its data verbatim, or defer to the built-in transform.
//! 3. The built-in transform replays the mutation's write events against the
//!    cached result (see [`transform`]).
//!
//! Patched entries are provisional. Nothing here rolls them back: the
//! settlement-time invalidation pass refetches the real server state.

mod filter;
mod row;
mod transform;

pub use filter::{FilterMatch, evaluate as evaluate_filter};
pub use row::{OPTIMISTIC_MARKER, is_provisional};
pub use transform::{QueryShape, transform};

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::Result;
use crate::graph::{RelationGraph, WriteEvent, visit_writes};
use crate::key::{CacheKey, parse_key};
use crate::telemetry;
use crate::types::{CacheEntry, EntryAction, MutationDescriptor, QueryOperation, WriteOperation};

/// Everything a provider gets to see about one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticContext {
    pub query_model: String,
    pub query_operation: QueryOperation,
    pub query_args: Option<Value>,
    /// Cached data; `None` when the query has not loaded yet.
    pub current_data: Option<Value>,
    pub mutation_model: String,
    pub mutation_operation: WriteOperation,
    pub mutation_args: Value,
}

/// A provider's verdict for one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderDecision {
    /// Leave the entry untouched.
    Skip,
    /// Overwrite the entry with exactly this data.
    Update(Value),
    /// Fall through to the built-in transform.
    ProceedDefault,
}

/// Caller-supplied business logic for optimistic data.
///
/// Errors are returned to the mutation caller unchanged; the applier never
/// swallows them. Plain closures taking `&OptimisticContext` implement this
/// trait.
#[async_trait]
pub trait OptimisticDataProvider: Send + Sync {
    async fn provide(&self, ctx: &OptimisticContext) -> Result<ProviderDecision>;
}

#[async_trait]
impl<F> OptimisticDataProvider for F
where
    F: Fn(&OptimisticContext) -> Result<ProviderDecision> + Send + Sync,
{
    async fn provide(&self, ctx: &OptimisticContext) -> Result<ProviderDecision> {
        self(ctx)
    }
}

/// Decide, for every entry of `entries`, whether to overwrite its data.
///
/// Returns one `(key, action)` pair per entry, in input order. Fails only when
/// the provider does.
pub async fn apply_optimistic_update(
    graph: &RelationGraph,
    mutation: &MutationDescriptor,
    entries: &[CacheEntry],
    provider: Option<&dyn OptimisticDataProvider>,
) -> Result<Vec<(Value, EntryAction)>> {
    let plan = MutationPlan::new(graph, mutation);
    let mut decisions = Vec::with_capacity(entries.len());

    for entry in entries {
        let action = decide(&plan, entry, provider).await?;
        decisions.push((entry.key.clone(), action));
    }
    Ok(decisions)
}

/// Run only the built-in transform for one decoded key.
///
/// Returns `None` when the query is unrelated to the mutation or the transform
/// has nothing to say about it.
pub fn transform_entry(
    graph: &RelationGraph,
    key: &CacheKey,
    data: &Value,
    mutation: &MutationDescriptor,
) -> Option<Value> {
    MutationPlan::new(graph, mutation).apply_default(key, data)
}

// Write events and affected models, computed once per mutation.
struct MutationPlan<'a> {
    graph: &'a RelationGraph,
    mutation: &'a MutationDescriptor,
    events: Vec<WriteEvent>,
    affected: BTreeSet<String>,
}

impl<'a> MutationPlan<'a> {
    fn new(graph: &'a RelationGraph, mutation: &'a MutationDescriptor) -> Self {
        Self {
            graph,
            mutation,
            events: visit_writes(graph, mutation),
            affected: graph.models_affected_by_write(mutation),
        }
    }

    fn touches(&self, key: &CacheKey) -> bool {
        self.affected.contains(&key.model)
            || self
                .graph
                .models_reachable_from(&key.model, key.args.as_ref())
                .iter()
                .any(|m| self.affected.contains(m))
    }

    fn apply_default(&self, key: &CacheKey, data: &Value) -> Option<Value> {
        if !self.touches(key) {
            return None;
        }
        transform(self.graph, key, data, &self.events)
    }
}

async fn decide(
    plan: &MutationPlan<'_>,
    entry: &CacheEntry,
    provider: Option<&dyn OptimisticDataProvider>,
) -> Result<EntryAction> {
    let Some(key) = parse_key(&entry.key) else {
        return Ok(EntryAction::Leave);
    };
    if entry.error.is_some() {
        return Ok(skip(&key, "error"));
    }
    if !key.flags.optimistic_update {
        return Ok(skip(&key, "opt_out"));
    }

    if let Some(provider) = provider {
        let ctx = OptimisticContext {
            query_model: key.model.clone(),
            query_operation: key.operation.clone(),
            query_args: key.args.clone(),
            current_data: entry.data.clone(),
            mutation_model: plan.mutation.model.clone(),
            mutation_operation: plan.mutation.operation,
            mutation_args: plan.mutation.args.clone(),
        };
        match provider.provide(&ctx).await? {
            ProviderDecision::Skip => return Ok(skip(&key, "provider")),
            ProviderDecision::Update(data) => return Ok(overwrite(&key, data, "provider")),
            ProviderDecision::ProceedDefault => {}
        }
    }

    let patched = entry
        .data
        .as_ref()
        .and_then(|data| plan.apply_default(&key, data));
    Ok(match patched {
        Some(data) => overwrite(&key, data, "default"),
        None => skip(&key, "not_applicable"),
    })
}

fn skip(key: &CacheKey, reason: &'static str) -> EntryAction {
    debug!(model = %key.model, operation = %key.operation, reason, "optimistic update skipped");
    metrics::counter!(telemetry::OPTIMISTIC_SKIPS_TOTAL, "reason" => reason).increment(1);
    EntryAction::Leave
}

fn overwrite(key: &CacheKey, data: Value, source: &'static str) -> EntryAction {
    debug!(model = %key.model, operation = %key.operation, source, "optimistic update applied");
    metrics::counter!(telemetry::OPTIMISTIC_UPDATES_TOTAL,
        "model" => key.model.clone(),
        "source" => source,
    )
    .increment(1);
    EntryAction::Overwrite(data)
}
