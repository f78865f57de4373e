//! Mutation lifecycle hooks over a host cache.
//!
//! [`CacheSync`] ties the pieces together for one schema and one
//! [`CacheAdapter`]:
//!
//! - [`on_mutation_begin`](CacheSync::on_mutation_begin) patches cached
//!   queries optimistically and cancels their in-flight fetches.
//! - [`on_mutation_success`](CacheSync::on_mutation_success) invalidates
//!   every query the mutation may have made stale.
//! - [`on_mutation_settled`](CacheSync::on_mutation_settled) re-runs that
//!   invalidation after an optimistic mutation, success or failure, which is
//!   how provisional data gets replaced by server state.
//!
//! Hooks for one mutation must be delivered in lifecycle order; hooks of
//! different mutations are applied in the order they are delivered.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::adapter::CacheAdapter;
use crate::config::EngineConfig;
use crate::graph::RelationGraph;
use crate::invalidation::InvalidationPredicate;
use crate::key::{CacheKey, KeyFlags, parse_key};
use crate::optimistic::apply_optimistic_update;
use crate::schema::Schema;
use crate::telemetry;
use crate::types::{EntryAction, MutationDescriptor, MutationOptions, QueryInfo, QueryOperation};
use crate::{MuninnError, Result};

/// Cache consistency engine bound to one schema and one host cache.
pub struct CacheSync<A: CacheAdapter> {
    graph: RelationGraph,
    adapter: A,
    config: EngineConfig,
}

impl<A: CacheAdapter> CacheSync<A> {
    /// Engine with the default configuration. Fails if the schema is invalid.
    pub fn new(schema: Arc<Schema>, adapter: A) -> Result<Self> {
        Self::builder(adapter).schema(schema).build()
    }

    pub fn builder(adapter: A) -> CacheSyncBuilder<A> {
        CacheSyncBuilder::new(adapter)
    }

    pub fn schema(&self) -> &Schema {
        self.graph.schema()
    }

    pub fn graph(&self) -> &RelationGraph {
        &self.graph
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Mutation options seeded from the `[mutations]` config section.
    pub fn mutation_options(&self) -> MutationOptions {
        MutationOptions::from_config(&self.config)
    }

    /// Build the cache key for a query on `model`.
    ///
    /// The model name is matched case-insensitively against the schema and
    /// stored in its declared spelling. `flags` defaults to the `[queries]`
    /// config section.
    pub fn query_key(
        &self,
        model: &str,
        operation: impl Into<QueryOperation>,
        args: Option<Value>,
        flags: Option<KeyFlags>,
    ) -> Result<Value> {
        let model = &self.schema().resolve_model(model)?.name;
        let flags = flags.unwrap_or_else(|| KeyFlags::from_config(&self.config));
        Ok(CacheKey::new(model.as_str(), operation, args)
            .with_flags(flags)
            .to_value())
    }

    /// Invalidation predicate for `mutation`, for hosts driving eviction
    /// themselves.
    pub fn invalidation_predicate(
        &self,
        mutation: &MutationDescriptor,
    ) -> Result<InvalidationPredicate<'_>> {
        let mutation = self.normalize(mutation)?;
        Ok(InvalidationPredicate::new(&self.graph, &mutation))
    }

    /// Every recognised query entry in the host cache.
    pub async fn queries(&self) -> Result<Vec<QueryInfo>> {
        let entries = self.adapter.list_entries().await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let key = parse_key(&entry.key)?;
                Some(QueryInfo {
                    key: entry.key,
                    model: key.model,
                    operation: key.operation,
                    args: key.args,
                    flags: key.flags,
                    data: entry.data,
                })
            })
            .collect())
    }

    /// Apply optimistic updates for a mutation that is about to run.
    ///
    /// Does nothing unless `options.optimistic_update` is set. Returns the
    /// number of entries overwritten. Provider and adapter errors are returned
    /// as-is; entries patched before the failure stay patched.
    #[instrument(
        skip(self, mutation, options),
        fields(model = %mutation.model, operation = %mutation.operation)
    )]
    pub async fn on_mutation_begin(
        &self,
        mutation: &MutationDescriptor,
        options: &MutationOptions,
    ) -> Result<usize> {
        if !options.optimistic_update {
            return Ok(0);
        }
        let mutation = self.normalize(mutation)?;

        let entries = self.adapter.list_entries().await?;
        let decisions = apply_optimistic_update(
            &self.graph,
            &mutation,
            &entries,
            options.provider.as_deref(),
        )
        .await?;

        let mut patched = 0;
        for (key, action) in decisions {
            let EntryAction::Overwrite(data) = action else {
                continue;
            };
            self.adapter.set_data(&key, data).await?;
            if options.cancel_in_flight {
                self.adapter.cancel_in_flight(&key).await?;
            }
            patched += 1;
        }

        info!(entries = entries.len(), patched, "optimistic update applied");
        Ok(patched)
    }

    /// Invalidate queries affected by a successful mutation.
    ///
    /// Returns the number of entries invalidated.
    #[instrument(
        skip(self, mutation, options),
        fields(model = %mutation.model, operation = %mutation.operation)
    )]
    pub async fn on_mutation_success(
        &self,
        mutation: &MutationDescriptor,
        options: &MutationOptions,
    ) -> Result<usize> {
        if !options.invalidate_queries {
            return Ok(0);
        }
        self.invalidate(mutation).await
    }

    /// Reconcile after an optimistic mutation settled, whatever its outcome.
    ///
    /// Only acts when both `invalidate_queries` and `optimistic_update` are
    /// set; otherwise [`on_mutation_success`](Self::on_mutation_success)
    /// covers invalidation.
    #[instrument(
        skip(self, mutation, options),
        fields(model = %mutation.model, operation = %mutation.operation)
    )]
    pub async fn on_mutation_settled(
        &self,
        mutation: &MutationDescriptor,
        options: &MutationOptions,
    ) -> Result<usize> {
        if !(options.invalidate_queries && options.optimistic_update) {
            return Ok(0);
        }
        self.invalidate(mutation).await
    }

    async fn invalidate(&self, mutation: &MutationDescriptor) -> Result<usize> {
        let mutation = self.normalize(mutation)?;
        let predicate = InvalidationPredicate::new(&self.graph, &mutation);
        // canonical key -> parsed key; an adapter may evaluate a key more than once
        let hits: Mutex<BTreeMap<String, CacheKey>> = Mutex::new(BTreeMap::new());

        self.adapter
            .invalidate(&|key: &Value| {
                let hit = predicate.matches(key);
                if hit && let Some(parsed) = parse_key(key) {
                    hits
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(CacheKey::canonical(key), parsed);
                }
                hit
            })
            .await?;

        let hits = hits.into_inner().unwrap_or_else(PoisonError::into_inner);
        for key in hits.values() {
            debug!(model = %key.model, query = %key.operation, "query invalidated");
            metrics::counter!(telemetry::INVALIDATIONS_TOTAL,
                "model" => key.model.clone(),
                "operation" => mutation.operation.as_str(),
            )
            .increment(1);
        }
        info!(
            mutated = ?predicate.mutated_models(),
            invalidated = hits.len(),
            "queries invalidated"
        );
        Ok(hits.len())
    }

    // Mutations may name the model in any case; the graph only knows the
    // declared spelling.
    fn normalize<'m>(
        &self,
        mutation: &'m MutationDescriptor,
    ) -> Result<Cow<'m, MutationDescriptor>> {
        if self.graph.contains_model(&mutation.model) {
            return Ok(Cow::Borrowed(mutation));
        }
        let model = &self.schema().resolve_model(&mutation.model)?.name;
        let mut resolved = mutation.clone();
        resolved.model = model.clone();
        Ok(Cow::Owned(resolved))
    }
}

/// Builder for [`CacheSync`].
pub struct CacheSyncBuilder<A: CacheAdapter> {
    adapter: A,
    schema: Option<Arc<Schema>>,
    config: EngineConfig,
}

impl<A: CacheAdapter> CacheSyncBuilder<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            schema: None,
            config: EngineConfig::default(),
        }
    }

    pub fn schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<CacheSync<A>> {
        let schema = self
            .schema
            .ok_or_else(|| MuninnError::Config("no schema configured".to_string()))?;
        let graph = RelationGraph::new(schema);
        graph.schema().validate()?;
        Ok(CacheSync {
            graph,
            adapter: self.adapter,
            config: self.config,
        })
    }
}
