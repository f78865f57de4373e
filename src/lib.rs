//! Muninn - Schema-aware cache consistency for client-side query caches
//!
//! Client query caches hold results keyed by `(model, operation, args)`.
//! When a mutation runs, muninn works out which of those results may now be
//! stale, using the schema's relation graph to catch queries that embed rows
//! of the mutated model through `include` / `select`. It can also patch
//! cached results optimistically while the mutation is still in flight.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use muninn::adapter::MemoryQueryCache;
//! use muninn::{CacheSync, MutationDescriptor, Schema};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let schema = Arc::new(Schema::load("schema.json")?);
//!     let sync = CacheSync::new(schema, MemoryQueryCache::default())?;
//!
//!     let args = json!({"include": {"author": true}});
//!     let key = sync.query_key("Post", "findMany", Some(args), None)?;
//!     sync.adapter().insert(&key, json!([])).await;
//!
//!     let mutation = MutationDescriptor::update(
//!         "User",
//!         json!({"where": {"id": "u1"}, "data": {"name": "Bob"}}),
//!     );
//!     let options = sync.mutation_options().optimistic_update(true);
//!
//!     sync.on_mutation_begin(&mutation, &options).await?;
//!     // ... run the mutation ...
//!     sync.on_mutation_success(&mutation, &options).await?;
//!     sync.on_mutation_settled(&mutation, &options).await?;
//!
//!     assert!(sync.adapter().is_stale(&key).await);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod invalidation;
pub mod key;
pub mod optimistic;
pub mod schema;
pub mod telemetry;
pub mod types;

// Re-export main types at crate root
pub use adapter::{CacheAdapter, MemoryQueryCache};
pub use config::{EngineConfig, MemoryCacheConfig};
pub use engine::{CacheSync, CacheSyncBuilder};
pub use error::{MuninnError, Result};
pub use graph::RelationGraph;
pub use invalidation::{InvalidationPredicate, make_invalidation_predicate};
pub use key::{CacheKey, KeyFlags, QUERY_KEY_PREFIX, build_key, is_query_key, parse_key};
pub use optimistic::{
    OptimisticContext, OptimisticDataProvider, ProviderDecision, apply_optimistic_update,
};
pub use schema::Schema;

pub use types::{
    CacheEntry, EntryAction, MutationDescriptor, MutationOptions, QueryInfo, QueryOperation,
    WriteOperation,
};
