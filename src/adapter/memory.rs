//! In-memory query cache.
//!
//! Entries are keyed by the canonical string form of their cache key, so two
//! structurally equal keys address the same entry. Each entry carries a fetch
//! generation: [`MemoryQueryCache::begin_fetch`] hands out a ticket for the
//! current generation, and [`MemoryQueryCache::complete_fetch`] only stores
//! the response if the generation has not moved since. Cancelling an
//! in-flight fetch bumps the generation.

use std::future::ready;

use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use serde_json::Value;

use super::{CacheAdapter, KeyPredicate};
use crate::Result;
use crate::config::MemoryCacheConfig;
use crate::key::CacheKey;
use crate::types::CacheEntry;

#[derive(Debug, Clone)]
struct StoredQuery {
    key: Value,
    data: Option<Value>,
    error: Option<Value>,
    stale: bool,
    generation: u64,
}

impl StoredQuery {
    fn empty(key: &Value) -> Self {
        Self {
            key: key.clone(),
            data: None,
            error: None,
            stale: false,
            generation: 0,
        }
    }
}

/// Proof that a fetch was started for a key at a given generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: String,
    generation: u64,
}

/// moka-backed [`CacheAdapter`].
///
/// ```rust
/// # use muninn::adapter::MemoryQueryCache;
/// # use muninn::config::MemoryCacheConfig;
/// let cache = MemoryQueryCache::new(&MemoryCacheConfig::new().max_entries(100));
/// ```
#[derive(Clone)]
pub struct MemoryQueryCache {
    cache: Cache<String, StoredQuery>,
}

impl Default for MemoryQueryCache {
    fn default() -> Self {
        Self::new(&MemoryCacheConfig::default())
    }
}

impl MemoryQueryCache {
    pub fn new(config: &MemoryCacheConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_entries);
        if let Some(ttl) = config.ttl_duration() {
            builder = builder.time_to_live(ttl);
        }
        Self {
            cache: builder.build(),
        }
    }

    /// Store fetched data under `key`, clearing any error and staleness.
    pub async fn insert(&self, key: &Value, data: Value) {
        self.store(key, data).await;
    }

    pub async fn get(&self, key: &Value) -> Option<Value> {
        self.cache
            .get(&CacheKey::canonical(key))
            .await
            .and_then(|q| q.data)
    }

    pub async fn entry(&self, key: &Value) -> Option<CacheEntry> {
        self.cache.get(&CacheKey::canonical(key)).await.map(|q| CacheEntry {
            key: q.key,
            data: q.data,
            error: q.error,
        })
    }

    /// Whether the entry was invalidated since it was last written.
    pub async fn is_stale(&self, key: &Value) -> bool {
        self.cache
            .get(&CacheKey::canonical(key))
            .await
            .is_some_and(|q| q.stale)
    }

    /// Record the failure of the last fetch for `key`.
    pub async fn set_error(&self, key: &Value, error: Value) {
        let owned = key.clone();
        self.cache
            .entry(CacheKey::canonical(key))
            .and_compute_with(move |current| {
                let mut query =
                    current.map_or_else(|| StoredQuery::empty(&owned), |e| e.into_value());
                query.error = Some(error);
                ready(Op::Put(query))
            })
            .await;
    }

    pub async fn remove(&self, key: &Value) {
        self.cache.invalidate(&CacheKey::canonical(key)).await;
    }

    /// Start a fetch for `key`, creating an unloaded entry if needed.
    pub async fn begin_fetch(&self, key: &Value) -> FetchTicket {
        let canonical = CacheKey::canonical(key);
        let owned = key.clone();
        let result = self
            .cache
            .entry(canonical.clone())
            .and_compute_with(move |current| {
                ready(match current {
                    Some(_) => Op::Nop,
                    None => Op::Put(StoredQuery::empty(&owned)),
                })
            })
            .await;
        let generation = match result {
            CompResult::Inserted(e) | CompResult::Unchanged(e) | CompResult::ReplacedWith(e) => {
                e.into_value().generation
            }
            _ => 0,
        };
        FetchTicket {
            key: canonical,
            generation,
        }
    }

    /// Store the response of a fetch. Returns `false` (and stores nothing)
    /// when the fetch was cancelled or the entry evicted meanwhile.
    pub async fn complete_fetch(&self, ticket: &FetchTicket, data: Value) -> bool {
        let generation = ticket.generation;
        let result = self
            .cache
            .entry(ticket.key.clone())
            .and_compute_with(move |current| {
                ready(match current.map(|e| e.into_value()) {
                    Some(mut query) if query.generation == generation => {
                        query.data = Some(data);
                        query.error = None;
                        query.stale = false;
                        Op::Put(query)
                    }
                    _ => Op::Nop,
                })
            })
            .await;
        matches!(result, CompResult::ReplacedWith(_))
    }

    /// Number of entries, pending maintenance applied first.
    pub async fn len(&self) -> usize {
        self.cache.run_pending_tasks().await;
        self.cache.iter().count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn store(&self, key: &Value, data: Value) {
        let owned = key.clone();
        self.cache
            .entry(CacheKey::canonical(key))
            .and_compute_with(move |current| {
                let mut query =
                    current.map_or_else(|| StoredQuery::empty(&owned), |e| e.into_value());
                query.data = Some(data);
                query.error = None;
                query.stale = false;
                ready(Op::Put(query))
            })
            .await;
    }
}

#[async_trait]
impl CacheAdapter for MemoryQueryCache {
    async fn list_entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries: Vec<(String, CacheEntry)> = self
            .cache
            .iter()
            .map(|(canonical, q)| {
                (
                    canonical.as_ref().clone(),
                    CacheEntry {
                        key: q.key,
                        data: q.data,
                        error: q.error,
                    },
                )
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries.into_iter().map(|(_, e)| e).collect())
    }

    async fn set_data(&self, key: &Value, data: Value) -> Result<()> {
        self.store(key, data).await;
        Ok(())
    }

    async fn cancel_in_flight(&self, key: &Value) -> Result<()> {
        self.cache
            .entry(CacheKey::canonical(key))
            .and_compute_with(|current| {
                ready(match current.map(|e| e.into_value()) {
                    Some(mut query) => {
                        query.generation += 1;
                        Op::Put(query)
                    }
                    None => Op::Nop,
                })
            })
            .await;
        Ok(())
    }

    async fn invalidate(&self, predicate: &KeyPredicate<'_>) -> Result<()> {
        let stale: Vec<String> = self
            .cache
            .iter()
            .filter(|(_, q)| predicate(&q.key))
            .map(|(canonical, _)| canonical.as_ref().clone())
            .collect();

        for canonical in stale {
            self.cache
                .entry(canonical)
                .and_compute_with(|current| {
                    ready(match current.map(|e| e.into_value()) {
                        Some(mut query) => {
                            query.stale = true;
                            Op::Put(query)
                        }
                        None => Op::Nop,
                    })
                })
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::key::build_key;

    #[tokio::test]
    async fn cancelled_fetch_cannot_overwrite() {
        let cache = MemoryQueryCache::default();
        let key = build_key("User", "findMany", None, None);

        let ticket = cache.begin_fetch(&key).await;
        cache.set_data(&key, json!(["optimistic"])).await.unwrap();
        cache.cancel_in_flight(&key).await.unwrap();

        assert!(!cache.complete_fetch(&ticket, json!(["server"])).await);
        assert_eq!(cache.get(&key).await, Some(json!(["optimistic"])));
    }

    #[tokio::test]
    async fn uncancelled_fetch_lands() {
        let cache = MemoryQueryCache::default();
        let key = build_key("User", "count", None, None);

        let ticket = cache.begin_fetch(&key).await;
        assert_eq!(cache.entry(&key).await.unwrap().data, None);
        assert!(cache.complete_fetch(&ticket, json!(3)).await);
        assert_eq!(cache.get(&key).await, Some(json!(3)));
    }

    #[tokio::test]
    async fn structurally_equal_keys_share_an_entry() {
        let cache = MemoryQueryCache::default();
        let a = build_key("User", "findMany", Some(json!({"where": {"a": 1, "b": 2}})), None);
        let b = build_key("User", "findMany", Some(json!({"where": {"b": 2, "a": 1}})), None);
        cache.insert(&a, json!([])).await;
        assert_eq!(cache.get(&b).await, Some(json!([])));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn invalidate_marks_matching_entries_stale() {
        let cache = MemoryQueryCache::default();
        let users = build_key("User", "findMany", None, None);
        let posts = build_key("Post", "findMany", None, None);
        cache.insert(&users, json!([])).await;
        cache.insert(&posts, json!([])).await;

        cache
            .invalidate(&|key: &Value| key[1] == json!("User"))
            .await
            .unwrap();
        assert!(cache.is_stale(&users).await);
        assert!(!cache.is_stale(&posts).await);

        cache.insert(&users, json!([{"id": 1}])).await;
        assert!(!cache.is_stale(&users).await);
    }

    #[tokio::test]
    async fn errors_are_listed() {
        let cache = MemoryQueryCache::default();
        let key = build_key("User", "findFirst", None, None);
        cache.set_error(&key, json!("boom")).await;
        let entries = cache.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error, Some(json!("boom")));
    }
}
