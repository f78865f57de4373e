//! Boundary between the engine and the host query cache.
//!
//! The engine never owns cached data. Everything it reads or writes goes
//! through a [`CacheAdapter`] supplied by the host. The host is expected to
//! apply each call atomically with respect to its own event loop, so that two
//! mutation callbacks never interleave their writes.
//!
//! [`MemoryQueryCache`] is an in-process implementation backed by moka, used
//! for tests and for hosts without a cache of their own.

mod memory;

pub use memory::{FetchTicket, MemoryQueryCache};

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::types::CacheEntry;

/// Predicate over raw cache keys, as passed to [`CacheAdapter::invalidate`].
pub type KeyPredicate<'a> = dyn Fn(&Value) -> bool + Send + Sync + 'a;

/// Host cache operations the engine relies on.
///
/// Failures are returned to the caller of the engine entry point unchanged;
/// the engine does not retry.
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    /// Snapshot of every entry currently in the cache, muninn or not.
    async fn list_entries(&self) -> Result<Vec<CacheEntry>>;

    /// Replace the data stored under `key`.
    async fn set_data(&self, key: &Value, data: Value) -> Result<()>;

    /// Make sure a fetch already running for `key` cannot overwrite the data
    /// set by [`set_data`](Self::set_data).
    async fn cancel_in_flight(&self, key: &Value) -> Result<()>;

    /// Mark every entry whose key satisfies `predicate` stale and schedule a
    /// refetch.
    async fn invalidate(&self, predicate: &KeyPredicate<'_>) -> Result<()>;
}
