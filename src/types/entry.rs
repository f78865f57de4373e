//! Cache entry snapshots exchanged with the host cache.

use serde_json::Value;

use crate::key::KeyFlags;
use crate::types::QueryOperation;

/// One entry of the host cache, as seen by the engine.
///
/// The key is the raw key the host stores, which may belong to an unrelated
/// library sharing the same cache. `data: None` means "not loaded yet",
/// whereas `Some(Value::Null)` is a loaded `null` result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: Value,
    pub data: Option<Value>,
    pub error: Option<Value>,
}

impl CacheEntry {
    pub fn new(key: Value, data: Option<Value>) -> Self {
        Self {
            key,
            data,
            error: None,
        }
    }

    pub fn with_error(mut self, error: Value) -> Self {
        self.error = Some(error);
        self
    }
}

/// What the optimistic applier wants done with one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryAction {
    /// Keep the entry's data as it is.
    Leave,
    /// Replace the entry's data.
    Overwrite(Value),
}

impl EntryAction {
    pub fn is_overwrite(&self) -> bool {
        matches!(self, Self::Overwrite(_))
    }
}

/// A recognised query entry with its key decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryInfo {
    pub key: Value,
    pub model: String,
    pub operation: QueryOperation,
    pub args: Option<Value>,
    pub flags: KeyFlags,
    pub data: Option<Value>,
}

impl QueryInfo {
    /// Whether the query opted in to optimistic updates.
    pub fn optimistic_update(&self) -> bool {
        self.flags.optimistic_update
    }
}
