//! Mutation descriptors and per-call options.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::WriteOperation;
use crate::config::EngineConfig;
use crate::optimistic::OptimisticDataProvider;

/// A single mutation invocation: which model, which write, which arguments.
///
/// Constructed once per mutation by the caller and consumed synchronously by
/// the invalidation analyzer and the optimistic applier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationDescriptor {
    pub model: String,
    pub operation: WriteOperation,
    #[serde(default)]
    pub args: Value,
}

impl MutationDescriptor {
    pub fn new(model: impl Into<String>, operation: WriteOperation, args: Value) -> Self {
        Self {
            model: model.into(),
            operation,
            args,
        }
    }

    pub fn create(model: impl Into<String>, args: Value) -> Self {
        Self::new(model, WriteOperation::Create, args)
    }

    pub fn update(model: impl Into<String>, args: Value) -> Self {
        Self::new(model, WriteOperation::Update, args)
    }

    pub fn delete(model: impl Into<String>, args: Value) -> Self {
        Self::new(model, WriteOperation::Delete, args)
    }
}

impl fmt::Display for MutationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.model, self.operation)
    }
}

/// Per-mutation switches.
///
/// ```rust
/// # use muninn::MutationOptions;
/// let options = MutationOptions::new().optimistic_update(true);
/// assert!(options.invalidate_queries);
/// ```
#[derive(Clone)]
pub struct MutationOptions {
    /// Invalidate queries potentially affected by the mutation. Default: true.
    pub invalidate_queries: bool,
    /// Optimistically patch cached queries when the mutation begins. Default: false.
    pub optimistic_update: bool,
    /// Cancel in-flight fetches of patched queries. Default: true.
    pub cancel_in_flight: bool,
    /// Computes optimistic data per cache entry ahead of the built-in transform.
    pub provider: Option<Arc<dyn OptimisticDataProvider>>,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            invalidate_queries: true,
            optimistic_update: false,
            cancel_in_flight: true,
            provider: None,
        }
    }
}

impl MutationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults taken from the `[mutations]` section of an engine config.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            invalidate_queries: config.mutations.invalidate_queries,
            optimistic_update: config.mutations.optimistic_update,
            cancel_in_flight: config.mutations.cancel_in_flight,
            provider: None,
        }
    }

    pub fn invalidate_queries(mut self, enabled: bool) -> Self {
        self.invalidate_queries = enabled;
        self
    }

    pub fn optimistic_update(mut self, enabled: bool) -> Self {
        self.optimistic_update = enabled;
        self
    }

    pub fn cancel_in_flight(mut self, enabled: bool) -> Self {
        self.cancel_in_flight = enabled;
        self
    }

    pub fn provider(mut self, provider: impl OptimisticDataProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }
}

impl fmt::Debug for MutationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationOptions")
            .field("invalidate_queries", &self.invalidate_queries)
            .field("optimistic_update", &self.optimistic_update)
            .field("cancel_in_flight", &self.cancel_in_flight)
            .field("provider", &self.provider.is_some())
            .finish()
    }
}
