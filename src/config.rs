//! Engine configuration.
//!
//! Configuration is plain data, usually built in code with the builder
//! methods and optionally loaded from a TOML file:
//!
//! ```toml
//! [mutations]
//! invalidate_queries = true
//! optimistic_update = false
//! cancel_in_flight = true
//!
//! [queries]
//! optimistic_update = true
//!
//! [memory_cache]
//! max_entries = 10000
//! ttl_secs = 300
//! ```
//!
//! Every key is optional; missing keys take the defaults shown above
//! (`ttl_secs` defaults to no expiry).

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::key::KeyFlags;
use crate::{MuninnError, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub mutations: MutationDefaults,
    #[serde(default)]
    pub queries: QueryDefaults,
    #[serde(default)]
    pub memory_cache: MemoryCacheConfig,
}

/// Defaults for mutations issued without explicit options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MutationDefaults {
    /// Invalidate affected queries on success (default: true).
    #[serde(default = "default_true")]
    pub invalidate_queries: bool,
    /// Patch cached queries when a mutation begins (default: false).
    #[serde(default)]
    pub optimistic_update: bool,
    /// Cancel in-flight fetches of patched queries (default: true).
    #[serde(default = "default_true")]
    pub cancel_in_flight: bool,
}

impl Default for MutationDefaults {
    fn default() -> Self {
        Self {
            invalidate_queries: true,
            optimistic_update: false,
            cancel_in_flight: true,
        }
    }
}

/// Defaults for keys of newly created queries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueryDefaults {
    /// Whether new queries accept optimistic updates (default: true).
    #[serde(default = "default_true")]
    pub optimistic_update: bool,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            optimistic_update: true,
        }
    }
}

/// Sizing of [`MemoryQueryCache`](crate::adapter::MemoryQueryCache).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemoryCacheConfig {
    /// Maximum number of cached queries (default: 10,000).
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    /// Time-to-live in seconds; `None` keeps entries until evicted.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: None,
        }
    }
}

impl MemoryCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = Some(ttl.as_secs());
        self
    }

    /// Configured TTL, capped at [`MAX_TTL_SECS`].
    pub fn ttl_duration(&self) -> Option<Duration> {
        self.ttl_secs
            .map(|secs| Duration::from_secs(secs.min(MAX_TTL_SECS)))
    }

    fn validate(&self) -> Result<()> {
        match self.ttl_secs {
            Some(secs) if secs > MAX_TTL_SECS => Err(MuninnError::Config(format!(
                "memory_cache.ttl_secs = {secs} exceeds the maximum of {MAX_TTL_SECS}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Longest TTL the memory cache accepts (1000 years).
pub const MAX_TTL_SECS: u64 = 1000 * 365 * 24 * 60 * 60;

fn default_true() -> bool {
    true
}

fn default_max_entries() -> u64 {
    10_000
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            MuninnError::Config(format!("failed to read config file {path:?}: {e}"))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            MuninnError::Config(format!("failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the memory cache cannot honour.
    pub fn validate(&self) -> Result<()> {
        self.memory_cache.validate()
    }

    pub fn invalidate_queries(mut self, enabled: bool) -> Self {
        self.mutations.invalidate_queries = enabled;
        self
    }

    pub fn optimistic_mutations(mut self, enabled: bool) -> Self {
        self.mutations.optimistic_update = enabled;
        self
    }

    pub fn cancel_in_flight(mut self, enabled: bool) -> Self {
        self.mutations.cancel_in_flight = enabled;
        self
    }

    pub fn optimistic_queries(mut self, enabled: bool) -> Self {
        self.queries.optimistic_update = enabled;
        self
    }

    pub fn memory_cache(mut self, config: MemoryCacheConfig) -> Self {
        self.memory_cache = config;
        self
    }
}

impl KeyFlags {
    /// Flags for a new query under `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::default().optimistic_update(config.queries.optimistic_update)
    }
}
