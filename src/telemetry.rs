//! Telemetry metric name constants.
//!
//! Centralised metric names for muninn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `model`: schema model of the cached query (e.g. "User")
//! - `operation`: mutation operation that caused the event (e.g. "update")
//! - `source`: who computed optimistic data: "default" or "provider"
//! - `reason`: why an entry was skipped

/// Total cache entries invalidated after a mutation.
///
/// Labels: `model` (query model), `operation` (mutation operation).
pub const INVALIDATIONS_TOTAL: &str = "muninn_invalidations_total";

/// Total cache entries overwritten with optimistic data.
///
/// Labels: `model` (query model), `source` ("default" | "provider").
pub const OPTIMISTIC_UPDATES_TOTAL: &str = "muninn_optimistic_updates_total";

/// Total cache entries skipped by the optimistic applier.
///
/// Labels: `reason` ("error" | "opt_out" | "provider" | "not_applicable").
pub const OPTIMISTIC_SKIPS_TOTAL: &str = "muninn_optimistic_skips_total";
