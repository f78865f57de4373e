//! Tests for metrics emitted by invalidation passes and the optimistic
//! applier.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::sync::Arc;

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use muninn::{
    CacheEntry, CacheSync, MemoryQueryCache, MutationDescriptor, MutationOptions, RelationGraph,
    Schema, apply_optimistic_update, build_key, make_invalidation_predicate, telemetry,
};
use serde_json::json;

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

fn graph() -> RelationGraph {
    let schema = Schema::from_value(json!({
        "models": {
            "User": { "fields": { "id": { "type": "String", "id": true } } },
            "Post": { "fields": {
                "id": { "type": "String", "id": true },
                "author": { "type": "User" }
            } }
        }
    }))
    .unwrap();
    RelationGraph::new(Arc::new(schema))
}

/// Sum all counter values matching a given metric name and, optionally, one
/// label value.
fn counter_total(snapshot: &SnapshotVec, name: &str, label: Option<(&str, &str)>) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .filter(|(key, _, _, _)| {
            label.is_none_or(|(k, v)| key.key().labels().any(|l| l.key() == k && l.value() == v))
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn invalidation_hits_are_counted_once_per_entry() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let invalidated = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let schema = Arc::new(graph().schema().clone());
                let sync = CacheSync::new(schema, MemoryQueryCache::default()).unwrap();
                let with_author = json!({"include": {"author": true}});
                for key in [
                    build_key("User", "findMany", None, None),
                    build_key("Post", "findMany", Some(with_author), None),
                    build_key("Post", "findMany", None, None),
                ] {
                    sync.adapter().insert(&key, json!([])).await;
                }

                let mutation =
                    MutationDescriptor::update("User", json!({"where": {"id": "u"}, "data": {}}));
                sync.on_mutation_success(&mutation, &MutationOptions::default())
                    .await
                    .unwrap()
            })
        })
    });
    assert_eq!(invalidated, 2);

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::INVALIDATIONS_TOTAL, None), 2);
    assert_eq!(
        counter_total(&snapshot, telemetry::INVALIDATIONS_TOTAL, Some(("model", "Post"))),
        1
    );
    assert_eq!(
        counter_total(&snapshot, telemetry::INVALIDATIONS_TOTAL, Some(("operation", "update"))),
        2
    );
}

#[test]
fn evaluating_the_predicate_records_nothing() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let graph = graph();
        let mutation =
            MutationDescriptor::update("User", json!({"where": {"id": "u"}, "data": {}}));
        let predicate = make_invalidation_predicate(&graph, &mutation);
        let key = build_key("User", "findMany", None, None);
        assert!(predicate(&key));
        assert!(predicate(&key));
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::INVALIDATIONS_TOTAL, None), 0);
}

/// Runs async code within a local recorder scope on the multi-thread runtime.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn optimistic_outcomes_are_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let graph = graph();
                let mutation = MutationDescriptor::create("User", json!({"data": {"id": "u1"}}));
                let entries = [
                    CacheEntry::new(build_key("User", "findMany", None, None), Some(json!([]))),
                    CacheEntry::new(build_key("User", "count", None, None), Some(json!(1)))
                        .with_error(json!("offline")),
                    CacheEntry::new(build_key("User", "groupBy", None, None), Some(json!([]))),
                ];
                apply_optimistic_update(&graph, &mutation, &entries, None).await
            })
        })
    });
    assert!(result.is_ok());

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_total(&snapshot, telemetry::OPTIMISTIC_UPDATES_TOTAL, Some(("source", "default"))),
        1
    );
    assert_eq!(
        counter_total(&snapshot, telemetry::OPTIMISTIC_SKIPS_TOTAL, Some(("reason", "error"))),
        1
    );
    assert_eq!(
        counter_total(
            &snapshot,
            telemetry::OPTIMISTIC_SKIPS_TOTAL,
            Some(("reason", "not_applicable"))
        ),
        1
    );
}
