//! Property-based tests for the invariants named in §8: cache byte budget,
//! admission in-flight bound, priority ordering, and cache round-trip.
//!
//! Async operations under test are driven through a `tokio::runtime::Runtime`
//! inside each property closure, since `proptest!` itself is synchronous.

use std::sync::Arc;
use std::time::Duration;

use agentmesh::admission::{AdmissionQueue, TaskSpec};
use agentmesh::cache::ContentCache;
use agentmesh::config::{CacheBudgetBytes, CoreConfig, MaxConcurrentAdmissions};
use agentmesh::domain_types::{Artifact, Priority, Provenance};
use agentmesh::observability::NoopSink;
use proptest::prelude::*;

prop_compose! {
    fn arb_payload_len()(len in 1usize..2_000) -> usize { len }
}

fn cache_with_budget(budget: usize) -> ContentCache {
    let mut config = CoreConfig::testing();
    config.cache_budget_bytes = CacheBudgetBytes::try_new(budget).unwrap();
    ContentCache::new(config, Arc::new(NoopSink))
}

proptest! {
    /// I4: after any sequence of `put` calls, `total_bytes <= budget`.
    #[test]
    fn cache_total_bytes_never_exceeds_budget(sizes in prop::collection::vec(arb_payload_len(), 1..20)) {
        let budget = 4_000usize;
        let cache = cache_with_budget(budget);
        for (i, len) in sizes.iter().enumerate() {
            let artifact = Artifact::new(vec![b'x'; *len], Provenance::StaticFallback);
            // Entries larger than the whole budget are rejected outright (no
            // partial eviction left in place), so only assert the invariant
            // when the insert could possibly have succeeded.
            let _ = cache.put(format!("k{i}"), artifact, None);
            let stats = cache.stats();
            prop_assert!(stats.total_bytes <= stats.budget);
        }
        cache.destroy();
    }

    /// Cache round-trip: a `put` immediately followed by a `get` (well within
    /// the TTL) returns an artifact with the same bytes.
    #[test]
    fn cache_round_trip_preserves_bytes(len in arb_payload_len()) {
        let cache = cache_with_budget(1_000_000);
        let payload = vec![b'a'; len];
        cache.put("k", Artifact::new(payload.clone(), Provenance::StaticFallback), None).unwrap();
        let fetched = cache.get("k").expect("just-inserted entry should hit");
        prop_assert_eq!(fetched.data().as_ref(), payload.as_slice());
        cache.destroy();
    }

    /// Priority ordering: a strictly higher-weight variant always compares
    /// greater, regardless of which two distinct variants are drawn.
    #[test]
    fn priority_ordering_is_total_and_weight_consistent(
        a in prop::sample::select(vec![Priority::Low, Priority::Medium, Priority::High, Priority::Critical]),
        b in prop::sample::select(vec![Priority::Low, Priority::Medium, Priority::High, Priority::Critical]),
    ) {
        prop_assert_eq!(a.cmp(&b), a.weight().cmp(&b.weight()));
    }
}

/// I3: in-flight admission tasks never exceed the configured maximum,
/// checked by polling `status()` while a batch of slow tasks drains.
#[test]
fn admission_in_flight_never_exceeds_configured_max() {
    proptest!(ProptestConfig::with_cases(8), |(max_concurrent in 1usize..4, task_count in 1usize..8)| {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mut config = CoreConfig::testing();
            config.max_concurrent_admissions = MaxConcurrentAdmissions::try_new(max_concurrent).unwrap();
            let queue: AdmissionQueue<u32> = AdmissionQueue::new(config, Arc::new(NoopSink));

            let mut handles = Vec::new();
            for i in 0..task_count {
                handles.push(queue.enqueue(TaskSpec::new(move || async move {
                    tokio::time::sleep(Duration::from_millis(15)).await;
                    Ok::<u32, agentmesh::Error>(i as u32)
                }).with_estimated_duration(Duration::from_millis(15))));
            }

            // Poll status while tasks are draining and assert the bound holds
            // at every observation instant.
            for _ in 0..20 {
                prop_assert!(queue.status().in_flight <= max_concurrent);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            for handle in handles {
                let _ = handle.await;
            }
            Ok(())
        })?;
    });
}
