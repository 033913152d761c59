// tests/scheduler_invariants.rs
//
// Property tests for the round-robin family, across varying backend counts
// and weights, run through the public `BackendPool` surface rather than the
// individual scheduler structs.

use layer7_lb::metrics::MetricsRegistry;
use layer7_lb::pool::BackendPool;
use proptest::prelude::*;
use std::sync::Arc;

fn pool() -> BackendPool {
    BackendPool::new(Arc::new(MetricsRegistry::new()), 5.0)
}

proptest! {
    #[test]
    fn round_robin_any_window_of_n_contains_each_backend_once(n in 2usize..8) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let pool = pool();
            for i in 0..n {
                pool.add(format!("b{i}"), 1).await;
            }

            let mut picks = Vec::new();
            for _ in 0..(n * 4) {
                let b = pool.select_backend().await.unwrap();
                picks.push(b.url.clone());
                pool.release(&b).await;
            }

            for window in picks.windows(n) {
                let mut sorted = window.to_vec();
                sorted.sort();
                sorted.dedup();
                assert_eq!(sorted.len(), n);
            }
        });
    }

    #[test]
    fn weighted_round_robin_one_period_matches_weights(weights in prop::collection::vec(1u32..5, 2..6)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let pool = pool();
            pool.set_scheduler("weighted").await.unwrap();
            for (i, w) in weights.iter().enumerate() {
                pool.add(format!("b{i}"), *w).await;
            }

            let period: u32 = weights.iter().sum();
            let mut counts = vec![0u32; weights.len()];
            for _ in 0..period {
                let b = pool.select_backend().await.unwrap();
                let idx: usize = b.url.trim_start_matches('b').parse().unwrap();
                counts[idx] += 1;
                pool.release(&b).await;
            }

            assert_eq!(counts, weights);
        });
    }
}
