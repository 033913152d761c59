// src/pool/weighted_least_connections.rs
use super::backend::BackendSnapshot;
use super::scheduler::Scheduler;

/// Picks the backend minimizing `active_connections / weight` (real
/// division) on every call; `weight == 0` backends are excluded. Ties break
/// by url. Stateless between calls, same as `LeastConnectionsScheduler`.
pub struct WeightedLeastConnectionsScheduler;

impl WeightedLeastConnectionsScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for WeightedLeastConnectionsScheduler {
    fn configure(&mut self, _healthy: &[BackendSnapshot]) {}

    fn next(&mut self, live: &[BackendSnapshot]) -> Option<String> {
        live.iter()
            .filter(|b| b.weight > 0)
            .min_by(|a, b| {
                let ratio_a = a.active_connections as f64 / a.weight as f64;
                let ratio_b = b.active_connections as f64 / b.weight as f64;
                ratio_a
                    .partial_cmp(&ratio_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.url.cmp(&b.url))
            })
            .map(|b| b.url.clone())
    }

    fn name(&self) -> &'static str {
        "weighted_least_conn"
    }
}
