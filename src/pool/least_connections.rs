// src/pool/least_connections.rs
use super::backend::BackendSnapshot;
use super::scheduler::Scheduler;

/// Picks the backend with the smallest `active_connections` on every call,
/// recomputed from the live snapshot handed in by the pool. Ties break by
/// url. No state survives between calls — `configure` is a no-op.
pub struct LeastConnectionsScheduler;

impl LeastConnectionsScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for LeastConnectionsScheduler {
    fn configure(&mut self, _healthy: &[BackendSnapshot]) {}

    fn next(&mut self, live: &[BackendSnapshot]) -> Option<String> {
        live.iter()
            .min_by(|a, b| {
                a.active_connections
                    .cmp(&b.active_connections)
                    .then_with(|| a.url.cmp(&b.url))
            })
            .map(|b| b.url.clone())
    }

    fn name(&self) -> &'static str {
        "least_conn"
    }
}
