// src/pool/least_requests.rs
use super::backend::BackendSnapshot;
use super::scheduler::Scheduler;

/// Picks the backend with the smallest `total_requests` on every call. Ties
/// break by url. Stateless between calls.
pub struct LeastRequestsScheduler;

impl LeastRequestsScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for LeastRequestsScheduler {
    fn configure(&mut self, _healthy: &[BackendSnapshot]) {}

    fn next(&mut self, live: &[BackendSnapshot]) -> Option<String> {
        live.iter()
            .min_by(|a, b| {
                a.total_requests
                    .cmp(&b.total_requests)
                    .then_with(|| a.url.cmp(&b.url))
            })
            .map(|b| b.url.clone())
    }

    fn name(&self) -> &'static str {
        "least_requests"
    }
}
