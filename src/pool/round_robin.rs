// src/pool/round_robin.rs
use super::backend::BackendSnapshot;
use super::scheduler::Scheduler;

/// Cycles over the configured list in configuration order. Deterministic
/// and stateless w.r.t. backend fields — only the cursor moves.
pub struct RoundRobinScheduler {
    backends: Vec<String>,
    cursor: usize,
}

impl RoundRobinScheduler {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            cursor: 0,
        }
    }
}

impl Scheduler for RoundRobinScheduler {
    fn configure(&mut self, healthy: &[BackendSnapshot]) {
        self.backends = healthy.iter().map(|b| b.url.clone()).collect();
        self.cursor = 0;
    }

    fn next(&mut self, _live: &[BackendSnapshot]) -> Option<String> {
        if self.backends.is_empty() {
            return None;
        }
        let url = self.backends[self.cursor % self.backends.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        Some(url)
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(url: &str) -> BackendSnapshot {
        BackendSnapshot {
            url: url.to_string(),
            weight: 1,
            active_connections: 0,
            total_requests: 0,
            healthy: true,
        }
    }

    #[test]
    fn cycles_in_configuration_order() {
        let mut s = RoundRobinScheduler::new();
        s.configure(&[snap("b1"), snap("b2"), snap("b3")]);
        let picks: Vec<_> = (0..7).map(|_| s.next(&[]).unwrap()).collect();
        assert_eq!(
            picks,
            vec!["b1", "b2", "b3", "b1", "b2", "b3", "b1"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn empty_configuration_yields_none() {
        let mut s = RoundRobinScheduler::new();
        s.configure(&[]);
        assert_eq!(s.next(&[]), None);
    }

    #[test]
    fn any_window_of_k_contains_each_backend_once() {
        let mut s = RoundRobinScheduler::new();
        let snaps: Vec<_> = (0..5).map(|i| snap(&format!("b{i}"))).collect();
        s.configure(&snaps);
        let picks: Vec<_> = (0..25).map(|_| s.next(&[]).unwrap()).collect();
        for window in picks.windows(5) {
            let mut sorted = window.to_vec();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), 5);
        }
    }
}
