// src/pool/backend.rs
use serde::Serialize;

/// One upstream registered in the pool.
///
/// Deliberately plain fields instead of atomics or per-field locks: every
/// mutation happens while the caller already holds the pool's single mutex
/// (see `pool::PoolState`), so there is nothing left for finer-grained
/// synchronization to buy us.
#[derive(Debug, Clone)]
pub struct Backend {
    pub url: String,
    pub weight: u32,
    pub active_connections: u64,
    pub total_requests: u64,
    pub healthy: bool,
}

impl Backend {
    /// `weight` is taken as given; `BackendPool::add` is responsible for
    /// enforcing the `weight >= 1` admission invariant. The scheduler family
    /// still treats `weight == 0` defensively (see `weighted_round_robin` and
    /// `weighted_least_connections`), since nothing upstream of `add`
    /// guarantees every caller went through it.
    pub fn new(url: String, weight: u32) -> Self {
        Self {
            url,
            weight,
            active_connections: 0,
            total_requests: 0,
            healthy: true,
        }
    }

    pub fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            url: self.url.clone(),
            weight: self.weight,
            active_connections: self.active_connections,
            total_requests: self.total_requests,
            healthy: self.healthy,
        }
    }
}

/// A cheap, owned copy of one backend's fields. Used to hand data to a
/// scheduler's `configure` step and anywhere else that needs to escape the
/// pool lock (e.g. `show()`, metrics emission after `release`).
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub url: String,
    pub weight: u32,
    pub active_connections: u64,
    pub total_requests: u64,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendView {
    pub weight: u32,
    pub active_connections: u64,
    pub healthy: bool,
}

impl From<&Backend> for BackendView {
    fn from(b: &Backend) -> Self {
        Self {
            weight: b.weight,
            active_connections: b.active_connections,
            healthy: b.healthy,
        }
    }
}
