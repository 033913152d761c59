// src/pool/scheduler.rs
use super::backend::BackendSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The six dispatch policies named in the pool's control surface.
///
/// `SourceHash` is not backed by a `Scheduler` impl — it is handled directly
/// by `BackendPool::select_backend_by_ip`, since it needs the client ip
/// rather than a no-argument `next()` call (see `pool::pool`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerAlgorithm {
    RoundRobin,
    Weighted,
    LeastConn,
    WeightedLeastConn,
    LeastRequests,
    SourceHash,
}

impl fmt::Display for SchedulerAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerAlgorithm::RoundRobin => "round_robin",
            SchedulerAlgorithm::Weighted => "weighted",
            SchedulerAlgorithm::LeastConn => "least_conn",
            SchedulerAlgorithm::WeightedLeastConn => "weighted_least_conn",
            SchedulerAlgorithm::LeastRequests => "least_requests",
            SchedulerAlgorithm::SourceHash => "source_hash",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SchedulerAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(SchedulerAlgorithm::RoundRobin),
            "weighted" => Ok(SchedulerAlgorithm::Weighted),
            "least_conn" => Ok(SchedulerAlgorithm::LeastConn),
            "weighted_least_conn" => Ok(SchedulerAlgorithm::WeightedLeastConn),
            "least_requests" => Ok(SchedulerAlgorithm::LeastRequests),
            "source_hash" => Ok(SchedulerAlgorithm::SourceHash),
            other => Err(format!("unknown scheduling algo: {other}")),
        }
    }
}

/// Configure-then-yield contract every in-pool scheduler implements.
///
/// `configure` resets whatever internal cursor/derived structure a
/// cursor-based policy keeps (repetition list, cursor index); it is called
/// by the pool's `_rebuild_scheduler` on membership changes (`add`,
/// `remove`, `set_scheduler`), not on every health-check tick.
///
/// `next` yields the url of the next candidate. It also receives the
/// *current* healthy-backend view, taken fresh by the pool on every
/// `select_backend` call: round-robin and weighted round-robin ignore it
/// (their choice comes from the cursor set up by the last `configure`), but
/// least-connections, weighted-least-connections, and least-requests are
/// defined entirely in terms of live `active_connections`/`total_requests`
/// and read this parameter instead of keeping their own copy — precision
/// beats amortization here, so these policies rebuild a small heap per
/// step rather than trust a stale cached one. `None` means the policy's
/// candidate set is empty ("exhausted").
pub trait Scheduler: Send {
    fn configure(&mut self, healthy: &[BackendSnapshot]);
    fn next(&mut self, live: &[BackendSnapshot]) -> Option<String>;
    fn name(&self) -> &'static str;
}

pub fn build_scheduler(algo: SchedulerAlgorithm) -> Box<dyn Scheduler> {
    match algo {
        SchedulerAlgorithm::RoundRobin => Box::new(super::round_robin::RoundRobinScheduler::new()),
        SchedulerAlgorithm::Weighted => {
            Box::new(super::weighted_round_robin::WeightedRoundRobinScheduler::new())
        }
        SchedulerAlgorithm::LeastConn => {
            Box::new(super::least_connections::LeastConnectionsScheduler::new())
        }
        SchedulerAlgorithm::WeightedLeastConn => Box::new(
            super::weighted_least_connections::WeightedLeastConnectionsScheduler::new(),
        ),
        SchedulerAlgorithm::LeastRequests => {
            Box::new(super::least_requests::LeastRequestsScheduler::new())
        }
        // select_backend_by_ip never consults the boxed scheduler; round-robin
        // is a harmless placeholder if select_backend() is ever called by
        // mistake while source-hash mode is active.
        SchedulerAlgorithm::SourceHash => Box::new(super::round_robin::RoundRobinScheduler::new()),
    }
}
