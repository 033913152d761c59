// src/pool/pool.rs
use super::backend::{Backend, BackendSnapshot, BackendView};
use super::scheduler::{build_scheduler, Scheduler, SchedulerAlgorithm};
use super::stats::{self, PeriodStats};
use crate::metrics::MetricsRegistry;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("unknown scheduling algo: {0}")]
    UnknownAlgorithm(String),
}

/// Everything the pool's single mutex protects: the backend list, the
/// current scheduler and its internal state, the sliding-window statistics
/// store, and the cumulative per-url request counters.
struct PoolState {
    backends: Vec<Backend>,
    scheduler: Box<dyn Scheduler>,
    source_hash_active: bool,
    request_times: HashMap<String, Vec<f64>>,
    total_requests: HashMap<String, u64>,
}

impl PoolState {
    fn new(algorithm: SchedulerAlgorithm) -> Self {
        Self {
            backends: Vec::new(),
            scheduler: build_scheduler(algorithm),
            source_hash_active: algorithm == SchedulerAlgorithm::SourceHash,
            request_times: HashMap::new(),
            total_requests: HashMap::new(),
        }
    }
}

/// Resets the scheduler's cursor/derived structure from the current healthy
/// subset. Called on membership changes (`add`, `remove`, `set_scheduler`)
/// and, once, when `select_backend` finds the scheduler's cursor exhausted.
fn rebuild_scheduler_locked(state: &mut PoolState) {
    let healthy: Vec<BackendSnapshot> = state
        .backends
        .iter()
        .filter(|b| b.healthy)
        .map(Backend::snapshot)
        .collect();
    state.scheduler.configure(&healthy);
}

/// Advances the scheduler by one step and returns the index of a healthy
/// backend to dispatch to, or `None` if none exists. Bounded retry: a
/// cursor-based scheduler (round-robin, weighted round-robin) may yield a
/// url that has gone unhealthy since its last rebuild — such picks are
/// skipped. A scheduler reporting its candidate set exhausted is rebuilt
/// once and retried; exhausting a second time within the same call is
/// treated as a bug (logged, not panicked).
fn select_index_locked(state: &mut PoolState) -> Option<usize> {
    let max_tries = state.backends.len().saturating_mul(2) + 2;
    let mut exhaustions = 0;

    for _ in 0..max_tries {
        let healthy_now: Vec<BackendSnapshot> = state
            .backends
            .iter()
            .filter(|b| b.healthy)
            .map(Backend::snapshot)
            .collect();
        if healthy_now.is_empty() {
            return None;
        }

        match state.scheduler.next(&healthy_now) {
            Some(url) => {
                if let Some(idx) = state
                    .backends
                    .iter()
                    .position(|b| b.url == url && b.healthy)
                {
                    return Some(idx);
                }
                // Stale pick from a cursor-based scheduler's pre-health-flip
                // list; try the next step.
            }
            None => {
                exhaustions += 1;
                if exhaustions >= 2 {
                    tracing::error!(
                        "scheduler cursor exhausted twice within one select_backend call; this is a bug"
                    );
                    return None;
                }
                state.scheduler.configure(&healthy_now);
            }
        }
    }

    None
}

struct HealthTaskHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

struct CleanupTaskHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Owns the backends, the current scheduler, the statistics store, the
/// health-check and cleanup background tasks, and a metrics handle. All
/// operator-facing and hot-path pool operations hang off this type.
pub struct BackendPool {
    state: Mutex<PoolState>,
    metrics: Arc<MetricsRegistry>,
    http_client: reqwest::Client,
    health_check_interval: Duration,
    health_task: Mutex<Option<HealthTaskHandle>>,
    cleanup_task: Mutex<Option<CleanupTaskHandle>>,
}

impl BackendPool {
    pub fn new(metrics: Arc<MetricsRegistry>, health_check_interval_secs: f64) -> Self {
        Self {
            state: Mutex::new(PoolState::new(SchedulerAlgorithm::RoundRobin)),
            metrics,
            http_client: reqwest::Client::new(),
            health_check_interval: Duration::from_secs_f64(health_check_interval_secs.max(0.01)),
            health_task: Mutex::new(None),
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    // ---- membership -----------------------------------------------------

    /// Inserts a backend, or replaces the existing entry for the same url in
    /// place (preserving its position in display order), then rebuilds the
    /// scheduler. `weight` is clamped to the `>= 1` admission invariant.
    pub async fn add(&self, url: String, weight: u32) {
        let weight = weight.max(1);
        let mut state = self.state.lock().await;
        if let Some(existing) = state.backends.iter_mut().find(|b| b.url == url) {
            *existing = Backend::new(url, weight);
        } else {
            state.backends.push(Backend::new(url, weight));
        }
        rebuild_scheduler_locked(&mut state);
    }

    /// Removes a backend if present; never fails. Statistics keyed by this
    /// url are left untouched — they are only aged out by the cleanup loop.
    pub async fn remove(&self, url: &str) {
        let mut state = self.state.lock().await;
        state.backends.retain(|b| b.url != url);
        rebuild_scheduler_locked(&mut state);
    }

    /// Replaces the active scheduler. `"source_hash"` is accepted here too —
    /// it flips `source_hash_active` so `select_backend_by_ip` is the
    /// intended dispatch path, even though it isn't backed by a `Scheduler`
    /// impl.
    pub async fn set_scheduler(&self, algo: &str) -> Result<(), PoolError> {
        let algorithm: SchedulerAlgorithm =
            algo.parse().map_err(PoolError::UnknownAlgorithm)?;
        let mut state = self.state.lock().await;
        state.source_hash_active = algorithm == SchedulerAlgorithm::SourceHash;
        state.scheduler = build_scheduler(algorithm);
        rebuild_scheduler_locked(&mut state);
        Ok(())
    }

    pub async fn source_hash_active(&self) -> bool {
        self.state.lock().await.source_hash_active
    }

    // ---- hot path ---------------------------------------------------------

    /// Advances the active scheduler by one step and pre-increments
    /// `active_connections` before releasing the lock. Returns `None` if no
    /// backend is currently healthy.
    pub async fn select_backend(&self) -> Option<BackendSnapshot> {
        let mut state = self.state.lock().await;
        if !state.backends.iter().any(|b| b.healthy) {
            return None;
        }
        let idx = select_index_locked(&mut state)?;
        state.backends[idx].active_connections += 1;
        let snapshot = state.backends[idx].snapshot();
        drop(state);

        self.metrics
            .set_gauge(
                "backend.active_connections",
                &[("backend", &snapshot.url)],
                snapshot.active_connections as f64,
            )
            .await;

        Some(snapshot)
    }

    /// Source-hash dispatch: sort healthy backends by url, MD5 the client ip
    /// bytes, interpret the digest as a non-negative integer, index modulo
    /// the sorted list's length. Stable for a given ip while membership and
    /// health are unchanged.
    pub async fn select_backend_by_ip(&self, ip: &str) -> Option<BackendSnapshot> {
        let mut state = self.state.lock().await;

        let mut healthy_indices: Vec<usize> = state
            .backends
            .iter()
            .enumerate()
            .filter(|(_, b)| b.healthy)
            .map(|(i, _)| i)
            .collect();
        if healthy_indices.is_empty() {
            return None;
        }
        healthy_indices.sort_by(|&a, &b| state.backends[a].url.cmp(&state.backends[b].url));

        let digest = md5::compute(ip.as_bytes());
        let as_int = u128::from_be_bytes(digest.0);
        let chosen = healthy_indices[(as_int % healthy_indices.len() as u128) as usize];

        state.backends[chosen].active_connections += 1;
        let snapshot = state.backends[chosen].snapshot();
        drop(state);

        self.metrics
            .set_gauge(
                "backend.active_connections",
                &[("backend", &snapshot.url)],
                snapshot.active_connections as f64,
            )
            .await;

        Some(snapshot)
    }

    /// Decrements `active_connections` and increments `total_requests` on
    /// the backend matching `backend.url`, if it is still registered.
    /// Tolerates a backend removed concurrently with an in-flight request.
    pub async fn release(&self, backend: &BackendSnapshot) {
        let mut state = self.state.lock().await;
        let remaining = if let Some(b) = state.backends.iter_mut().find(|b| b.url == backend.url) {
            b.active_connections = b.active_connections.saturating_sub(1);
            b.total_requests += 1;
            Some(b.active_connections)
        } else {
            None
        };
        drop(state);

        if let Some(remaining) = remaining {
            self.metrics
                .set_gauge(
                    "backend.active_connections",
                    &[("backend", &backend.url)],
                    remaining as f64,
                )
                .await;
        }
    }

    // ---- statistics ---------------------------------------------------

    pub async fn record_request(&self, url: &str) {
        let mut state = self.state.lock().await;
        let now = now_secs();
        state
            .request_times
            .entry(url.to_string())
            .or_default()
            .push(now);
        *state.total_requests.entry(url.to_string()).or_insert(0) += 1;
    }

    /// Unknown period tokens are silently skipped, never an error.
    pub async fn get_stats(&self, periods: &[String]) -> HashMap<String, PeriodStats> {
        let state = self.state.lock().await;
        let now = now_secs();
        let mut result = HashMap::new();

        for period in periods {
            if period == "all" {
                result.insert(
                    period.clone(),
                    stats::compute_all_period(&state.total_requests),
                );
            } else if let Some(secs) = stats::parse_period(period) {
                result.insert(
                    period.clone(),
                    stats::compute_finite_period(&state.request_times, now, secs),
                );
            }
        }

        result
    }

    pub async fn show(&self) -> Value {
        let state = self.state.lock().await;
        let mut map = serde_json::Map::new();
        for b in &state.backends {
            let view = BackendView::from(b);
            map.insert(b.url.clone(), serde_json::to_value(view).unwrap());
        }
        Value::Object(map)
    }

    // ---- health-check internals (see health::checker) -------------------

    pub(crate) async fn snapshot_urls(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .backends
            .iter()
            .map(|b| b.url.clone())
            .collect()
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub(crate) async fn set_backend_health(&self, url: &str, healthy: bool) {
        let mut state = self.state.lock().await;
        if let Some(b) = state.backends.iter_mut().find(|b| b.url == url) {
            b.healthy = healthy;
        }
        // Membership hasn't changed, so the scheduler is *not* rebuilt
        // here; select_backend filters against live health instead.
    }

    // ---- background task lifecycle ---------------------------------------

    /// Idempotent: a second call while a task is already running is a no-op.
    pub async fn start_health_checks(self: &Arc<Self>) {
        let mut guard = self.health_task.lock().await;
        if guard.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.health_check_interval;
        let pool = Arc::clone(self);

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        crate::health::run_sweep(&pool).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        *guard = Some(HealthTaskHandle { shutdown_tx, join });
    }

    pub async fn stop_health_checks(&self) {
        let mut guard = self.health_task.lock().await;
        if let Some(handle) = guard.take() {
            let _ = handle.shutdown_tx.send(true);
            let _ = handle.join.await;
        }
    }

    /// Idempotent: a second call while a task is already running is a no-op.
    pub async fn start_stats_cleanup(self: &Arc<Self>) {
        let mut guard = self.cleanup_task.lock().await;
        if guard.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let pool = Arc::clone(self);

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(3600)) => {
                        pool.cleanup_old_requests().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        *guard = Some(CleanupTaskHandle { shutdown_tx, join });
    }

    pub async fn stop_stats_cleanup(&self) {
        let mut guard = self.cleanup_task.lock().await;
        if let Some(handle) = guard.take() {
            let _ = handle.shutdown_tx.send(true);
            let _ = handle.join.await;
        }
    }

    async fn cleanup_old_requests(&self) {
        let mut state = self.state.lock().await;
        let now = now_secs();
        stats::trim_to_retention_window(&mut state.request_times, now);
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<MetricsRegistry> {
        Arc::new(MetricsRegistry::new())
    }

    #[tokio::test]
    async fn round_robin_scenario_from_spec() {
        let pool = BackendPool::new(registry(), 5.0);
        pool.add("b1".into(), 1).await;
        pool.add("b2".into(), 1).await;
        pool.add("b3".into(), 1).await;

        let mut picks = Vec::new();
        for _ in 0..7 {
            let b = pool.select_backend().await.unwrap();
            picks.push(b.url.clone());
            pool.release(&b).await;
        }
        assert_eq!(
            picks,
            vec!["b1", "b2", "b3", "b1", "b2", "b3", "b1"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn weighted_round_robin_scenario_from_spec() {
        let pool = BackendPool::new(registry(), 5.0);
        pool.set_scheduler("weighted").await.unwrap();
        pool.add("b1".into(), 2).await;
        pool.add("b2".into(), 1).await;

        let mut picks = Vec::new();
        for _ in 0..6 {
            let b = pool.select_backend().await.unwrap();
            picks.push(b.url.clone());
            pool.release(&b).await;
        }
        assert_eq!(
            picks,
            vec!["b1", "b1", "b2", "b1", "b1", "b2"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn least_connections_scenario_from_spec() {
        let pool = BackendPool::new(registry(), 5.0);
        pool.set_scheduler("least_conn").await.unwrap();
        pool.add("b1".into(), 1).await;
        pool.add("b2".into(), 1).await;
        pool.add("b3".into(), 1).await;

        // Drive active_connections to {b1:5, b2:1, b3:3} by selecting
        // without releasing.
        for (url, times) in [("b1", 5), ("b2", 1), ("b3", 3)] {
            pool.set_scheduler("least_conn").await.unwrap();
            for _ in 0..times {
                // force selection of a specific backend by temporarily
                // disabling the others via health, then restoring.
                for other in ["b1", "b2", "b3"] {
                    pool.set_backend_health(other, other == url).await;
                }
                let b = pool.select_backend().await.unwrap();
                assert_eq!(b.url, url);
            }
        }
        for b in ["b1", "b2", "b3"] {
            pool.set_backend_health(b, true).await;
        }

        let picked = pool.select_backend().await.unwrap();
        assert_eq!(picked.url, "b2");
    }

    #[tokio::test]
    async fn unknown_algorithm_is_rejected() {
        let pool = BackendPool::new(registry(), 5.0);
        let err = pool.set_scheduler("quantum_annealing").await.unwrap_err();
        assert!(matches!(err, PoolError::UnknownAlgorithm(_)));
    }

    #[tokio::test]
    async fn select_backend_never_returns_unhealthy_while_healthy_exists() {
        let pool = BackendPool::new(registry(), 5.0);
        pool.add("b1".into(), 1).await;
        pool.add("b2".into(), 1).await;
        pool.set_backend_health("b1", false).await;

        for _ in 0..10 {
            let b = pool.select_backend().await.unwrap();
            assert_eq!(b.url, "b2");
            pool.release(&b).await;
        }
    }

    #[tokio::test]
    async fn no_healthy_backend_returns_none() {
        let pool = BackendPool::new(registry(), 5.0);
        pool.add("b1".into(), 1).await;
        pool.set_backend_health("b1", false).await;
        assert!(pool.select_backend().await.is_none());
    }

    #[tokio::test]
    async fn balanced_select_release_preserves_active_connections() {
        let pool = BackendPool::new(registry(), 5.0);
        pool.add("b1".into(), 1).await;

        for _ in 0..20 {
            let b = pool.select_backend().await.unwrap();
            pool.release(&b).await;
        }

        let shown = pool.show().await;
        assert_eq!(shown["b1"]["active_connections"], 0);
    }

    #[tokio::test]
    async fn source_hash_is_stable_for_repeated_ips() {
        let pool = BackendPool::new(registry(), 5.0);
        pool.set_scheduler("source_hash").await.unwrap();
        pool.add("b1".into(), 1).await;
        pool.add("b2".into(), 1).await;

        let first = pool.select_backend_by_ip("10.0.0.1").await.unwrap();
        pool.release(&first).await;
        let _ = pool.select_backend_by_ip("10.0.0.2").await;
        let third = pool.select_backend_by_ip("10.0.0.1").await.unwrap();

        assert_eq!(first.url, third.url);
    }

    #[tokio::test]
    async fn add_replaces_existing_entry_in_place() {
        let pool = BackendPool::new(registry(), 5.0);
        pool.add("b1".into(), 1).await;
        pool.add("b2".into(), 1).await;
        let before = pool.select_backend().await.unwrap();
        pool.release(&before).await;

        pool.add("b1".into(), 9).await;
        let shown = pool.show().await;
        assert_eq!(shown["b1"]["weight"], 9);
        assert_eq!(shown["b1"]["active_connections"], 0);
    }

    #[tokio::test]
    async fn remove_does_not_clear_recorded_stats() {
        let pool = BackendPool::new(registry(), 5.0);
        pool.add("b1".into(), 1).await;
        pool.record_request("b1").await;
        pool.remove("b1").await;

        let stats = pool.get_stats(&["all".to_string()]).await;
        assert_eq!(stats["all"].backends["b1"].count, 1);
    }

    #[tokio::test]
    async fn get_stats_scenario_from_spec() {
        let pool = BackendPool::new(registry(), 5.0);
        pool.add("b1".into(), 1).await;
        pool.add("b2".into(), 1).await;

        // record_request uses wall-clock `now`, so we exercise the pure
        // stats module directly for the exact t=0 / t=400 / query-at-500
        // scenario rather than sleeping in a test.
        let mut times = HashMap::new();
        times.insert("b1".to_string(), vec![0.0]);
        times.insert("b2".to_string(), vec![400.0]);
        let five_min = stats::compute_finite_period(&times, 500.0, 300);
        assert_eq!(five_min.total, 1);

        let mut totals = HashMap::new();
        totals.insert("b1".to_string(), 1u64);
        totals.insert("b2".to_string(), 1u64);
        let all = stats::compute_all_period(&totals);
        assert_eq!(all.total, 2);

        let _ = pool; // pool constructed only to mirror a realistic setup
    }
}
