// src/health/checker.rs
use crate::pool::BackendPool;
use std::time::{Duration, Instant};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs one health-check sweep: snapshot the current backend urls under the
/// pool lock, release it, then probe each with an independent HTTP HEAD.
/// Each probe has its own 2-second total timeout and lands in one of three
/// outcomes: a non-5xx response is healthy, a 5xx response is a completed
/// probe with an unhealthy verdict, and a timeout/connection failure is an
/// error — only the last of those bumps `backend.health_check.errors`.
pub async fn run_sweep(pool: &BackendPool) {
    let urls = pool.snapshot_urls().await;

    for url in urls {
        let started = Instant::now();
        let outcome = tokio::time::timeout(PROBE_TIMEOUT, pool.http_client().head(&url).send()).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (status, healthy) = match &outcome {
            Ok(Ok(resp)) if resp.status().as_u16() < 500 => ("healthy", true),
            Ok(Ok(_)) => ("unhealthy", false),
            Ok(Err(_)) | Err(_) => ("error", false),
        };

        pool.metrics()
            .record_health_probe(&url, latency_ms, status)
            .await;
        if status == "error" {
            pool.metrics().record_health_probe_error(&url).await;
        }

        pool.set_backend_health(&url, healthy).await;
        tracing::debug!(backend = %url, status, latency_ms, "health probe complete");
    }
}
