// src/pool/stats.rs
use serde::Serialize;
use std::collections::HashMap;

/// Finite windows the stats store understands, plus the cumulative "all"
/// pseudo-period. Unknown tokens are silently skipped by `parse_period`.
pub fn parse_period(period: &str) -> Option<u64> {
    match period {
        "5m" => Some(300),
        "30m" => Some(1_800),
        "1h" => Some(3_600),
        "6h" => Some(21_600),
        "24h" => Some(86_400),
        _ => None,
    }
}

pub const RETENTION_WINDOW_SECS: u64 = 86_400;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BackendStat {
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PeriodStats {
    pub total: u64,
    pub backends: HashMap<String, BackendStat>,
}

/// Computes `PeriodStats` for one finite window.
///
/// Percentages are derived only after the window's total is fully known, by
/// doing a second pass over the per-url counts, rather than dividing by a
/// running total that is still growing as urls are iterated (which would
/// make an early url's percentage depend on iteration order).
pub fn compute_finite_period(
    request_times: &HashMap<String, Vec<f64>>,
    now: f64,
    window_secs: u64,
) -> PeriodStats {
    let cutoff = now - window_secs as f64;
    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut total: u64 = 0;

    for (url, timestamps) in request_times {
        let count = timestamps.iter().filter(|&&ts| ts >= cutoff).count() as u64;
        if count > 0 {
            total += count;
            counts.insert(url.clone(), count);
        }
    }

    let mut backends = HashMap::new();
    for (url, count) in counts {
        let percentage = if total > 0 {
            round1(count as f64 / total as f64 * 100.0)
        } else {
            0.0
        };
        backends.insert(url, BackendStat { count, percentage });
    }

    PeriodStats { total, backends }
}

/// Computes `PeriodStats` for the "all" pseudo-period from the cumulative
/// per-url counters, independent of the sliding-window timestamp lists.
pub fn compute_all_period(total_requests: &HashMap<String, u64>) -> PeriodStats {
    let total: u64 = total_requests.values().sum();
    let mut backends = HashMap::new();
    for (url, &count) in total_requests {
        let percentage = if total > 0 {
            round1(count as f64 / total as f64 * 100.0)
        } else {
            0.0
        };
        backends.insert(url.clone(), BackendStat { count, percentage });
    }
    PeriodStats { total, backends }
}

/// Discards timestamps older than the 24h retention window. Never fails:
/// processes whatever it finds under the pool lock.
pub fn trim_to_retention_window(request_times: &mut HashMap<String, Vec<f64>>, now: f64) {
    let cutoff = now - RETENTION_WINDOW_SECS as f64;
    for timestamps in request_times.values_mut() {
        timestamps.retain(|&ts| ts >= cutoff);
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_period_token_returns_none() {
        assert_eq!(parse_period("fortnight"), None);
    }

    #[test]
    fn known_periods_map_to_seconds() {
        assert_eq!(parse_period("5m"), Some(300));
        assert_eq!(parse_period("24h"), Some(86_400));
    }

    #[test]
    fn finite_period_counts_and_percentages_use_the_final_total() {
        let mut times = HashMap::new();
        times.insert("b1".to_string(), vec![0.0]);
        times.insert("b2".to_string(), vec![400.0]);

        let stats = compute_finite_period(&times, 500.0, 300);
        assert_eq!(stats.total, 1);
        assert!(!stats.backends.contains_key("b1"));
        assert_eq!(stats.backends["b2"].count, 1);
        assert_eq!(stats.backends["b2"].percentage, 100.0);
    }

    #[test]
    fn zero_count_backends_are_omitted() {
        let mut times = HashMap::new();
        times.insert("b1".to_string(), vec![0.0]);
        times.insert("b2".to_string(), vec![]);

        let stats = compute_finite_period(&times, 10.0, 300);
        assert_eq!(stats.total, 1);
        assert!(stats.backends.contains_key("b1"));
        assert!(!stats.backends.contains_key("b2"));
    }

    #[test]
    fn all_period_uses_cumulative_counters() {
        let mut totals = HashMap::new();
        totals.insert("b1".to_string(), 3u64);
        totals.insert("b2".to_string(), 1u64);

        let stats = compute_all_period(&totals);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.backends["b1"].percentage, 75.0);
        assert_eq!(stats.backends["b2"].percentage, 25.0);
    }

    #[test]
    fn trim_drops_timestamps_older_than_24h() {
        let mut times = HashMap::new();
        times.insert("b1".to_string(), vec![0.0, 90_000.0]);

        trim_to_retention_window(&mut times, 90_000.0);
        assert_eq!(times["b1"], vec![90_000.0]);
    }
}
