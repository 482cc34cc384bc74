//! Rolling uptime and response-time statistics.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tdigests::TDigest;

use crate::db::{DbError, Store};

/// Uptime and latency statistics over a lookback window.
#[derive(Debug, Clone, Serialize)]
pub struct UptimeStats {
    pub total_checks: i64,
    pub successful_checks: i64,
    pub uptime_pct: f64,
    pub avg_latency_ms: Option<f64>,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub p50_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
}

pub struct UptimeAggregator {
    store: Arc<Store>,
}

impl UptimeAggregator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Compute stats over results in `[now - window_hours, now]`.
    ///
    /// A pure function of the stored history: the same window over the same
    /// data yields identical results. An empty window reports 100 % uptime
    /// (absence of data is not treated as downtime) and no latency stats.
    pub fn compute_stats(
        &self,
        target_id: i64,
        window_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<UptimeStats, DbError> {
        let start = now - Duration::hours(window_hours);
        let results = self.store.get_results(target_id, start, now, i32::MAX)?;

        let total_checks = results.len() as i64;
        let successful_checks = results.iter().filter(|r| r.success).count() as i64;

        let latencies: Vec<f64> = results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.latency_ms)
            .collect();

        if total_checks == 0 {
            return Ok(UptimeStats {
                total_checks: 0,
                successful_checks: 0,
                uptime_pct: 100.0,
                avg_latency_ms: None,
                min_latency_ms: None,
                max_latency_ms: None,
                p50_latency_ms: None,
                p95_latency_ms: None,
                p99_latency_ms: None,
            });
        }

        let uptime_pct = successful_checks as f64 / total_checks as f64 * 100.0;

        if latencies.is_empty() {
            return Ok(UptimeStats {
                total_checks,
                successful_checks,
                uptime_pct,
                avg_latency_ms: None,
                min_latency_ms: None,
                max_latency_ms: None,
                p50_latency_ms: None,
                p95_latency_ms: None,
                p99_latency_ms: None,
            });
        }

        let sum: f64 = latencies.iter().sum();
        let min = latencies.iter().copied().fold(f64::MAX, f64::min);
        let max = latencies.iter().copied().fold(f64::MIN, f64::max);

        let mut td = TDigest::from_values(latencies.clone());
        td.compress(100);

        Ok(UptimeStats {
            total_checks,
            successful_checks,
            uptime_pct,
            avg_latency_ms: Some(sum / latencies.len() as f64),
            min_latency_ms: Some(min),
            max_latency_ms: Some(max),
            p50_latency_ms: Some(td.estimate_quantile(0.50)),
            p95_latency_ms: Some(td.estimate_quantile(0.95)),
            p99_latency_ms: Some(td.estimate_quantile(0.99)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ProbeResult, Target};
    use tempfile::NamedTempFile;

    fn setup() -> (NamedTempFile, Arc<Store>, UptimeAggregator, i64) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let aggregator = UptimeAggregator::new(store.clone());
        let mut target = Target {
            name: "api".to_string(),
            url: "https://api.example.com".to_string(),
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();
        (tmp, store, aggregator, id)
    }

    fn add_result(store: &Store, id: i64, time: DateTime<Utc>, success: bool, latency: Option<f64>) {
        store
            .add_result(&ProbeResult {
                target_id: id,
                time,
                success,
                latency_ms: latency,
                status_code: success.then_some(200),
                tls_days_remaining: None,
            })
            .unwrap();
    }

    #[test]
    fn empty_window_reports_full_uptime() {
        let (_tmp, _store, aggregator, id) = setup();
        let stats = aggregator.compute_stats(id, 24, Utc::now()).unwrap();
        assert_eq!(stats.total_checks, 0);
        assert_eq!(stats.uptime_pct, 100.0);
        assert!(stats.avg_latency_ms.is_none());
        assert!(stats.p99_latency_ms.is_none());
    }

    #[test]
    fn mixed_results_compute_uptime_and_latency() {
        let (_tmp, store, aggregator, id) = setup();
        let now = Utc::now();

        for i in 0..8 {
            add_result(
                &store,
                id,
                now - Duration::minutes(i + 1),
                true,
                Some(100.0 * (i + 1) as f64),
            );
        }
        add_result(&store, id, now - Duration::minutes(9), false, None);
        add_result(&store, id, now - Duration::minutes(10), false, None);

        let stats = aggregator.compute_stats(id, 1, now).unwrap();
        assert_eq!(stats.total_checks, 10);
        assert_eq!(stats.successful_checks, 8);
        assert!((stats.uptime_pct - 80.0).abs() < f64::EPSILON);
        assert_eq!(stats.min_latency_ms, Some(100.0));
        assert_eq!(stats.max_latency_ms, Some(800.0));
        assert_eq!(stats.avg_latency_ms, Some(450.0));
        assert!(stats.p50_latency_ms.is_some());
    }

    #[test]
    fn repeated_queries_agree() {
        let (_tmp, store, aggregator, id) = setup();
        let now = Utc::now();

        add_result(&store, id, now - Duration::minutes(5), true, Some(120.0));
        add_result(&store, id, now - Duration::minutes(4), false, None);

        let a = aggregator.compute_stats(id, 1, now).unwrap();
        let b = aggregator.compute_stats(id, 1, now).unwrap();
        assert_eq!(a.total_checks, b.total_checks);
        assert_eq!(a.uptime_pct, b.uptime_pct);
        assert_eq!(a.avg_latency_ms, b.avg_latency_ms);
    }

    #[test]
    fn result_at_window_end_is_included() {
        let (_tmp, store, aggregator, id) = setup();
        let now = Utc::now();

        add_result(&store, id, now, true, Some(100.0));

        let stats = aggregator.compute_stats(id, 1, now).unwrap();
        assert_eq!(stats.total_checks, 1);
    }

    #[test]
    fn window_excludes_old_results() {
        let (_tmp, store, aggregator, id) = setup();
        let now = Utc::now();

        add_result(&store, id, now - Duration::hours(30), false, None);
        add_result(&store, id, now - Duration::minutes(30), true, Some(200.0));

        let stats = aggregator.compute_stats(id, 24, now).unwrap();
        assert_eq!(stats.total_checks, 1);
        assert_eq!(stats.uptime_pct, 100.0);
    }

    #[test]
    fn all_failures_report_zero_uptime_without_latency() {
        let (_tmp, store, aggregator, id) = setup();
        let now = Utc::now();

        add_result(&store, id, now - Duration::minutes(2), false, None);
        add_result(&store, id, now - Duration::minutes(1), false, None);

        let stats = aggregator.compute_stats(id, 1, now).unwrap();
        assert_eq!(stats.uptime_pct, 0.0);
        assert!(stats.avg_latency_ms.is_none());
    }
}
