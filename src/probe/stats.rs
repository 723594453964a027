use std::sync::Arc;
use std::time::Duration;

use super::model::{ProbeResult, TargetStatistics};

const UPTIME_WEIGHT: f64 = 0.4;
const LATENCY_WEIGHT: f64 = 0.3;
const SUCCESS_WEIGHT: f64 = 0.3;

pub fn compute_statistics(history: &[Arc<ProbeResult>]) -> TargetStatistics {
    if history.is_empty() {
        return TargetStatistics::default();
    }

    let total_checks = history.len();
    let successful = history.iter().filter(|r| r.success).count();
    let latencies: Vec<Duration> = history
        .iter()
        .filter(|r| r.status_code.is_some())
        .map(|r| r.latency)
        .collect();

    let (avg_latency, min_latency, max_latency) = if latencies.is_empty() {
        (Duration::ZERO, Duration::ZERO, Duration::ZERO)
    } else {
        let total: Duration = latencies.iter().sum();
        (
            total / latencies.len() as u32,
            latencies.iter().min().copied().unwrap_or_default(),
            latencies.iter().max().copied().unwrap_or_default(),
        )
    };

    TargetStatistics {
        total_checks,
        successful,
        failed: total_checks - successful,
        success_rate: percentage(successful, total_checks),
        uptime_percentage: percentage(successful, total_checks),
        avg_latency,
        min_latency,
        max_latency,
        last_check: history.iter().map(|r| r.timestamp).max(),
    }
}

/// Health score in `0..=100`: uptime weighs 40%, response time and success
/// rate 30% each. A one second average response time scores zero. Uptime
/// and success rate are both the share of successful checks, so a target
/// answering only with errors scores on latency alone.
pub fn health_score(stats: &TargetStatistics) -> f64 {
    if stats.total_checks == 0 {
        return 0.0;
    }

    let avg_ms = stats.avg_latency.as_secs_f64() * 1000.0;
    let latency_score = (100.0 - avg_ms / 10.0).max(0.0);

    let score = stats.uptime_percentage * UPTIME_WEIGHT
        + latency_score * LATENCY_WEIGHT
        + stats.success_rate * SUCCESS_WEIGHT;
    score.clamp(0.0, 100.0)
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod stats_tests {
    use super::*;
    use crate::test_utils::{failed_result, ok_result};

    const URL: &str = "https://example.com/";

    fn with_latency(mut result: ProbeResult, millis: u64) -> Arc<ProbeResult> {
        result.latency = Duration::from_millis(millis);
        Arc::new(result)
    }

    #[test]
    fn test_empty_history() {
        let stats = compute_statistics(&[]);
        assert_eq!(0, stats.total_checks);
        assert_eq!(0.0, stats.success_rate);
        assert_eq!(Duration::ZERO, stats.avg_latency);
        assert!(stats.last_check.is_none());
        assert_eq!(0.0, health_score(&stats));
    }

    #[test]
    fn test_counts_and_latency() {
        let mut server_error = ok_result(URL);
        server_error.success = false;
        server_error.status_code = Some(500);

        let history = vec![
            with_latency(ok_result(URL), 100),
            with_latency(ok_result(URL), 300),
            with_latency(server_error, 200),
            with_latency(failed_result(URL), 5_000),
        ];
        let stats = compute_statistics(&history);

        assert_eq!(4, stats.total_checks);
        assert_eq!(2, stats.successful);
        assert_eq!(2, stats.failed);
        assert_eq!(50.0, stats.success_rate);
        assert_eq!(50.0, stats.uptime_percentage);
        assert_eq!(Duration::from_millis(200), stats.avg_latency);
        assert_eq!(Duration::from_millis(100), stats.min_latency);
        assert_eq!(Duration::from_millis(300), stats.max_latency);
        assert!(stats.last_check.is_some());
    }

    #[test]
    fn test_health_score_weights() {
        let history: Vec<_> = (0..10)
            .map(|i| {
                if i == 0 {
                    with_latency(failed_result(URL), 0)
                } else {
                    with_latency(ok_result(URL), 500)
                }
            })
            .collect();
        let stats = compute_statistics(&history);

        // 90% uptime, 500ms -> 50, 90% success
        let expected = 90.0 * 0.4 + 50.0 * 0.3 + 90.0 * 0.3;
        assert!((health_score(&stats) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_error_responses_count_as_downtime() {
        let history: Vec<_> = (0..4)
            .map(|_| {
                let mut server_error = ok_result(URL);
                server_error.success = false;
                server_error.status_code = Some(500);
                with_latency(server_error, 100)
            })
            .collect();
        let stats = compute_statistics(&history);

        assert_eq!(0.0, stats.uptime_percentage);
        assert_eq!(0.0, stats.success_rate);
        // only the 100ms latency counts: 90 * 0.3
        assert!((health_score(&stats) - 27.0).abs() < 1e-9);
    }

    #[test]
    fn test_slow_targets_floor_latency_score() {
        let history = vec![with_latency(ok_result(URL), 4_000)];
        let stats = compute_statistics(&history);
        assert!((health_score(&stats) - 70.0).abs() < 1e-9);
    }
}
