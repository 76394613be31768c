//! Prometheus metrics backend for tpmsync.
//!
//! Implements [`tpmsync_metrics::MetricsRecorder`] using native Prometheus
//! counters, gauges, and histograms.
//!
//! # Usage
//!
//! Call [`install()`] once at startup before any metrics are recorded:
//! ```ignore
//! tpmsync_metrics_prometheus::install();
//! ```
//!
//! A sweep has no HTTP surface, so the registry is dumped with
//! [`encode_metrics()`] when the run ends.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Gauge, GaugeVec, HistogramVec,
};

/// Domain-specific Prometheus metrics for sweep monitoring.
pub struct Metrics {
    pub build_info: GaugeVec,

    // === Trials ===
    pub trials_completed: CounterVec,
    pub trial_iterations: HistogramVec,
    pub trial_duration: HistogramVec,
    pub settings_skipped: Counter,
    pub sink_failures: Counter,

    // === Sessions ===
    pub open_sessions: Gauge,
    pub snapshots_published: Counter,
    pub snapshots_dropped: Counter,

    // === Worker Pool ===
    pub pool_queue_depth: Gauge,
    pub active_workers: Gauge,
}

impl Metrics {
    fn new() -> Self {
        let duration_buckets = vec![
            0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0,
        ];
        let iteration_buckets = prometheus::exponential_buckets(10.0, 4.0, 10).unwrap();

        let build_info = register_gauge_vec!(
            "tpmsync_build_info",
            "Workbench build information",
            &["version"]
        )
        .unwrap();
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1.0);

        Self {
            build_info,

            // Trials
            trials_completed: register_counter_vec!(
                "tpmsync_trials_completed_total",
                "Trials that reached a terminal status",
                &["learn_rule", "status"]
            )
            .unwrap(),

            trial_iterations: register_histogram_vec!(
                "tpmsync_trial_iterations",
                "Total iterations per trial",
                &["learn_rule"],
                iteration_buckets
            )
            .unwrap(),

            trial_duration: register_histogram_vec!(
                "tpmsync_trial_duration_seconds",
                "Wall time per trial",
                &["learn_rule"],
                duration_buckets
            )
            .unwrap(),

            settings_skipped: register_counter!(
                "tpmsync_settings_skipped_total",
                "Parameter combinations rejected as infeasible"
            )
            .unwrap(),

            sink_failures: register_counter!(
                "tpmsync_sink_failures_total",
                "Trial results the sink failed to persist"
            )
            .unwrap(),

            // Sessions
            open_sessions: register_gauge!(
                "tpmsync_open_sessions",
                "Trial groups currently registered"
            )
            .unwrap(),

            snapshots_published: register_counter!(
                "tpmsync_snapshots_published_total",
                "Live snapshots delivered to subscribers"
            )
            .unwrap(),

            snapshots_dropped: register_counter!(
                "tpmsync_snapshots_dropped_total",
                "Live snapshots dropped because a subscriber fell behind"
            )
            .unwrap(),

            // Worker pool
            pool_queue_depth: register_gauge!(
                "tpmsync_pool_queue_depth",
                "Trial groups waiting for a worker"
            )
            .unwrap(),

            active_workers: register_gauge!(
                "tpmsync_active_workers",
                "Workers currently running a trial group"
            )
            .unwrap(),
        }
    }
}

/// Prometheus-backed metrics recorder.
pub struct PrometheusRecorder {
    metrics: Metrics,
}

impl PrometheusRecorder {
    fn new() -> Self {
        Self {
            metrics: Metrics::new(),
        }
    }
}

impl tpmsync_metrics::MetricsRecorder for PrometheusRecorder {
    // ── Trials ───────────────────────────────────────────────────────

    fn record_trial_completed(
        &self,
        learn_rule: &str,
        status: &str,
        iterations: u64,
        duration_secs: f64,
    ) {
        self.metrics
            .trials_completed
            .with_label_values(&[learn_rule, status])
            .inc();
        self.metrics
            .trial_iterations
            .with_label_values(&[learn_rule])
            .observe(iterations as f64);
        self.metrics
            .trial_duration
            .with_label_values(&[learn_rule])
            .observe(duration_secs);
    }

    fn record_settings_skipped(&self) {
        self.metrics.settings_skipped.inc();
    }

    fn record_sink_failure(&self) {
        self.metrics.sink_failures.inc();
    }

    // ── Sessions ─────────────────────────────────────────────────────

    fn set_open_sessions(&self, count: usize) {
        self.metrics.open_sessions.set(count as f64);
    }

    fn record_snapshot_published(&self) {
        self.metrics.snapshots_published.inc();
    }

    fn record_snapshot_dropped(&self) {
        self.metrics.snapshots_dropped.inc();
    }

    // ── Infrastructure ───────────────────────────────────────────────

    fn set_pool_queue_depth(&self, depth: usize) {
        self.metrics.pool_queue_depth.set(depth as f64);
    }

    fn set_active_workers(&self, count: usize) {
        self.metrics.active_workers.set(count as f64);
    }
}

/// Install the Prometheus metrics recorder as the global backend.
///
/// Idempotent: only the first call creates and registers the metrics.
pub fn install() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tpmsync_metrics::set_global_recorder(Box::new(PrometheusRecorder::new()));
    });
}

/// Gather and encode all registered Prometheus metrics as text format.
pub fn encode_metrics() -> Result<Vec<u8>, prometheus::Error> {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_then_record_shows_in_encoding() {
        install();
        install();
        tpmsync_metrics::record_trial_completed("HEBBIAN", "FINISHED", 120, 0.002);
        tpmsync_metrics::record_settings_skipped();

        let text = String::from_utf8(encode_metrics().unwrap()).unwrap();
        assert!(text.contains("tpmsync_trials_completed_total"));
        assert!(text.contains("learn_rule=\"HEBBIAN\""));
        assert!(text.contains("tpmsync_settings_skipped_total"));
    }
}
