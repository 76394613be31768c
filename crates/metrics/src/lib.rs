//! Metrics facade for tpmsync.
//!
//! Provides a [`MetricsRecorder`] trait with domain-specific methods and default
//! no-op implementations. A global singleton recorder is installed once, and
//! convenience free functions delegate to it.
//!
//! # Usage
//!
//! Callers record metrics via free functions:
//! ```ignore
//! tpmsync_metrics::record_trial_completed("HEBBIAN", "FINISHED", 412, 0.003);
//! tpmsync_metrics::set_pool_queue_depth(depth);
//! ```
//!
//! At startup, install a backend; without one every call is a no-op:
//! ```ignore
//! tpmsync_metrics_prometheus::install();
//! ```

use std::sync::OnceLock;

// ═══════════════════════════════════════════════════════════════════════
// Trait
// ═══════════════════════════════════════════════════════════════════════

/// Domain-specific metrics recording trait.
///
/// All methods have default no-op implementations so backends only need
/// to override the metrics they care about.
#[allow(unused_variables)]
pub trait MetricsRecorder: Send + Sync + 'static {
    // ── Trials ───────────────────────────────────────────────────────

    /// Record one finished trial.
    fn record_trial_completed(
        &self,
        learn_rule: &str,
        status: &str,
        iterations: u64,
        duration_secs: f64,
    ) {
    }

    /// Record a parameter combination rejected before any trial ran.
    fn record_settings_skipped(&self) {}

    /// Record a result the sink failed to persist.
    fn record_sink_failure(&self) {}

    // ── Sessions ─────────────────────────────────────────────────────

    /// Set the number of open trial groups.
    fn set_open_sessions(&self, count: usize) {}

    /// Record a live snapshot delivered to a subscriber.
    fn record_snapshot_published(&self) {}

    /// Record a live snapshot dropped because the subscriber fell behind.
    fn record_snapshot_dropped(&self) {}

    // ── Infrastructure ───────────────────────────────────────────────

    /// Set the worker pool queue depth.
    fn set_pool_queue_depth(&self, depth: usize) {}

    /// Set the number of workers currently running a trial group.
    fn set_active_workers(&self, count: usize) {}
}

// ═══════════════════════════════════════════════════════════════════════
// Global singleton
// ═══════════════════════════════════════════════════════════════════════

struct NoopRecorder;
impl MetricsRecorder for NoopRecorder {}

static RECORDER: OnceLock<Box<dyn MetricsRecorder>> = OnceLock::new();

/// Install a global metrics recorder.
///
/// Can only be called once. Subsequent calls are silently ignored.
pub fn set_global_recorder(recorder: Box<dyn MetricsRecorder>) {
    let _ = RECORDER.set(recorder);
}

/// Get the global metrics recorder.
///
/// Returns a no-op recorder if none has been installed.
#[inline]
fn recorder() -> &'static dyn MetricsRecorder {
    RECORDER.get().map(|r| r.as_ref()).unwrap_or(&NoopRecorder)
}

// ═══════════════════════════════════════════════════════════════════════
// Convenience free functions
// ═══════════════════════════════════════════════════════════════════════

// ── Trials ───────────────────────────────────────────────────────────

/// Record one finished trial.
#[inline]
pub fn record_trial_completed(learn_rule: &str, status: &str, iterations: u64, duration_secs: f64) {
    recorder().record_trial_completed(learn_rule, status, iterations, duration_secs);
}

/// Record a parameter combination rejected before any trial ran.
#[inline]
pub fn record_settings_skipped() {
    recorder().record_settings_skipped();
}

/// Record a result the sink failed to persist.
#[inline]
pub fn record_sink_failure() {
    recorder().record_sink_failure();
}

// ── Sessions ─────────────────────────────────────────────────────────

/// Set the number of open trial groups.
#[inline]
pub fn set_open_sessions(count: usize) {
    recorder().set_open_sessions(count);
}

/// Record a live snapshot delivered to a subscriber.
#[inline]
pub fn record_snapshot_published() {
    recorder().record_snapshot_published();
}

/// Record a live snapshot dropped because the subscriber fell behind.
#[inline]
pub fn record_snapshot_dropped() {
    recorder().record_snapshot_dropped();
}

// ── Infrastructure ───────────────────────────────────────────────────

/// Set the worker pool queue depth.
#[inline]
pub fn set_pool_queue_depth(depth: usize) {
    recorder().set_pool_queue_depth(depth);
}

/// Set the number of workers currently running a trial group.
#[inline]
pub fn set_active_workers(count: usize) {
    recorder().set_active_workers(count);
}
