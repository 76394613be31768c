//! Rayon worker pool dispatch for sweeps.
//!
//! This module provides [`PooledDispatch`], which runs trial groups on one
//! fixed-size rayon thread pool. The pool size is the hard cap on concurrently
//! running groups; everything beyond it queues inside rayon.
//!
//! # Example
//!
//! ```no_run
//! use tpmsync_dispatch_pooled::{PooledDispatch, WorkerPoolConfig};
//!
//! // One worker per available core
//! let dispatch = PooledDispatch::new(WorkerPoolConfig::auto()).unwrap();
//!
//! // Or customize
//! let config = WorkerPoolConfig::builder()
//!     .workers(4)
//!     .stack_size(4 * 1024 * 1024)
//!     .build()
//!     .unwrap();
//!
//! let dispatch = PooledDispatch::new(config).unwrap();
//! ```

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

use tpmsync_dispatch::Dispatch;

/// Errors from worker pool configuration.
#[derive(Debug, Error)]
pub enum ThreadPoolError {
    #[error("Failed to build rayon thread pool: {0}")]
    RayonBuildError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Core pinning failed: {0}")]
    CorePinningError(String),
}

/// Configuration for the trial worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum number of trial groups running at once.
    pub workers: usize,

    /// Whether to pin each worker to its own CPU core.
    pub pin_cores: bool,

    /// First core used when pinning. Worker `i` lands on `core_start + i`.
    pub core_start: usize,

    /// Stack size per worker (bytes). Default: 2MB.
    pub stack_size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::auto()
    }
}

impl WorkerPoolConfig {
    /// One worker per available core.
    pub fn auto() -> Self {
        let available = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4);

        Self::with_workers(available)
    }

    /// A fixed worker count with default stack and no pinning.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            pin_cores: false,
            core_start: 0,
            stack_size: 2 * 1024 * 1024,
        }
    }

    /// Create a builder for custom configuration.
    pub fn builder() -> WorkerPoolConfigBuilder {
        WorkerPoolConfigBuilder::new()
    }

    /// Create a minimal configuration for testing (1 worker).
    pub fn minimal() -> Self {
        Self::with_workers(1)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ThreadPoolError> {
        if self.workers == 0 {
            return Err(ThreadPoolError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.stack_size < 64 * 1024 {
            return Err(ThreadPoolError::InvalidConfig(format!(
                "stack_size {} is below the 64KiB minimum",
                self.stack_size
            )));
        }

        if self.pin_cores {
            let available = std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4);

            let total_needed = self.core_start.saturating_add(self.workers);
            if total_needed > available {
                return Err(ThreadPoolError::InvalidConfig(format!(
                    "Configuration requires {} cores but only {} are available",
                    total_needed, available
                )));
            }
        }

        Ok(())
    }
}

/// Builder for WorkerPoolConfig.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfigBuilder {
    config: WorkerPoolConfig,
}

impl WorkerPoolConfigBuilder {
    /// Create a new builder with auto-detected defaults.
    pub fn new() -> Self {
        Self {
            config: WorkerPoolConfig::auto(),
        }
    }

    /// Set the worker count.
    pub fn workers(mut self, count: usize) -> Self {
        self.config.workers = count;
        self
    }

    /// Enable core pinning.
    pub fn pin_cores(mut self, enabled: bool) -> Self {
        self.config.pin_cores = enabled;
        self
    }

    /// Set the first pinned core. Enables pinning.
    pub fn core_start(mut self, core: usize) -> Self {
        self.config.core_start = core;
        self.config.pin_cores = true;
        self
    }

    /// Set the worker stack size.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = size;
        self
    }

    /// Build the configuration, validating it first.
    pub fn build(self) -> Result<WorkerPoolConfig, ThreadPoolError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation.
    pub fn build_unchecked(self) -> WorkerPoolConfig {
        self.config
    }
}

impl Default for WorkerPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the pending counter when a spawned group ends, even by panic.
struct PendingGuard {
    pending: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl PendingGuard {
    fn start(pending: Arc<AtomicUsize>, active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        Self { pending, active }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Rayon worker pool dispatch.
///
/// Cloning shares the same pool and counters.
#[derive(Clone)]
pub struct PooledDispatch {
    config: WorkerPoolConfig,
    pool: Arc<rayon::ThreadPool>,
    pending: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl PooledDispatch {
    /// Create a new pooled dispatch with the given configuration.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, ThreadPoolError> {
        config.validate()?;

        let pool = Arc::new(Self::build_pool(&config)?);

        tracing::info!(
            workers = config.workers,
            pin_cores = config.pin_cores,
            stack_size = config.stack_size,
            "Worker pool initialized"
        );

        Ok(Self {
            config,
            pool,
            pending: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Create with auto-detected configuration.
    pub fn auto() -> Result<Self, ThreadPoolError> {
        Self::new(WorkerPoolConfig::auto())
    }

    /// Get the configuration.
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Hand a group whose pending slot is already counted to the pool.
    fn spawn_reserved(&self, f: impl FnOnce() + Send + 'static) {
        let pending = Arc::clone(&self.pending);
        let active = Arc::clone(&self.active);
        self.pool.spawn(move || {
            let _guard = PendingGuard::start(pending, active);
            f();
        });
    }

    fn build_pool(config: &WorkerPoolConfig) -> Result<rayon::ThreadPool, ThreadPoolError> {
        let mut builder = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .stack_size(config.stack_size)
            .thread_name(|i| format!("trial-{}", i))
            .panic_handler(|_| {
                tracing::error!("Trial group panicked; worker continues");
            });

        if config.pin_cores {
            let start_core = config.core_start;
            builder = builder.start_handler(move |i| {
                let core_id = start_core + i;
                if let Err(e) = pin_thread_to_core(core_id) {
                    tracing::warn!(core = core_id, error = ?e, "Failed to pin trial worker");
                } else {
                    tracing::debug!(core = core_id, thread = i, "Pinned trial worker");
                }
            });
        }

        builder
            .build()
            .map_err(|e| ThreadPoolError::RayonBuildError(e.to_string()))
    }
}

impl Dispatch for PooledDispatch {
    #[instrument(level = "debug", skip_all)]
    fn spawn_trial_group(&self, f: impl FnOnce() + Send + 'static) {
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.spawn_reserved(f);
    }

    /// The pending slot is reserved by compare-exchange before the depth
    /// check can go stale.
    #[instrument(level = "debug", skip_all)]
    fn try_spawn_trial_group(&self, max_queued: usize, f: impl FnOnce() + Send + 'static) -> bool {
        let mut pending = self.pending.load(Ordering::Acquire);
        loop {
            let queued = pending.saturating_sub(self.active.load(Ordering::Acquire));
            if queued > max_queued {
                return false;
            }
            match self.pending.compare_exchange_weak(
                pending,
                pending + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => pending = actual,
            }
        }
        self.spawn_reserved(f);
        true
    }

    fn queue_depth(&self) -> usize {
        let pending = self.pending.load(Ordering::Relaxed);
        pending.saturating_sub(self.active.load(Ordering::Relaxed))
    }

    fn active_workers(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    fn worker_count(&self) -> usize {
        self.config.workers
    }
}

/// Pin the current thread to a specific CPU core.
#[cfg(target_os = "linux")]
fn pin_thread_to_core(core_id: usize) -> Result<(), ThreadPoolError> {
    use std::mem;

    unsafe {
        let mut cpuset: libc::cpu_set_t = mem::zeroed();
        libc::CPU_ZERO(&mut cpuset);
        libc::CPU_SET(core_id, &mut cpuset);

        let result = libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &cpuset);

        if result == 0 {
            Ok(())
        } else {
            Err(ThreadPoolError::CorePinningError(format!(
                "sched_setaffinity failed for core {}",
                core_id
            )))
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_thread_to_core(core_id: usize) -> Result<(), ThreadPoolError> {
    tracing::warn!(
        core = core_id,
        "Core pinning not implemented for this platform"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_auto_config() {
        let config = WorkerPoolConfig::auto();
        assert!(config.workers >= 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_builder() {
        let config = WorkerPoolConfig::builder()
            .workers(3)
            .stack_size(1024 * 1024)
            .build()
            .unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.stack_size, 1024 * 1024);
        assert!(!config.pin_cores);
    }

    #[test]
    fn test_core_start_enables_pinning() {
        let config = WorkerPoolConfig::builder()
            .workers(2)
            .core_start(1)
            .build_unchecked();
        assert!(config.pin_cores);
        assert_eq!(config.core_start, 1);
    }

    #[test]
    fn test_invalid_config() {
        assert!(WorkerPoolConfig::builder().workers(0).build().is_err());
        assert!(WorkerPoolConfig::builder().stack_size(1024).build().is_err());
        assert!(WorkerPoolConfig::builder()
            .workers(usize::MAX / 2)
            .core_start(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_spawn_runs_all_groups() {
        let dispatch = PooledDispatch::new(WorkerPoolConfig::with_workers(2)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = counter.clone();
            dispatch.spawn_trial_group(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        wait_for(|| counter.load(Ordering::SeqCst) == 20);
        wait_for(|| dispatch.active_workers() == 0 && dispatch.queue_depth() == 0);
    }

    #[test]
    fn test_concurrency_never_exceeds_workers() {
        let workers = 3;
        let dispatch = PooledDispatch::new(WorkerPoolConfig::with_workers(workers)).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..12 {
            let (running, peak, done) = (running.clone(), peak.clone(), done.clone());
            dispatch.spawn_trial_group(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        wait_for(|| done.load(Ordering::SeqCst) == 12);
        assert!(peak.load(Ordering::SeqCst) <= workers);
        assert_eq!(dispatch.worker_count(), workers);
    }

    #[test]
    fn test_panicking_group_releases_counters() {
        let dispatch = PooledDispatch::new(WorkerPoolConfig::minimal()).unwrap();
        dispatch.spawn_trial_group(|| panic!("boom"));

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        dispatch.spawn_trial_group(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });

        wait_for(|| ran.load(Ordering::SeqCst) == 1);
        wait_for(|| dispatch.active_workers() == 0 && dispatch.queue_depth() == 0);
    }

    #[test]
    fn test_try_spawn_rejects_when_backlogged() {
        let dispatch = PooledDispatch::new(WorkerPoolConfig::minimal()).unwrap();
        let gate = Arc::new(std::sync::Barrier::new(2));

        let g = gate.clone();
        dispatch.spawn_trial_group(move || {
            g.wait();
        });
        for _ in 0..3 {
            dispatch.spawn_trial_group(|| {});
        }
        wait_for(|| dispatch.active_workers() == 1);

        assert!(!dispatch.try_spawn_trial_group(2, || {}));
        gate.wait();
        wait_for(|| dispatch.queue_depth() == 0 && dispatch.active_workers() == 0);
        assert!(dispatch.try_spawn_trial_group(2, || {}));
    }

    #[test]
    fn test_concurrent_try_spawn_respects_bound() {
        let dispatch = PooledDispatch::new(WorkerPoolConfig::minimal()).unwrap();
        let gate = Arc::new(std::sync::Barrier::new(2));
        let g = gate.clone();
        dispatch.spawn_trial_group(move || {
            g.wait();
        });
        wait_for(|| dispatch.active_workers() == 1);

        let max_queued = 4;
        let start = Arc::new(std::sync::Barrier::new(16));
        let submitters: Vec<_> = (0..16)
            .map(|_| {
                let dispatch = dispatch.clone();
                let start = start.clone();
                std::thread::spawn(move || {
                    start.wait();
                    (0..4)
                        .filter(|_| dispatch.try_spawn_trial_group(max_queued, || {}))
                        .count()
                })
            })
            .collect();
        let accepted: usize = submitters.into_iter().map(|h| h.join().unwrap()).sum();

        // Accepted at depths 0 through max_queued, never beyond.
        assert_eq!(accepted, max_queued + 1);
        assert_eq!(dispatch.queue_depth(), max_queued + 1);

        gate.wait();
        wait_for(|| dispatch.queue_depth() == 0 && dispatch.active_workers() == 0);
    }
}
