//! Dispatch trait for scheduling trial groups onto workers.
//!
//! The orchestrator never spawns threads itself. It hands each trial group
//! to a [`Dispatch`] implementation:
//!
//! - [`SyncDispatch`](https://docs.rs/tpmsync-dispatch-sync) runs closures inline (deterministic tests)
//! - [`PooledDispatch`](https://docs.rs/tpmsync-dispatch-pooled) uses a bounded rayon pool (sweeps)
//!
//! # Concurrency Bound
//!
//! A pooled implementation must never run more than its configured worker
//! count of groups at once. Extra submissions wait in the pool's queue; they
//! are never dropped.

/// Trait for dispatching trial groups to workers.
///
/// Implementations schedule fire-and-forget closures. Results travel back
/// through channels or sinks captured in the closures.
pub trait Dispatch: Send + Sync + Clone + 'static {
    /// Spawn one trial group.
    ///
    /// Never blocks on capacity: if every worker is busy the group waits in
    /// the queue.
    fn spawn_trial_group(&self, f: impl FnOnce() + Send + 'static);

    /// Spawn a trial group unless the queue is deeper than `max_queued`.
    ///
    /// Returns `true` if spawned, `false` if the pool is overloaded.
    fn try_spawn_trial_group(&self, max_queued: usize, f: impl FnOnce() + Send + 'static) -> bool {
        if self.queue_depth() > max_queued {
            return false;
        }
        self.spawn_trial_group(f);
        true
    }

    /// Groups submitted but not yet picked up by a worker.
    fn queue_depth(&self) -> usize;

    /// Groups currently running.
    fn active_workers(&self) -> usize;

    /// Upper bound on concurrently running groups.
    fn worker_count(&self) -> usize;
}
