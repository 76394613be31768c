//! Synchronous inline dispatch for deterministic runs.
//!
//! [`SyncDispatch`] runs every trial group inline on the calling thread,
//! so groups complete in submission order. Queue depths are always 0.

use tpmsync_dispatch::Dispatch;

/// Synchronous dispatch that runs closures inline.
///
/// `spawn_trial_group` returns only after the group has finished.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncDispatch;

impl SyncDispatch {
    pub fn new() -> Self {
        Self
    }
}

impl Dispatch for SyncDispatch {
    fn spawn_trial_group(&self, f: impl FnOnce() + Send + 'static) {
        f();
    }

    fn queue_depth(&self) -> usize {
        0
    }

    fn active_workers(&self) -> usize {
        0
    }

    fn worker_count(&self) -> usize {
        1
    }
}
