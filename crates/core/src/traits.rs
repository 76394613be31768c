//! Seams between the engine and the outside world.

use tpmsync_types::StateSnapshot;

/// Receives live state from a running trial.
///
/// The engine asks [`is_armed`](TrialObserver::is_armed) before building a
/// snapshot, so an idle observer costs one atomic load per publish point.
///
/// # Guarantees expected from implementations
///
/// - **Non-blocking**: `publish` must return in bounded time even if nobody
///   is consuming.
/// - **Fire-and-forget**: delivery failures are swallowed; the engine never
///   sees them.
pub trait TrialObserver: Send + Sync {
    /// Whether someone currently wants snapshots.
    fn is_armed(&self) -> bool;

    /// Deliver one snapshot.
    fn publish(&self, snapshot: StateSnapshot);
}

/// Observer that never asks for snapshots.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpObserver;

impl TrialObserver for NoOpObserver {
    fn is_armed(&self) -> bool {
        false
    }

    fn publish(&self, _snapshot: StateSnapshot) {}
}
