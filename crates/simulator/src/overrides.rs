//! Command-line overrides applied on top of a loaded settings document.

use tpmsync_orchestrator::SimulationSettings;
use tracing::info;

/// Fields the command line may replace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOverrides {
    pub workers: Option<usize>,
    pub repetitions: Option<u64>,
    pub max_iterations: Option<u64>,
}

impl SweepOverrides {
    pub fn is_empty(&self) -> bool {
        self.workers.is_none() && self.repetitions.is_none() && self.max_iterations.is_none()
    }

    /// Replace the overridden fields; the caller validates afterwards.
    pub fn apply(&self, settings: &mut SimulationSettings) {
        let base = settings.base_mut();
        if let Some(workers) = self.workers {
            info!(workers, "Overriding max_worker_count");
            base.max_worker_count = workers;
        }
        if let Some(repetitions) = self.repetitions {
            info!(repetitions, "Overriding max_session_count");
            base.max_session_count = repetitions;
        }
        if let Some(max_iterations) = self.max_iterations {
            info!(max_iterations, "Overriding max_iterations");
            base.max_iterations = max_iterations;
        }
    }
}
