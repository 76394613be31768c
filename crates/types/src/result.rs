//! Trial outcomes and live state snapshots.

use crate::tensor::TensorPair;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal status of a synchronization trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Both weight tensors became identical.
    Finished,
    /// The iteration cap was exceeded before synchronization.
    LimitReached,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Finished => "FINISHED",
            SessionStatus::LimitReached => "LIMIT_REACHED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one trial.
///
/// Reproducible from `(settings, seed)`; carries no wall-clock data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    pub seed: u64,
    /// Stimulate passes performed.
    pub total_iterations: u64,
    /// Iterations in which both sides agreed and learned.
    pub learn_iterations: u64,
    pub initial_weights: TensorPair,
    pub final_weights: TensorPair,
    pub status: SessionStatus,
}

impl SessionResult {
    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }
}

/// What a published snapshot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotKind {
    /// Intermediate state of a running trial.
    Stimulate,
    /// Final state of a trial that just ended.
    Finished,
}

/// A point-in-time view of a running trial, streamed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub kind: SnapshotKind,
    pub seed: u64,
    pub total_iterations: u64,
    pub learn_iterations: u64,
    /// Final outputs (τ) of sides A and B in the last stimulate pass.
    pub outputs: Option<(i32, i32)>,
    pub weights: TensorPair,
    /// Set only on `Finished` snapshots.
    pub status: Option<SessionStatus>,
}
