//! Tree Parity Machine synchronization engine.
//!
//! This crate turns validated settings and a seed into a trial result:
//!
//! - [`TpmSettings`]: immutable structure and learning parameters
//! - [`Topology`]: how layers connect and what their input counts are
//! - [`LearnRule`]: the weight update applied when both sides agree
//! - [`SyncEngine`]: the loop that drives two machines to equal weights
//! - [`TrialObserver`]: the seam through which live state leaves a trial
//!
//! # Architecture
//!
//! ```text
//! TpmSettings + seed → SyncEngine::run() → SessionResult
//!                             │
//!                             └─► TrialObserver::publish(StateSnapshot)
//! ```
//!
//! The engine is:
//! - **Synchronous**: No async, no threads of its own
//! - **Deterministic**: Same settings + seed = same result
//! - **I/O free**: Persistence and scheduling belong to the orchestrator

mod engine;
mod error;
mod learn;
pub mod math;
pub mod random;
mod settings;
mod topology;
mod traits;

pub use engine::{EngineConfig, SyncEngine};
pub use error::SettingsError;
pub use learn::LearnRule;
pub use settings::TpmSettings;
pub use topology::{Structure, Topology};
pub use traits::{NoOpObserver, TrialObserver};
