//! tpmsync simulator
//!
//! Library half of the `tpmsync` binary: command-line overrides for a
//! settings document and deterministic replay of persisted trials.
//!
//! # Example
//!
//! ```ignore
//! use tpmsync_simulator::{replay_record, read_records};
//!
//! for record in read_records("results.jsonl".as_ref())? {
//!     let outcome = replay_record(&record)?;
//!     assert!(outcome.matches());
//! }
//! ```

mod overrides;
mod replay;

pub use overrides::SweepOverrides;
pub use replay::{read_records, replay_record, ReplayError, ReplayOutcome};
