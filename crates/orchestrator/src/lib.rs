//! Concurrent orchestration of TPM synchronization trials.
//!
//! - [`Orchestrator`]: sweeps a [`SimulationSettings`] document or accepts
//!   [`OnDemandRequest`]s, one trial group per settings value
//! - [`ResultSink`]: where finished trials are persisted
//! - [`Clock`]: wall time for tokens, seeds, and record timestamps
//!
//! Concurrency is bounded by the [`Dispatch`](tpmsync_dispatch::Dispatch)
//! implementation the orchestrator is built with. Live introspection goes
//! through the shared [`SessionRegistry`](tpmsync_registry::SessionRegistry).

mod clock;
mod config;
mod error;
mod orchestrator;
mod sink;

pub use clock::{
    unix_millis, unix_nanos, Clock, FallbackClock, SntpClock, SystemClock, TimeSource,
    DEFAULT_NTP_SERVER,
};
pub use config::{BaseSettings, Combination, NonOverlappedSettings, OverlappedSettings, SimulationSettings};
pub use error::{ClockError, ConfigError, OrchestratorError, SinkError};
pub use orchestrator::{trial_seed, OnDemandRequest, Orchestrator, OrchestratorConfig, SweepReport};
pub use sink::{host_name, JsonLinesSink, MemorySink, NullSink, ResultRecord, ResultSink};
