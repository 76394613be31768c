//! Sweep and on-demand scheduling of trial groups.
//!
//! ```text
//!  SimulationSettings ──► combinations ──► TpmSettings::build ──┬─► skipped
//!                                                               │
//!                                                               ▼
//!                                          Dispatch::spawn_trial_group
//!                                                               │
//!                     ┌─────────────────────────────────────────┘
//!                     ▼
//!   register ─► repeat { SyncEngine::run ─► ResultSink ─► record_repetition } ─► remove
//! ```

use crate::clock::{unix_nanos, Clock};
use crate::config::SimulationSettings;
use crate::error::OrchestratorError;
use crate::sink::ResultSink;
use crossbeam::channel::{self, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tpmsync_core::{EngineConfig, LearnRule, SyncEngine, Topology, TpmSettings};
use tpmsync_dispatch::Dispatch;
use tpmsync_registry::{SessionChannel, SessionRegistry};
use tpmsync_types::Token;
use tracing::{debug, info, instrument, warn};

/// Orchestrator tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Iterations before a trial's first live snapshot.
    pub publish_settle: u64,
    /// Iterations between live snapshots.
    pub publish_every: u64,
    /// On-demand submissions are refused once this many groups are queued.
    pub max_queued_on_demand: usize,
    /// How often a waiting sweep refreshes pool gauges.
    pub progress_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            publish_settle: 10,
            publish_every: 100,
            max_queued_on_demand: 1024,
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Settings values handed to the pool.
    pub submitted: usize,
    /// Combinations rejected before running.
    pub skipped: usize,
    /// Groups that ran to the end.
    pub completed: usize,
}

/// A single ad-hoc trial group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnDemandRequest {
    pub topology: Topology,
    pub learn_rule: String,
    /// `K` for overlapped topologies, `N` for `NO_OVERLAP`.
    pub layers: Vec<usize>,
    /// `N[0]` for overlapped topologies, `K[last]` for `NO_OVERLAP`.
    pub scalar: usize,
    pub l: i32,
    pub m: i32,
    pub max_session_count: u64,
    pub max_iterations: u64,
}

impl OnDemandRequest {
    /// A fully or partially connected machine given its neuron counts.
    pub fn overlapped(
        topology: Topology,
        learn_rule: impl Into<String>,
        k: Vec<usize>,
        n0: usize,
        l: i32,
        m: i32,
    ) -> Self {
        Self {
            topology,
            learn_rule: learn_rule.into(),
            layers: k,
            scalar: n0,
            l,
            m,
            max_session_count: 1,
            max_iterations: 0,
        }
    }

    /// A disjoint-partition machine given its input counts.
    pub fn non_overlapped(
        learn_rule: impl Into<String>,
        n: Vec<usize>,
        k_last: usize,
        l: i32,
        m: i32,
    ) -> Self {
        Self {
            topology: Topology::NoOverlap,
            learn_rule: learn_rule.into(),
            layers: n,
            scalar: k_last,
            l,
            m,
            max_session_count: 1,
            max_iterations: 0,
        }
    }

    pub fn with_repetitions(mut self, max_session_count: u64) -> Self {
        self.max_session_count = max_session_count;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Handles every trial group needs, cloned into each task.
#[derive(Clone)]
struct GroupContext {
    registry: SessionRegistry,
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    sequence: Arc<AtomicU64>,
}

/// Removes the session when the group ends, even by panic.
struct SessionGuard {
    registry: SessionRegistry,
    token: Token,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.token);
    }
}

/// Seed for one repetition: the start timestamp, spread by the group's
/// sequence number and the repetition index.
///
/// Both multipliers are odd, so for a fixed timestamp distinct sequence
/// numbers (or distinct repetitions) always give distinct seeds.
pub fn trial_seed(start: SystemTime, sequence: u64, repetition: u64) -> u64 {
    unix_nanos(start)
        ^ repetition.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ sequence.wrapping_mul(0xBF58_476D_1CE4_E5B9).rotate_left(32)
}

/// A registered group, ready to run.
struct OpenGroup {
    token: Token,
    sequence: u64,
    publisher: Arc<SessionChannel>,
}

impl GroupContext {
    fn open(
        &self,
        settings: &Arc<TpmSettings>,
        repetitions: u64,
    ) -> Result<OpenGroup, OrchestratorError> {
        let start = self.clock.now();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let fingerprint = settings.fingerprint();
        let nanos = unix_nanos(start).to_le_bytes();
        let sequence_bytes = sequence.to_le_bytes();
        let token = Token::from_parts(&[
            fingerprint.as_bytes(),
            nanos.as_slice(),
            sequence_bytes.as_slice(),
        ]);
        let publisher =
            self.registry
                .register(token, Arc::clone(settings), start, repetitions)?;
        Ok(OpenGroup {
            token,
            sequence,
            publisher,
        })
    }

    /// Run every repetition of an already registered group, then close it.
    fn run_group(
        &self,
        group: OpenGroup,
        settings: Arc<TpmSettings>,
        repetitions: u64,
        max_iterations: u64,
    ) {
        let OpenGroup {
            token,
            sequence,
            publisher,
        } = group;
        let _session = SessionGuard {
            registry: self.registry.clone(),
            token,
        };
        let engine = SyncEngine::new(
            Arc::clone(&settings),
            EngineConfig {
                max_iterations,
                publish_settle: self.config.publish_settle,
                publish_every: self.config.publish_every,
            },
        );
        let rule = settings.learn_rule().name();

        for repetition in 0..repetitions {
            let start = self.clock.now();
            let seed = trial_seed(start, sequence, repetition);
            let started = Instant::now();
            let result = engine.run(seed, Some(&*publisher));
            let end = self.clock.now();

            tpmsync_metrics::record_trial_completed(
                rule,
                result.status.as_str(),
                result.total_iterations,
                started.elapsed().as_secs_f64(),
            );
            debug!(
                token = %token,
                repetition,
                seed,
                status = %result.status,
                total_iterations = result.total_iterations,
                "Trial recorded"
            );

            if let Err(e) = self.sink.record(&settings, &result, start, end) {
                warn!(token = %token, seed, error = %e, "Failed to persist trial result");
                tpmsync_metrics::record_sink_failure();
            }
            if let Err(e) = self.registry.record_repetition(&token) {
                warn!(token = %token, error = %e, "Session vanished mid-group");
            }
        }

        info!(token = %token, repetitions, "Trial group finished");
    }
}

/// Schedules trial groups onto a [`Dispatch`] and tracks them in a
/// [`SessionRegistry`].
pub struct Orchestrator<D: Dispatch> {
    dispatch: D,
    ctx: GroupContext,
}

impl<D: Dispatch> Orchestrator<D> {
    pub fn new(
        dispatch: D,
        registry: SessionRegistry,
        sink: Arc<dyn ResultSink>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            dispatch,
            ctx: GroupContext {
                registry,
                sink,
                clock,
                config,
                sequence: Arc::new(AtomicU64::new(0)),
            },
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.ctx.registry
    }

    pub fn dispatch(&self) -> &D {
        &self.dispatch
    }

    /// Run every feasible combination of a settings document and wait for
    /// all of them.
    ///
    /// Infeasible combinations are skipped. Groups register themselves once
    /// a worker picks them up, so queued groups are not listed as open.
    #[instrument(level = "debug", skip_all, fields(topology = %simulation.topology()))]
    pub fn run_sweep(
        &self,
        simulation: &SimulationSettings,
    ) -> Result<SweepReport, OrchestratorError> {
        simulation.validate()?;
        let topology = simulation.topology();
        let base = simulation.base();
        let mut report = SweepReport::default();
        let (done_tx, done_rx) = channel::unbounded::<()>();

        for combo in simulation.combinations() {
            let settings = match TpmSettings::build(
                &combo.layers,
                combo.scalar,
                combo.l,
                combo.m,
                topology.name(),
                &combo.learn_rule,
            ) {
                Ok(settings) => Arc::new(settings),
                Err(e) => {
                    debug!(
                        layers = ?combo.layers,
                        scalar = combo.scalar,
                        l = combo.l,
                        m = combo.m,
                        learn_rule = %combo.learn_rule,
                        error = %e,
                        "Skipping combination"
                    );
                    tpmsync_metrics::record_settings_skipped();
                    report.skipped += 1;
                    continue;
                }
            };

            let ctx = self.ctx.clone();
            let done = done_tx.clone();
            let repetitions = base.max_session_count;
            let max_iterations = base.max_iterations;
            self.dispatch.spawn_trial_group(move || {
                match ctx.open(&settings, repetitions) {
                    Ok(group) => {
                        ctx.run_group(group, settings, repetitions, max_iterations);
                        let _ = done.send(());
                    }
                    Err(e) => warn!(error = %e, "Failed to open session"),
                }
            });
            report.submitted += 1;
        }
        drop(done_tx);

        info!(
            submitted = report.submitted,
            skipped = report.skipped,
            "Sweep submitted"
        );

        loop {
            match done_rx.recv_timeout(self.ctx.config.progress_interval) {
                Ok(()) => report.completed += 1,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            tpmsync_metrics::set_pool_queue_depth(self.dispatch.queue_depth());
            tpmsync_metrics::set_active_workers(self.dispatch.active_workers());
        }

        if let Err(e) = self.ctx.sink.flush() {
            warn!(error = %e, "Failed to flush result sink");
        }
        info!(
            submitted = report.submitted,
            skipped = report.skipped,
            completed = report.completed,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Validate, register, and enqueue one trial group; returns at once.
    ///
    /// The token is listable as soon as this returns.
    pub fn submit_on_demand(&self, request: OnDemandRequest) -> Result<Token, OrchestratorError> {
        if request.max_session_count == 0 {
            return Err(OrchestratorError::InvalidRequest(
                "max_session_count must be at least 1".to_string(),
            ));
        }
        let learn_rule = request.learn_rule.parse::<LearnRule>()?;
        let settings = Arc::new(TpmSettings::new(
            &request.layers,
            request.scalar,
            request.l,
            request.m,
            request.topology,
            learn_rule,
        )?);

        let group = self.ctx.open(&settings, request.max_session_count)?;
        let token = group.token;
        let ctx = self.ctx.clone();
        let repetitions = request.max_session_count;
        let max_iterations = request.max_iterations;
        let accepted = self.dispatch.try_spawn_trial_group(
            self.ctx.config.max_queued_on_demand,
            move || ctx.run_group(group, settings, repetitions, max_iterations),
        );
        if !accepted {
            self.ctx.registry.remove(&token);
            return Err(OrchestratorError::Overloaded {
                queue_depth: self.dispatch.queue_depth(),
            });
        }

        info!(token = %token, "On-demand group submitted");
        Ok(token)
    }
}
