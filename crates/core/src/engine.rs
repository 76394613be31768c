//! The synchronization state machine.
//!
//! One [`SyncEngine::run`] call is one trial:
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            ▼                                              │
//! init ─► weights equal? ──yes──► FINISHED                  │
//!            │ no                                           │
//!            ▼                                              │
//!         over budget? ──yes──► LIMIT_REACHED               │
//!            │ no                                           │
//!            ▼                                              │
//!         stimulate A, B ─► τA == τB ? learn A, B ─► redraw ┘
//! ```
//!
//! The loop is synchronous and deterministic: every random draw comes from a
//! generator seeded with the caller's seed.

use crate::math::{stimulate_layer, tau};
use crate::random::{random_stimulus, random_weights, trial_rng};
use crate::settings::TpmSettings;
use crate::traits::TrialObserver;
use std::sync::Arc;
use tpmsync_types::{
    Matrix, SessionResult, SessionStatus, SnapshotKind, StateSnapshot, StimulusTensor, TensorPair,
    WeightTensor,
};
use tracing::{debug, trace};

/// Tunables for one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Iteration cap; `0` means uncapped.
    pub max_iterations: u64,
    /// Iterations to run before the first live snapshot.
    pub publish_settle: u64,
    /// Iterations between live snapshots; `0` disables intermediate snapshots.
    pub publish_every: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 0,
            publish_settle: 10,
            publish_every: 100,
        }
    }
}

impl EngineConfig {
    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    fn should_publish(&self, total_iterations: u64) -> bool {
        self.publish_every != 0
            && total_iterations >= self.publish_settle
            && (total_iterations - self.publish_settle) % self.publish_every == 0
    }
}

/// Working state for one side of a trial.
struct Side {
    weights: WeightTensor,
    /// Stimuli for layers `1..H`; layer 0 reads the shared stimulus.
    derived: Vec<Matrix>,
    outputs: Vec<Vec<i32>>,
}

impl Side {
    fn new(weights: WeightTensor, settings: &TpmSettings) -> Self {
        let derived = (1..settings.h())
            .map(|layer| Matrix::zeros(settings.k()[layer], settings.n()[layer]))
            .collect();
        Self {
            weights,
            derived,
            outputs: vec![Vec::new(); settings.h()],
        }
    }

    fn layer_stimulus<'a>(&'a self, shared: &'a StimulusTensor, layer: usize) -> &'a Matrix {
        if layer == 0 {
            shared
        } else {
            &self.derived[layer - 1]
        }
    }

    /// Forward pass; returns this side's final output τ.
    fn stimulate(&mut self, settings: &TpmSettings, shared: &StimulusTensor) -> i32 {
        let h = settings.h();
        for layer in 0..h {
            let outputs = stimulate_layer(
                self.weights.layer(layer),
                self.layer_stimulus(shared, layer),
            );
            if layer + 1 < h {
                self.derived[layer] = settings.topology().derive_stimulus(
                    &outputs,
                    settings.k()[layer + 1],
                    settings.n()[layer + 1],
                );
            }
            self.outputs[layer] = outputs;
        }
        tau(&self.outputs[h - 1])
    }

    fn learn(&mut self, settings: &TpmSettings, shared: &StimulusTensor, own: i32, other: i32) {
        let rule = settings.learn_rule();
        for layer in 0..settings.h() {
            let stimulus = if layer == 0 {
                shared
            } else {
                &self.derived[layer - 1]
            };
            rule.learn_layer(
                self.weights.layer_mut(layer),
                stimulus,
                &self.outputs[layer],
                own,
                other,
                settings.l(),
            );
        }
    }
}

/// Runs synchronization trials for one settings value.
///
/// Cheap to clone; settings are shared.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    settings: Arc<TpmSettings>,
    config: EngineConfig,
}

impl SyncEngine {
    pub fn new(settings: Arc<TpmSettings>, config: EngineConfig) -> Self {
        Self { settings, config }
    }

    pub fn settings(&self) -> &Arc<TpmSettings> {
        &self.settings
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one trial to a terminal status.
    ///
    /// Identical `(settings, seed)` always yields an identical result.
    pub fn run(&self, seed: u64, observer: Option<&dyn TrialObserver>) -> SessionResult {
        let settings = &*self.settings;
        let mut rng = trial_rng(seed);

        // A's layer then B's layer, per layer.
        let (layers_a, layers_b): (Vec<_>, Vec<_>) = (0..settings.h())
            .map(|layer| {
                let (k, n) = (settings.k()[layer], settings.n()[layer]);
                let a = random_weights(k, n, settings.l(), &mut rng);
                let b = random_weights(k, n, settings.l(), &mut rng);
                (a, b)
            })
            .unzip();
        let mut a = Side::new(WeightTensor::new(layers_a), settings);
        let mut b = Side::new(WeightTensor::new(layers_b), settings);
        let initial_weights = TensorPair {
            a: a.weights.clone(),
            b: b.weights.clone(),
        };

        let (k0, n0, m) = (settings.k()[0], settings.n()[0], settings.m());
        let mut stimulus = random_stimulus(k0, n0, m, &mut rng);

        let mut total_iterations = 0u64;
        let mut learn_iterations = 0u64;
        let mut last_outputs = None;

        let status = loop {
            if a.weights.same_weights(&b.weights) {
                break SessionStatus::Finished;
            }
            if self.config.max_iterations != 0 && total_iterations > self.config.max_iterations {
                break SessionStatus::LimitReached;
            }

            let tau_a = a.stimulate(settings, &stimulus);
            let tau_b = b.stimulate(settings, &stimulus);
            total_iterations += 1;

            if tau_a == tau_b {
                a.learn(settings, &stimulus, tau_a, tau_b);
                b.learn(settings, &stimulus, tau_b, tau_a);
                learn_iterations += 1;
            }
            last_outputs = Some((tau_a, tau_b));

            if let Some(observer) = observer {
                if self.config.should_publish(total_iterations) && observer.is_armed() {
                    trace!(seed, total_iterations, "Publishing trial snapshot");
                    observer.publish(StateSnapshot {
                        kind: SnapshotKind::Stimulate,
                        seed,
                        total_iterations,
                        learn_iterations,
                        outputs: last_outputs,
                        weights: TensorPair {
                            a: a.weights.clone(),
                            b: b.weights.clone(),
                        },
                        status: None,
                    });
                }
            }

            stimulus = random_stimulus(k0, n0, m, &mut rng);
        };

        let final_weights = TensorPair {
            a: a.weights,
            b: b.weights,
        };

        if let Some(observer) = observer {
            if observer.is_armed() {
                observer.publish(StateSnapshot {
                    kind: SnapshotKind::Finished,
                    seed,
                    total_iterations,
                    learn_iterations,
                    outputs: last_outputs,
                    weights: final_weights.clone(),
                    status: Some(status),
                });
            }
        }

        debug!(
            seed,
            %status,
            total_iterations,
            learn_iterations,
            "Trial finished"
        );

        SessionResult {
            seed,
            total_iterations,
            learn_iterations,
            initial_weights,
            final_weights,
            status,
        }
    }
}
