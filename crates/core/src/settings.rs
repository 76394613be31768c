//! Immutable per-trial settings and the factory that validates them.

use crate::error::SettingsError;
use crate::learn::LearnRule;
use crate::topology::Topology;
use serde::Serialize;

/// Structural and learning parameters shared read-only by both sides of a
/// trial.
///
/// Invariant: `k.len() == n.len() >= 1`, every entry positive, `l > 0`,
/// `m > 0`. Only constructible through [`TpmSettings::new`] or
/// [`TpmSettings::build`], which enforce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TpmSettings {
    k: Vec<usize>,
    n: Vec<usize>,
    l: i32,
    m: i32,
    topology: Topology,
    learn_rule: LearnRule,
}

impl TpmSettings {
    /// Build settings from typed topology and rule.
    ///
    /// `layers`/`scalar` are interpreted per [`Topology::resolve`].
    pub fn new(
        layers: &[usize],
        scalar: usize,
        l: i32,
        m: i32,
        topology: Topology,
        learn_rule: LearnRule,
    ) -> Result<Self, SettingsError> {
        if l <= 0 || m <= 0 {
            return Err(SettingsError::InvalidBounds(format!(
                "L and M must be positive, got L={l}, M={m}"
            )));
        }
        let structure = topology.resolve(layers, scalar)?;
        Ok(Self {
            k: structure.k,
            n: structure.n,
            l,
            m,
            topology,
            learn_rule,
        })
    }

    /// Build settings from topology and rule names (case-insensitive).
    pub fn build(
        layers: &[usize],
        scalar: usize,
        l: i32,
        m: i32,
        topology: &str,
        learn_rule: &str,
    ) -> Result<Self, SettingsError> {
        let topology: Topology = topology.parse()?;
        let learn_rule: LearnRule = learn_rule.parse()?;
        Self::new(layers, scalar, l, m, topology, learn_rule)
    }

    /// Neurons per layer.
    pub fn k(&self) -> &[usize] {
        &self.k
    }

    /// Inputs per neuron, per layer.
    pub fn n(&self) -> &[usize] {
        &self.n
    }

    /// Weight magnitude bound.
    pub fn l(&self) -> i32 {
        self.l
    }

    /// Stimulus magnitude bound.
    pub fn m(&self) -> i32 {
        self.m
    }

    /// Number of layers.
    pub fn h(&self) -> usize {
        self.k.len()
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn learn_rule(&self) -> LearnRule {
        self.learn_rule
    }

    /// Number of weights held by one side (Σ K[l]·N[l]).
    pub fn data_size(&self) -> usize {
        self.k.iter().zip(&self.n).map(|(k, n)| k * n).sum()
    }

    /// Stable textual identity of these settings, used for token derivation.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|K={:?}|N={:?}|L={}|M={}",
            self.topology, self.learn_rule, self.k, self.n, self.l, self.m
        )
    }
}
