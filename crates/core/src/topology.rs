//! Connectivity topologies.
//!
//! A topology decides two things: how many inputs each layer has, and how one
//! layer's output vector becomes the next layer's per-neuron stimulus.
//!
//! ```text
//! FullyConnected      PartiallyConnected     NoOverlap (width 2)
//! o o o  (outputs)    o o o o  (outputs)     o o o o  (outputs)
//! |X|X|               \|/\|/\|/              \| \|
//! n n    (neurons)     n  n  n  (windows)     n  n    (partitions)
//! ```

use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tpmsync_types::Matrix;

/// Per-layer structure resolved from user parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    /// Neurons per layer.
    pub k: Vec<usize>,
    /// Inputs per neuron, per layer.
    pub n: Vec<usize>,
}

/// The three supported connectivity topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topology {
    /// Every neuron sees the whole previous output vector.
    FullyConnected,
    /// Neuron `i` sees a sliding window starting at `i`.
    PartiallyConnected,
    /// Neuron `i` sees its own disjoint partition of the previous outputs.
    NoOverlap,
}

impl Topology {
    pub const ALL: [Topology; 3] = [
        Topology::FullyConnected,
        Topology::PartiallyConnected,
        Topology::NoOverlap,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Topology::FullyConnected => "FULLY_CONNECTED",
            Topology::PartiallyConnected => "PARTIALLY_CONNECTED",
            Topology::NoOverlap => "NO_OVERLAP",
        }
    }

    /// Whether the caller's layer sequence is an input-count sequence (and the
    /// scalar the last layer's neuron count) rather than neuron counts.
    pub fn takes_input_counts(&self) -> bool {
        matches!(self, Topology::NoOverlap)
    }

    /// Resolve the `(K, N)` structure.
    ///
    /// For `FullyConnected` and `PartiallyConnected`, `layers` is `K` and
    /// `scalar` is `N[0]`. For `NoOverlap`, `layers` is `N` and `scalar` is the
    /// last layer's neuron count; the returned structure already has the two
    /// sequences in their proper places.
    pub fn resolve(&self, layers: &[usize], scalar: usize) -> Result<Structure, SettingsError> {
        if layers.is_empty() {
            return Err(SettingsError::InfeasibleStructure(
                "at least one layer is required".to_string(),
            ));
        }
        if layers.contains(&0) || scalar == 0 {
            return Err(SettingsError::InfeasibleStructure(format!(
                "layer sizes must be positive: {layers:?}, {scalar}"
            )));
        }

        match self {
            Topology::FullyConnected => {
                let mut n = Vec::with_capacity(layers.len());
                n.push(scalar);
                n.extend(layers.iter().take(layers.len() - 1).copied());
                Ok(Structure {
                    k: layers.to_vec(),
                    n,
                })
            }
            Topology::PartiallyConnected => {
                let mut n = Vec::with_capacity(layers.len());
                n.push(scalar);
                for pair in layers.windows(2) {
                    let (prev, cur) = (pair[0], pair[1]);
                    if cur >= prev {
                        return Err(SettingsError::InfeasibleStructure(format!(
                            "neuron counts must strictly decrease: {layers:?}"
                        )));
                    }
                    n.push(prev - cur + 1);
                }
                Ok(Structure {
                    k: layers.to_vec(),
                    n,
                })
            }
            Topology::NoOverlap => {
                if scalar < 2 {
                    return Err(SettingsError::InfeasibleStructure(format!(
                        "last layer needs at least 2 neurons, got {scalar}"
                    )));
                }
                let h = layers.len();
                let mut k = vec![0usize; h];
                k[h - 1] = scalar;
                for layer in (1..h).rev() {
                    k[layer - 1] = layers[layer].checked_mul(k[layer]).ok_or_else(|| {
                        SettingsError::InfeasibleStructure(format!(
                            "layer {layer} neuron count overflows"
                        ))
                    })?;
                }
                Ok(Structure {
                    k,
                    n: layers.to_vec(),
                })
            }
        }
    }

    /// Build the `k_next × n_next` stimulus for the next layer from the
    /// previous layer's outputs.
    pub fn derive_stimulus(&self, outputs: &[i32], k_next: usize, n_next: usize) -> Matrix {
        match self {
            Topology::FullyConnected => Matrix::from_fn(k_next, n_next, |_, j| outputs[j]),
            Topology::PartiallyConnected => {
                Matrix::from_fn(k_next, n_next, |i, j| outputs[i + j])
            }
            Topology::NoOverlap => Matrix::from_fn(k_next, n_next, |i, j| outputs[i * n_next + j]),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Topology {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "FULLYCONNECTED" => Ok(Topology::FullyConnected),
            "PARTIALLYCONNECTED" => Ok(Topology::PartiallyConnected),
            "NOOVERLAP" => Ok(Topology::NoOverlap),
            _ => Err(SettingsError::InvalidTopology(s.to_string())),
        }
    }
}

/// Uppercase and strip `_`/`-` so `no-overlap`, `NO_OVERLAP` and `NoOverlap` agree.
pub(crate) fn normalize(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_uppercase)
        .collect()
}
