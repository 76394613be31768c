//! Simulation settings document.
//!
//! One document describes one topology family and the value lists a sweep
//! takes the Cartesian product of. The `tpm_type` field selects the family:
//!
//! ```toml
//! tpm_type = "FULLY_CONNECTED"
//! max_session_count = 10
//! max_iterations = 100000
//! max_worker_count = 8
//! learn_rules = ["HEBBIAN", "ANTI_HEBBIAN"]
//! l_configs = [2, 3]
//! m_configs = [1]
//! k_configs = [[3], [5, 3]]
//! n0_configs = [4]
//! ```
//!
//! `NO_OVERLAP` documents replace `k_configs`/`n0_configs` with `n_configs`
//! (input-count sequences) and `klast_configs`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use tpmsync_core::Topology;

/// Fields shared by every family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseSettings {
    /// Trials per settings value.
    #[serde(default = "default_max_session_count")]
    pub max_session_count: u64,

    /// Iteration cap per trial; `0` means uncapped.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,

    /// Concurrent trial groups.
    #[serde(default = "default_max_worker_count")]
    pub max_worker_count: usize,

    pub learn_rules: Vec<String>,
    pub l_configs: Vec<i32>,
    pub m_configs: Vec<i32>,
}

fn default_max_session_count() -> u64 {
    1
}

fn default_max_iterations() -> u64 {
    1_000_000
}

fn default_max_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

/// Families addressed by neuron counts plus the first layer's input count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlappedSettings {
    #[serde(flatten)]
    pub base: BaseSettings,
    pub k_configs: Vec<Vec<usize>>,
    pub n0_configs: Vec<usize>,
}

/// The disjoint-partition family, addressed by input counts plus the last
/// layer's neuron count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonOverlappedSettings {
    #[serde(flatten)]
    pub base: BaseSettings,
    pub n_configs: Vec<Vec<usize>>,
    pub klast_configs: Vec<usize>,
}

/// A full sweep description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tpm_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationSettings {
    FullyConnected(OverlappedSettings),
    PartiallyConnected(OverlappedSettings),
    NoOverlap(NonOverlappedSettings),
}

/// One point of the sweep, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    pub learn_rule: String,
    /// `K` for overlapped families, `N` for `NO_OVERLAP`.
    pub layers: Vec<usize>,
    pub l: i32,
    /// `N[0]` for overlapped families, `K[last]` for `NO_OVERLAP`.
    pub scalar: usize,
    pub m: i32,
}

impl SimulationSettings {
    /// Load from a `.toml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&contents)?,
            _ => Self::from_json_str(&contents)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn topology(&self) -> Topology {
        match self {
            SimulationSettings::FullyConnected(_) => Topology::FullyConnected,
            SimulationSettings::PartiallyConnected(_) => Topology::PartiallyConnected,
            SimulationSettings::NoOverlap(_) => Topology::NoOverlap,
        }
    }

    pub fn base(&self) -> &BaseSettings {
        match self {
            SimulationSettings::FullyConnected(s) | SimulationSettings::PartiallyConnected(s) => {
                &s.base
            }
            SimulationSettings::NoOverlap(s) => &s.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BaseSettings {
        match self {
            SimulationSettings::FullyConnected(s) | SimulationSettings::PartiallyConnected(s) => {
                &mut s.base
            }
            SimulationSettings::NoOverlap(s) => &mut s.base,
        }
    }

    /// The layer sequences and scalars this family sweeps over.
    fn structures(&self) -> (&[Vec<usize>], &[usize]) {
        match self {
            SimulationSettings::FullyConnected(s) | SimulationSettings::PartiallyConnected(s) => {
                (&s.k_configs, &s.n0_configs)
            }
            SimulationSettings::NoOverlap(s) => (&s.n_configs, &s.klast_configs),
        }
    }

    /// Reject documents that would sweep nothing or could never run.
    ///
    /// Individual infeasible combinations are not errors here; the sweep
    /// skips them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.base();
        if base.max_worker_count == 0 {
            return Err(ConfigError::Invalid(
                "max_worker_count must be at least 1".to_string(),
            ));
        }
        if base.max_session_count == 0 {
            return Err(ConfigError::Invalid(
                "max_session_count must be at least 1".to_string(),
            ));
        }
        let (layers, scalars) = self.structures();
        let empty = [
            ("learn_rules", base.learn_rules.is_empty()),
            ("l_configs", base.l_configs.is_empty()),
            ("m_configs", base.m_configs.is_empty()),
            ("layer configs", layers.is_empty()),
            ("scalar configs", scalars.is_empty()),
        ];
        if let Some((name, _)) = empty.iter().find(|(_, is_empty)| *is_empty) {
            return Err(ConfigError::Invalid(format!("{name} must not be empty")));
        }
        Ok(())
    }

    /// Every point of the sweep, in rule → layers → L → scalar → M order.
    pub fn combinations(&self) -> Vec<Combination> {
        let base = self.base();
        let (layer_configs, scalars) = self.structures();
        let mut out = Vec::with_capacity(
            base.learn_rules.len()
                * layer_configs.len()
                * base.l_configs.len()
                * scalars.len()
                * base.m_configs.len(),
        );
        for rule in &base.learn_rules {
            for layers in layer_configs {
                for &l in &base.l_configs {
                    for &scalar in scalars {
                        for &m in &base.m_configs {
                            out.push(Combination {
                                learn_rule: rule.clone(),
                                layers: layers.clone(),
                                l,
                                scalar,
                                m,
                            });
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const JSON: &str = r#"{
        "tpm_type": "PARTIALLY_CONNECTED",
        "max_session_count": 3,
        "max_iterations": 5000,
        "max_worker_count": 2,
        "learn_rules": ["HEBBIAN", "RANDOM_WALK"],
        "l_configs": [2, 4],
        "m_configs": [1],
        "k_configs": [[5, 3], [3]],
        "n0_configs": [2, 6]
    }"#;

    const TOML: &str = r#"
        tpm_type = "NO_OVERLAP"
        learn_rules = ["ANTI_HEBBIAN"]
        l_configs = [3]
        m_configs = [1, 2]
        n_configs = [[4, 2]]
        klast_configs = [2, 3]
    "#;

    #[test]
    fn test_parse_json_overlapped() {
        let s = SimulationSettings::from_json_str(JSON).unwrap();
        assert_eq!(s.topology(), Topology::PartiallyConnected);
        assert_eq!(s.base().max_session_count, 3);
        assert_eq!(s.base().max_worker_count, 2);
        s.validate().unwrap();
    }

    #[test]
    fn test_parse_toml_non_overlapped_with_defaults() {
        let s = SimulationSettings::from_toml_str(TOML).unwrap();
        assert_eq!(s.topology(), Topology::NoOverlap);
        assert_eq!(s.base().max_session_count, 1);
        assert_eq!(s.base().max_iterations, 1_000_000);
        assert!(s.base().max_worker_count >= 1);
        match &s {
            SimulationSettings::NoOverlap(no) => {
                assert_eq!(no.n_configs, vec![vec![4, 2]]);
                assert_eq!(no.klast_configs, vec![2, 3]);
            }
            other => panic!("wrong family: {other:?}"),
        }
    }

    #[test]
    fn test_combination_order_and_count() {
        let s = SimulationSettings::from_json_str(JSON).unwrap();
        let combos = s.combinations();
        assert_eq!(combos.len(), 2 * 2 * 2 * 2);
        assert_eq!(
            combos[0],
            Combination {
                learn_rule: "HEBBIAN".to_string(),
                layers: vec![5, 3],
                l: 2,
                scalar: 2,
                m: 1,
            }
        );
        // Scalar varies before L.
        assert_eq!(combos[1].scalar, 6);
        assert_eq!(combos[2].l, 4);
        assert_eq!(combos[8].learn_rule, "RANDOM_WALK");
    }

    #[test]
    fn test_unknown_family_rejected() {
        let json = JSON.replace("PARTIALLY_CONNECTED", "CONVOLUTIONAL");
        assert!(matches!(
            SimulationSettings::from_json_str(&json),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation() {
        let mut s = SimulationSettings::from_json_str(JSON).unwrap();
        s.base_mut().max_worker_count = 0;
        assert!(matches!(s.validate(), Err(ConfigError::Invalid(_))));

        let mut s = SimulationSettings::from_json_str(JSON).unwrap();
        s.base_mut().learn_rules.clear();
        assert!(matches!(s.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("sweep.json");
        std::fs::File::create(&json_path)
            .unwrap()
            .write_all(JSON.as_bytes())
            .unwrap();
        assert_eq!(
            SimulationSettings::load(&json_path).unwrap().topology(),
            Topology::PartiallyConnected
        );

        let toml_path = dir.path().join("sweep.toml");
        std::fs::write(&toml_path, TOML).unwrap();
        assert_eq!(
            SimulationSettings::load(&toml_path).unwrap().topology(),
            Topology::NoOverlap
        );

        assert!(matches!(
            SimulationSettings::load(&dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
