//! Learning rules applied after an iteration in which both sides agree.

use crate::error::SettingsError;
use crate::math::{clamp, heaviside};
use crate::topology::normalize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tpmsync_types::Matrix;

/// The three supported weight update rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearnRule {
    Hebbian,
    AntiHebbian,
    RandomWalk,
}

impl LearnRule {
    pub const ALL: [LearnRule; 3] = [
        LearnRule::Hebbian,
        LearnRule::AntiHebbian,
        LearnRule::RandomWalk,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LearnRule::Hebbian => "HEBBIAN",
            LearnRule::AntiHebbian => "ANTI_HEBBIAN",
            LearnRule::RandomWalk => "RANDOM_WALK",
        }
    }

    /// Update one layer's weights in place.
    ///
    /// A neuron only moves when its own output agrees with this side's final
    /// output and both sides' final outputs agree:
    /// `gate = Θ(outputs[i]·own) · Θ(own·other)`. Every result is clamped to
    /// `[-l, l]`.
    pub fn learn_layer(
        &self,
        weights: &mut Matrix,
        stimulus: &Matrix,
        outputs: &[i32],
        own: i32,
        other: i32,
        l: i32,
    ) {
        let agree = heaviside(own * other);
        for (i, &output) in outputs.iter().enumerate().take(weights.rows()) {
            let gate = heaviside(output * own) * agree;
            if gate == 0 {
                continue;
            }
            let x = stimulus.row(i);
            for (w, &x) in weights.row_mut(i).iter_mut().zip(x) {
                let updated = match self {
                    LearnRule::Hebbian => *w + x * own,
                    LearnRule::AntiHebbian => *w - x * own,
                    LearnRule::RandomWalk => *w + x,
                };
                *w = clamp(updated, l);
            }
        }
    }
}

impl fmt::Display for LearnRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LearnRule {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "HEBBIAN" => Ok(LearnRule::Hebbian),
            "ANTIHEBBIAN" => Ok(LearnRule::AntiHebbian),
            "RANDOMWALK" => Ok(LearnRule::RandomWalk),
            _ => Err(SettingsError::InvalidRule(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer() -> (Matrix, Matrix) {
        let w = Matrix::from_rows(vec![vec![0, 1], vec![2, -2]]).unwrap();
        let x = Matrix::from_rows(vec![vec![1, -1], vec![1, 1]]).unwrap();
        (w, x)
    }

    #[test]
    fn test_parse_rule_names() {
        assert_eq!("hebbian".parse::<LearnRule>().unwrap(), LearnRule::Hebbian);
        assert_eq!(
            "ANTI-HEBBIAN".parse::<LearnRule>().unwrap(),
            LearnRule::AntiHebbian
        );
        assert_eq!(
            "random_walk".parse::<LearnRule>().unwrap(),
            LearnRule::RandomWalk
        );
        assert!(matches!(
            "oja".parse::<LearnRule>(),
            Err(SettingsError::InvalidRule(_))
        ));
    }

    #[test]
    fn test_hebbian_moves_agreeing_neurons_toward_output() {
        let (mut w, x) = layer();
        // Neuron 0 agrees with tau = -1, neuron 1 does not.
        LearnRule::Hebbian.learn_layer(&mut w, &x, &[-1, 1], -1, -1, 3);
        assert_eq!(w.row(0), &[-1, 2]);
        assert_eq!(w.row(1), &[2, -2]);
    }

    #[test]
    fn test_anti_hebbian_moves_away() {
        let (mut w, x) = layer();
        LearnRule::AntiHebbian.learn_layer(&mut w, &x, &[-1, 1], -1, -1, 3);
        assert_eq!(w.row(0), &[1, 0]);
        assert_eq!(w.row(1), &[2, -2]);
    }

    #[test]
    fn test_random_walk_ignores_output_sign() {
        let (mut w, x) = layer();
        LearnRule::RandomWalk.learn_layer(&mut w, &x, &[-1, 1], -1, -1, 3);
        assert_eq!(w.row(0), &[1, 0]);
        assert_eq!(w.row(1), &[2, -2]);
    }

    #[test]
    fn test_disagreeing_sides_never_learn() {
        for rule in LearnRule::ALL {
            let (mut w, x) = layer();
            let before = w.clone();
            rule.learn_layer(&mut w, &x, &[1, 1], 1, -1, 3);
            assert_eq!(w, before, "{rule} changed weights");
        }
    }

    #[test]
    fn test_updates_are_clamped() {
        let mut w = Matrix::from_rows(vec![vec![2, -2]]).unwrap();
        let x = Matrix::from_rows(vec![vec![1, -1]]).unwrap();
        LearnRule::Hebbian.learn_layer(&mut w, &x, &[1], 1, 1, 2);
        assert_eq!(w.row(0), &[2, -2]);
    }
}
