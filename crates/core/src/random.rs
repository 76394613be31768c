//! Random draws for weights and stimuli.
//!
//! Every draw for a trial comes from one caller-seeded generator, so a trial is
//! reproducible from `(settings, seed)`. Each entry draws its sign first and
//! its magnitude second.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tpmsync_types::{Matrix, StimulusTensor};

/// The generator used for every trial.
pub type TrialRng = ChaCha8Rng;

/// Create the trial generator for a seed.
pub fn trial_rng(seed: u64) -> TrialRng {
    ChaCha8Rng::seed_from_u64(seed)
}

#[inline]
fn random_sign<R: Rng>(rng: &mut R) -> i32 {
    rng.gen_range(0..2) * 2 - 1
}

/// A `k × n` weight matrix with entries uniform over `{-1,+1} × [0, l]`.
pub fn random_weights<R: Rng>(k: usize, n: usize, l: i32, rng: &mut R) -> Matrix {
    Matrix::from_fn(k, n, |_, _| {
        let sign = random_sign(rng);
        sign * rng.gen_range(0..=l)
    })
}

/// A `k × n` stimulus with entries uniform over `{-1,+1} × [1, m]`.
pub fn random_stimulus<R: Rng>(k: usize, n: usize, m: i32, rng: &mut R) -> StimulusTensor {
    Matrix::from_fn(k, n, |_, _| {
        let sign = random_sign(rng);
        sign * rng.gen_range(1..=m)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_within_bounds() {
        let mut rng = trial_rng(7);
        let w = random_weights(20, 20, 3, &mut rng);
        assert!(w.as_slice().iter().all(|v| v.abs() <= 3));
        // With 400 draws every value in [-3, 3] shows up.
        for v in -3..=3 {
            assert!(w.as_slice().contains(&v), "missing {v}");
        }
    }

    #[test]
    fn test_stimulus_never_zero() {
        let mut rng = trial_rng(7);
        let x = random_stimulus(10, 10, 2, &mut rng);
        assert!(x.as_slice().iter().all(|v| (1..=2).contains(&v.abs())));
    }

    #[test]
    fn test_same_seed_same_draws() {
        let a = random_weights(4, 4, 5, &mut trial_rng(99));
        let b = random_weights(4, 4, 5, &mut trial_rng(99));
        assert_eq!(a, b);
    }
}
