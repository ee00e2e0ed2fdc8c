//! Power-of-two-choices routing.
//!
//! Samples two distinct accelerators uniformly at random and routes to the
//! one with the lower load score. Sampling two candidates instead of one is
//! enough to avoid most of the tail load of purely random placement while
//! staying O(1) per decision.

use crate::traits::{GpuSnapshot, RoutingPolicy};
use rand::{Rng, RngCore};

/// Power-of-two-choices router.
pub struct PowerOfTwoChoices;

impl PowerOfTwoChoices {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PowerOfTwoChoices {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingPolicy for PowerOfTwoChoices {
    fn pick(&mut self, gpus: &[GpuSnapshot], rng: &mut dyn RngCore) -> usize {
        let n = gpus.len();
        if n == 1 {
            return 0;
        }

        let a = rng.gen_range(0..n);
        let b = if n == 2 {
            1 - a
        } else {
            // Resample until distinct.
            loop {
                let candidate = rng.gen_range(0..n);
                if candidate != a {
                    break candidate;
                }
            }
        };

        let load_a = gpus[a].load_score();
        let load_b = gpus[b].load_score();
        if load_a < load_b {
            a
        } else if load_b < load_a {
            b
        } else if rng.gen_bool(0.5) {
            a
        } else {
            b
        }
    }

    fn name(&self) -> &str {
        "power_of_two_choices"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::test_support::make_gpus;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_single_gpu_always_zero() {
        let mut policy = PowerOfTwoChoices::new();
        let gpus = make_gpus(1);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..10 {
            assert_eq!(policy.pick(&gpus, &mut rng), 0);
        }
    }

    #[test]
    fn test_prefers_less_loaded_of_pair() {
        // With two accelerators both candidates are always sampled, so the
        // less loaded one must win every time.
        let mut policy = PowerOfTwoChoices::new();
        let mut gpus = make_gpus(2);
        gpus[0].queue_depth = 10;
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            assert_eq!(policy.pick(&gpus, &mut rng), 1);
        }
    }

    #[test]
    fn test_avoids_hot_spot_among_many() {
        let mut policy = PowerOfTwoChoices::new();
        let mut gpus = make_gpus(4);
        gpus[2].active_decode = 100;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..200 {
            assert_ne!(policy.pick(&gpus, &mut rng), 2);
        }
    }

    #[test]
    fn test_deterministic_for_seed() {
        let gpus = make_gpus(8);
        let run = |seed: u64| {
            let mut policy = PowerOfTwoChoices::new();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..100)
                .map(|_| policy.pick(&gpus, &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(3), run(3));
        assert_ne!(run(3), run(4));
    }
}
