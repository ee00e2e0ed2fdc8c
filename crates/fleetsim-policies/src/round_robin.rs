//! Round-robin routing.
//!
//! Known limitation: this policy currently always selects accelerator 0.
//! A real cycling implementation would perturb every recorded baseline, so
//! the behavior is kept until those are regenerated.

use crate::traits::{GpuSnapshot, RoutingPolicy};
use rand::RngCore;

/// Round-robin router (placeholder: always accelerator 0).
pub struct RoundRobin;

impl RoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingPolicy for RoundRobin {
    fn pick(&mut self, _gpus: &[GpuSnapshot], _rng: &mut dyn RngCore) -> usize {
        0
    }

    fn name(&self) -> &str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::test_support::make_gpus;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_placeholder_picks_zero() {
        let mut policy = RoundRobin::new();
        let gpus = make_gpus(4);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for _ in 0..8 {
            assert_eq!(policy.pick(&gpus, &mut rng), 0);
        }
    }
}
