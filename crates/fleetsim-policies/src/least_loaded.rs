//! Least-loaded routing.
//!
//! Known limitation: this policy currently always selects accelerator 0.
//! A real implementation would scan load scores; it stays registered so
//! configurations naming it continue to run.

use crate::traits::{GpuSnapshot, RoutingPolicy};
use rand::RngCore;

/// Least-loaded router (placeholder: always accelerator 0).
pub struct LeastLoaded;

impl LeastLoaded {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastLoaded {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingPolicy for LeastLoaded {
    fn pick(&mut self, _gpus: &[GpuSnapshot], _rng: &mut dyn RngCore) -> usize {
        0
    }

    fn name(&self) -> &str {
        "least_loaded"
    }
}
