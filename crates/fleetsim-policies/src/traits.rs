//! Routing policy trait definitions.
//!
//! Every arrival-time routing policy implements [`RoutingPolicy`], which
//! receives read-only accelerator snapshots and the engine's RNG and returns
//! the index of the accelerator to try first.

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Read-only snapshot of an accelerator's load, provided to routing policies.
///
/// This is the policies crate's view of an accelerator — only the fields
/// needed for placement decisions, not the full simulation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSnapshot {
    pub id: usize,
    /// Requests currently in the prefill phase (including pre-claimed slots).
    pub active_prefill: u32,
    /// Requests currently in the decode phase.
    pub active_decode: u32,
    /// Requests waiting in the accelerator's prefill queue.
    pub queue_depth: usize,
}

impl GpuSnapshot {
    /// Load score: in-flight work plus queued work.
    pub fn load_score(&self) -> u64 {
        self.active_prefill as u64 + self.active_decode as u64 + self.queue_depth as u64
    }
}

/// The arrival-time routing policy trait.
///
/// The engine calls [`RoutingPolicy::pick`] once per arrival, before the
/// admission checks. The RNG is the engine's seeded generator; policies must
/// draw from it (and nothing else) so that runs stay reproducible.
pub trait RoutingPolicy: Send {
    /// Choose the primary accelerator for a new arrival.
    ///
    /// `gpus` is never empty.
    fn pick(&mut self, gpus: &[GpuSnapshot], rng: &mut dyn RngCore) -> usize;

    /// Name for configuration and reports.
    fn name(&self) -> &str;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::GpuSnapshot;

    /// Helper to create N idle snapshots.
    pub fn make_gpus(n: usize) -> Vec<GpuSnapshot> {
        (0..n)
            .map(|id| GpuSnapshot {
                id,
                active_prefill: 0,
                active_decode: 0,
                queue_depth: 0,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_score_sums_components() {
        let snap = GpuSnapshot {
            id: 0,
            active_prefill: 2,
            active_decode: 3,
            queue_depth: 4,
        };
        assert_eq!(snap.load_score(), 9);
    }
}
