//! FleetSim — discrete-event simulator for multi-accelerator LLM inference
//! serving.
//!
//! The engine replays a trace of inference requests through admission,
//! queueing, prefill, optional cross-accelerator KV handoff, decode, and
//! completion, under a configurable policy bundle (scheduling, routing,
//! memory pressure, eviction, topology). Runs are deterministic given
//! (seed, trace, config).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐     ┌────────────┐     ┌──────────────┐
//! │  Trace   │────▶│   Engine   │────▶│   Metrics    │
//! │ Ingestion│     │  (Events)  │     │  & Reports   │
//! └──────────┘     └─────┬──────┘     └──────────────┘
//!                        │
//!                ┌───────┴────────┐
//!                │ Routing policy │
//!                └───────┬────────┘
//!                        │
//!          ┌─────────────┼─────────────┐
//!          ▼             ▼             ▼
//!    ┌──────────┐  ┌──────────┐  ┌──────────┐
//!    │  GPU 0   │  │  GPU 1   │  │  GPU N   │
//!    │ VRAM/LRU │◀─┤ handoffs ├─▶│  queues  │
//!    └──────────┘  └──────────┘  └──────────┘
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod gpu;
pub mod metrics;
pub mod output;
pub mod recency;
pub mod request;
pub mod topology;
pub mod trace;

// Re-export key types for convenience.
pub use clock::SimClock;
pub use config::{
    ConfigError, EvictionPolicy, MemoryPressurePolicy, SchedulingMode, SimConfig, SimPolicies,
};
pub use engine::Engine;
pub use gpu::{Gpu, GpuConfig};
pub use metrics::{EventKind, EventRecord, Summary, TimeseriesSample};
pub use request::{Request, RequestStatus};
pub use topology::{LinkSpec, Topology};
pub use trace::{load_trace, write_trace};

/// Everything a finished run produces.
#[derive(Debug, Clone)]
pub struct SimOutcome {
    pub summary: Summary,
    pub events: Vec<EventRecord>,
    pub samples: Vec<TimeseriesSample>,
}

/// Run a complete simulation with the given config and trace.
pub fn run_simulation(
    config: &SimConfig,
    requests: Vec<Request>,
) -> Result<SimOutcome, ConfigError> {
    let mut engine = Engine::from_config(config, requests)?;
    let summary = engine.run();
    Ok(SimOutcome {
        summary,
        events: engine.events().to_vec(),
        samples: engine.samples().to_vec(),
    })
}
