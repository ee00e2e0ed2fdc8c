//! Request model for the inference cluster simulation.
//!
//! Each [`Request`] is a single inference call with token counts and the
//! mutable lifecycle state the engine drives it through. Requests are created
//! once at load time and only mutated by event handlers.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Loaded from the trace, arrival not yet handled.
    Arrived,
    /// Admitted to an accelerator, waiting for a prefill slot.
    Queued,
    /// Prompt ingestion in progress (also covers an in-flight handoff).
    Prefill,
    /// Token generation in progress.
    Decode,
    Finished,
    Rejected,
    Evicted,
}

impl RequestStatus {
    /// Whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Finished | RequestStatus::Rejected | RequestStatus::Evicted
        )
    }
}

/// A single inference request flowing through the simulated cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Identifier from the trace.
    pub id: String,
    /// Arrival time in simulation milliseconds.
    pub arrival_time_ms: f64,
    /// Prompt length in tokens.
    pub prompt_tokens: u32,
    /// Generation length in tokens.
    pub gen_tokens: u32,
    /// Streaming flag from the trace (recorded, not behaviorally load-bearing).
    pub streaming: bool,

    pub status: RequestStatus,
    pub start_prefill_ms: Option<f64>,
    pub start_decode_ms: Option<f64>,
    pub finish_ms: Option<f64>,
    /// Accelerator assigned at prefill.
    pub prefill_gpu: Option<usize>,
    /// Accelerator assigned at decode (differs from `prefill_gpu` after a handoff).
    pub decode_gpu: Option<usize>,
    /// Admission retries consumed at decode-start / handoff-start.
    pub retries: u32,
}

impl Request {
    pub fn new(
        id: impl Into<String>,
        arrival_time_ms: f64,
        prompt_tokens: u32,
        gen_tokens: u32,
        streaming: bool,
    ) -> Self {
        Self {
            id: id.into(),
            arrival_time_ms,
            prompt_tokens,
            gen_tokens,
            streaming,
            status: RequestStatus::Arrived,
            start_prefill_ms: None,
            start_decode_ms: None,
            finish_ms: None,
            prefill_gpu: None,
            decode_gpu: None,
            retries: 0,
        }
    }

    /// Total tokens this request will hold in KV memory (prompt + generation).
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.gen_tokens
    }

    /// End-to-end latency, if finished.
    pub fn latency_ms(&self) -> Option<f64> {
        self.finish_ms.map(|f| f - self.arrival_time_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_is_arrived() {
        let req = Request::new("r1", 10.0, 128, 32, false);
        assert_eq!(req.status, RequestStatus::Arrived);
        assert!(!req.status.is_terminal());
        assert_eq!(req.total_tokens(), 160);
        assert_eq!(req.latency_ms(), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(RequestStatus::Finished.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Evicted.is_terminal());
        assert!(!RequestStatus::Queued.is_terminal());
        assert!(!RequestStatus::Prefill.is_terminal());
        assert!(!RequestStatus::Decode.is_terminal());
    }

    #[test]
    fn test_latency() {
        let mut req = Request::new("r1", 100.0, 128, 32, true);
        req.finish_ms = Some(350.0);
        assert_eq!(req.latency_ms(), Some(250.0));
    }
}
