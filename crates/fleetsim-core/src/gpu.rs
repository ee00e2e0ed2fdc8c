//! Simulated accelerator: immutable profile plus mutable serving state.
//!
//! Each [`Gpu`] owns its VRAM byte ledger, prefill/decode slot counters,
//! prefill wait list, and eviction tracking structures. All mutation goes
//! through the engine's event handlers.

use crate::recency::RecencyList;
use crate::request::Request;
use fleetsim_policies::GpuSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Immutable per-accelerator profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuConfig {
    /// VRAM capacity in bytes.
    pub vram_bytes: u64,
    /// Maximum concurrent in-flight requests (prefill + decode).
    pub max_concurrent: u32,
    /// Prefill throughput in tokens/sec.
    pub prefill_tps: f64,
    /// Decode throughput in tokens/sec.
    pub decode_tps: f64,
    /// Upper bound on how many concurrent decoders contend for throughput.
    pub decode_sharing_cap: u32,
    /// Decode efficiency factor in (0, 1].
    pub decode_efficiency: f64,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            vram_bytes: 24 * 1024 * 1024 * 1024,
            max_concurrent: 16,
            prefill_tps: 1000.0,
            decode_tps: 500.0,
            decode_sharing_cap: 8,
            decode_efficiency: 0.8,
        }
    }
}

impl GpuConfig {
    /// Prefill duration in milliseconds for a prompt.
    pub fn prefill_duration_ms(&self, prompt_tokens: u32) -> f64 {
        1000.0 * prompt_tokens as f64 / self.prefill_tps
    }

    /// Decode duration in milliseconds.
    ///
    /// Concurrent decoders share throughput multiplicatively up to
    /// `decode_sharing_cap`; `active_decode` is the count at the moment the
    /// decode starts (including this request).
    pub fn decode_duration_ms(&self, gen_tokens: u32, active_decode: u32) -> f64 {
        let share = active_decode.clamp(1, self.decode_sharing_cap);
        let effective_tps = self.decode_tps * self.decode_efficiency / share as f64;
        if effective_tps <= 0.0 {
            return 0.0;
        }
        1000.0 * gen_tokens as f64 / effective_tps
    }
}

/// A simulated accelerator.
#[derive(Debug, Clone)]
pub struct Gpu {
    pub id: usize,
    pub config: GpuConfig,

    /// Bytes currently charged. Always equals the sum of `ledger` values.
    pub used_bytes: u64,
    /// Prefill slots in use (pre-claimed at scheduling time).
    pub active_prefill: u32,
    /// Decode slots in use.
    pub active_decode: u32,
    /// Admitted requests waiting for a prefill slot.
    pub prefill_queue: VecDeque<usize>,
    /// Insertion-order eviction ring (FIFO eviction policy).
    pub evict_fifo: VecDeque<usize>,
    /// Recency order of resident requests (LRU eviction policy).
    pub recency: RecencyList,
    /// Bytes charged per resident request.
    pub ledger: HashMap<usize, u64>,

    // --- Counters ---
    pub peak_vram: u64,
    pub tokens_generated: u64,
    pub finished: u64,
    pub busy_ms: f64,
}

impl Gpu {
    /// Create an accelerator. `num_requests` sizes the recency arena.
    pub fn new(id: usize, config: GpuConfig, num_requests: usize) -> Self {
        Self {
            id,
            config,
            used_bytes: 0,
            active_prefill: 0,
            active_decode: 0,
            prefill_queue: VecDeque::new(),
            evict_fifo: VecDeque::new(),
            recency: RecencyList::with_capacity(num_requests),
            ledger: HashMap::new(),
            peak_vram: 0,
            tokens_generated: 0,
            finished: 0,
            busy_ms: 0.0,
        }
    }

    /// In-flight plus queued work, used by routing and admission.
    pub fn load_score(&self) -> u64 {
        self.active_prefill as u64 + self.active_decode as u64 + self.prefill_queue.len() as u64
    }

    /// Queue depth plus active count, compared against `max_queue`.
    pub fn queued_plus_active(&self) -> usize {
        self.prefill_queue.len() + self.active_prefill as usize + self.active_decode as usize
    }

    /// Whether `bytes` more would fit right now.
    pub fn fits(&self, bytes: u64) -> bool {
        self.used_bytes + bytes <= self.config.vram_bytes
    }

    /// Whether a free concurrency slot exists.
    pub fn has_free_slot(&self) -> bool {
        self.active_prefill + self.active_decode < self.config.max_concurrent
    }

    /// Charge `bytes` to a request's ledger on this accelerator.
    pub fn charge(&mut self, req: usize, bytes: u64) {
        *self.ledger.entry(req).or_insert(0) += bytes;
        self.used_bytes += bytes;
        if self.used_bytes > self.peak_vram {
            self.peak_vram = self.used_bytes;
        }
    }

    /// Release a request's full ledger on this accelerator, returning the
    /// bytes freed (0 if it held nothing here).
    pub fn release(&mut self, req: usize) -> u64 {
        match self.ledger.remove(&req) {
            Some(bytes) => {
                self.used_bytes = self.used_bytes.saturating_sub(bytes);
                bytes
            }
            None => 0,
        }
    }

    /// Bytes the request currently holds on this accelerator.
    pub fn charged_bytes(&self, req: usize) -> u64 {
        self.ledger.get(&req).copied().unwrap_or(0)
    }

    /// Read-only snapshot for routing policies.
    pub fn snapshot(&self) -> GpuSnapshot {
        GpuSnapshot {
            id: self.id,
            active_prefill: self.active_prefill,
            active_decode: self.active_decode,
            queue_depth: self.prefill_queue.len(),
        }
    }

    /// Pop the next queued request under FIFO scheduling, skipping any entry
    /// that reached a terminal state while waiting.
    pub fn pop_queue_fifo(&mut self, requests: &[Request]) -> Option<usize> {
        while let Some(idx) = self.prefill_queue.pop_front() {
            if !requests[idx].status.is_terminal() {
                return Some(idx);
            }
        }
        None
    }

    /// Pop the queued request with the smallest remaining work
    /// (prompt + generation tokens), skipping terminal entries.
    pub fn pop_queue_shortest(&mut self, requests: &[Request]) -> Option<usize> {
        loop {
            let pos = self
                .prefill_queue
                .iter()
                .enumerate()
                .min_by_key(|(_, &idx)| requests[idx].total_tokens())
                .map(|(pos, _)| pos)?;
            let idx = self.prefill_queue.remove(pos)?;
            if !requests[idx].status.is_terminal() {
                return Some(idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_gpu() -> Gpu {
        Gpu::new(0, GpuConfig::default(), 16)
    }

    #[test]
    fn test_prefill_duration() {
        let config = GpuConfig::default();
        // 200 tokens at 1000 tok/s = 200ms.
        assert!((config.prefill_duration_ms(200) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_duration_sharing() {
        let config = GpuConfig::default();
        // Single decoder: 400 tokens at 500 * 0.8 = 400 tok/s => 1000ms.
        assert!((config.decode_duration_ms(400, 1) - 1000.0).abs() < 1e-9);
        // Two decoders halve the effective rate.
        assert!((config.decode_duration_ms(400, 2) - 2000.0).abs() < 1e-9);
        // Sharing is capped.
        let capped = config.decode_duration_ms(400, 100);
        assert!((capped - config.decode_duration_ms(400, 8)).abs() < 1e-9);
        // active_decode of zero is clamped up to one.
        assert!((config.decode_duration_ms(400, 0) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_charge_release_ledger() {
        let mut gpu = test_gpu();
        gpu.charge(3, 1024);
        gpu.charge(3, 512);
        gpu.charge(5, 2048);
        assert_eq!(gpu.used_bytes, 3584);
        assert_eq!(gpu.charged_bytes(3), 1536);
        assert_eq!(gpu.peak_vram, 3584);

        assert_eq!(gpu.release(3), 1536);
        assert_eq!(gpu.used_bytes, 2048);
        assert_eq!(gpu.release(3), 0);
        // Peak is sticky.
        assert_eq!(gpu.peak_vram, 3584);
    }

    #[test]
    fn test_load_score_and_slots() {
        let mut gpu = test_gpu();
        gpu.active_prefill = 2;
        gpu.active_decode = 1;
        gpu.prefill_queue.push_back(0);
        assert_eq!(gpu.load_score(), 4);
        assert_eq!(gpu.queued_plus_active(), 4);
        assert!(gpu.has_free_slot());
        gpu.active_decode = gpu.config.max_concurrent - 2;
        assert!(!gpu.has_free_slot());
    }

    #[test]
    fn test_pop_queue_shortest() {
        let mut gpu = test_gpu();
        let requests = vec![
            Request::new("a", 0.0, 300, 100, false),
            Request::new("b", 0.0, 50, 20, false),
            Request::new("c", 0.0, 100, 100, false),
        ];
        gpu.prefill_queue.extend([0, 1, 2]);
        assert_eq!(gpu.pop_queue_shortest(&requests), Some(1));
        assert_eq!(gpu.pop_queue_shortest(&requests), Some(2));
        assert_eq!(gpu.pop_queue_shortest(&requests), Some(0));
        assert_eq!(gpu.pop_queue_shortest(&requests), None);
    }

    #[test]
    fn test_pop_queue_fifo_skips_terminal() {
        let mut gpu = test_gpu();
        let mut requests = vec![
            Request::new("a", 0.0, 100, 100, false),
            Request::new("b", 0.0, 100, 100, false),
        ];
        requests[0].status = crate::request::RequestStatus::Evicted;
        gpu.prefill_queue.extend([0, 1]);
        assert_eq!(gpu.pop_queue_fifo(&requests), Some(1));
        assert!(gpu.prefill_queue.is_empty());
    }
}
