//! Metrics: the event log, the periodic time-series sampler, and terminal
//! summary aggregation.

use crate::config::SimPolicies;
use crate::gpu::Gpu;
use crate::request::{Request, RequestStatus};
use serde::{Deserialize, Serialize};

/// Kinds of simulation events.
///
/// Arrival through Finish are schedulable on the event queue; Enqueue,
/// Reject, and Evict appear only as log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Arrival,
    Enqueue,
    StartPrefill,
    StartDecode,
    HandoffStart,
    HandoffComplete,
    Finish,
    Reject,
    Evict,
}

/// One line of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub time_ms: f64,
    pub kind: EventKind,
    pub request: String,
    /// Accelerator index, -1 where not applicable.
    pub gpu: i64,
}

/// One periodic time-series sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesSample {
    pub time_ms: f64,
    /// Aggregate VRAM bytes in use across the fleet.
    pub vram_used: u64,
    pub active_prefill: u32,
    pub active_decode: u32,
    /// Aggregate per-accelerator prefill queue depth.
    pub queue_depth: usize,
    pub global_queue_depth: usize,
    pub vram_per_gpu: Vec<u64>,
    /// Tokens generated since the previous sample.
    pub tokens_generated_delta: u64,
    /// Rejections since the previous sample.
    pub rejects_delta: u64,
}

/// Grid-aligned time-series sampler.
///
/// `sample_until` emits one sample per grid point crossed; a final tail
/// sample is taken once the event queue drains, when the clock stopped
/// between grid points.
#[derive(Debug, Clone)]
pub struct Sampler {
    dt_ms: f64,
    next_sample_ms: f64,
    samples: Vec<TimeseriesSample>,
    last_tokens_sampled: u64,
    last_rejects_sampled: u64,
}

impl Sampler {
    pub fn new(dt_ms: f64) -> Self {
        Self {
            dt_ms,
            next_sample_ms: dt_ms,
            samples: Vec::new(),
            last_tokens_sampled: 0,
            last_rejects_sampled: 0,
        }
    }

    /// Emit a sample at every grid point `<= target_ms`.
    pub fn sample_until(
        &mut self,
        target_ms: f64,
        gpus: &[Gpu],
        global_queue_depth: usize,
        tokens_total: u64,
        rejects_total: u64,
    ) {
        while self.next_sample_ms <= target_ms {
            let at = self.next_sample_ms;
            self.push_sample(at, gpus, global_queue_depth, tokens_total, rejects_total);
            self.next_sample_ms += self.dt_ms;
        }
    }

    /// Capture the tail interval after the event queue drains, when the run
    /// ended off-grid.
    pub fn tail_sample(
        &mut self,
        final_ms: f64,
        gpus: &[Gpu],
        global_queue_depth: usize,
        tokens_total: u64,
        rejects_total: u64,
    ) {
        let already_sampled = self
            .samples
            .last()
            .is_some_and(|s| s.time_ms >= final_ms);
        if !already_sampled {
            self.push_sample(final_ms, gpus, global_queue_depth, tokens_total, rejects_total);
        }
    }

    fn push_sample(
        &mut self,
        time_ms: f64,
        gpus: &[Gpu],
        global_queue_depth: usize,
        tokens_total: u64,
        rejects_total: u64,
    ) {
        self.samples.push(TimeseriesSample {
            time_ms,
            vram_used: gpus.iter().map(|g| g.used_bytes).sum(),
            active_prefill: gpus.iter().map(|g| g.active_prefill).sum(),
            active_decode: gpus.iter().map(|g| g.active_decode).sum(),
            queue_depth: gpus.iter().map(|g| g.prefill_queue.len()).sum(),
            global_queue_depth,
            vram_per_gpu: gpus.iter().map(|g| g.used_bytes).collect(),
            tokens_generated_delta: tokens_total - self.last_tokens_sampled,
            rejects_delta: rejects_total - self.last_rejects_sampled,
        });
        self.last_tokens_sampled = tokens_total;
        self.last_rejects_sampled = rejects_total;
    }

    pub fn samples(&self) -> &[TimeseriesSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<TimeseriesSample> {
        self.samples
    }
}

/// Engine-wide counters accumulated during a run.
#[derive(Debug, Clone, Default)]
pub struct RunCounters {
    pub tokens_generated_total: u64,
    pub rejects_total: u64,
    pub evictions_total: u64,
    pub retry_attempts: u64,
    pub retry_successes: u64,
    pub handoffs_total: u64,
    pub cross_gpu_decodes: u64,
    pub max_global_queue_depth: usize,
}

/// Terminal summary of a run, written to `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub finished: u64,
    pub rejected: u64,
    pub evicted: u64,
    pub makespan_ms: f64,
    pub tokens_generated_total: u64,

    pub completion_rate: f64,
    pub reject_rate: f64,
    pub throughput_tokens_per_sec: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub avg_vram_bytes: f64,
    pub gpu_busy_ms: f64,
    pub evictions: u64,

    pub memory_pressure_policy: String,
    pub eviction_policy: String,
    pub routing_policy: String,

    pub retry_attempts: u64,
    pub retry_successes: u64,
    pub handoffs_total: u64,
    pub cross_gpu_decodes: u64,
    pub max_global_queue_depth: usize,
    pub peak_vram_per_gpu: Vec<u64>,
    pub tokens_per_gpu: Vec<u64>,
    pub requests_finished_per_gpu: Vec<u64>,
}

impl Summary {
    /// Aggregate a finished run.
    pub fn compute(
        requests: &[Request],
        gpus: &[Gpu],
        counters: &RunCounters,
        samples: &[TimeseriesSample],
        policies: &SimPolicies,
        makespan_ms: f64,
    ) -> Self {
        let mut finished = 0u64;
        let mut rejected = 0u64;
        let mut evicted = 0u64;
        let mut latencies: Vec<f64> = Vec::new();
        for req in requests {
            match req.status {
                RequestStatus::Finished => {
                    finished += 1;
                    if let Some(latency) = req.latency_ms() {
                        latencies.push(latency);
                    }
                }
                RequestStatus::Rejected => rejected += 1,
                RequestStatus::Evicted => evicted += 1,
                _ => {}
            }
        }
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let total = requests.len() as f64;
        let makespan_sec = makespan_ms / 1000.0;
        let avg_vram_bytes = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|s| s.vram_used as f64).sum::<f64>() / samples.len() as f64
        };

        Self {
            finished,
            rejected,
            evicted,
            makespan_ms,
            tokens_generated_total: counters.tokens_generated_total,
            completion_rate: if total > 0.0 {
                finished as f64 / total
            } else {
                0.0
            },
            reject_rate: if total > 0.0 {
                rejected as f64 / total
            } else {
                0.0
            },
            throughput_tokens_per_sec: if makespan_sec > 0.0 {
                counters.tokens_generated_total as f64 / makespan_sec
            } else {
                0.0
            },
            p50_latency_ms: percentile_sorted(&latencies, 50.0),
            p95_latency_ms: percentile_sorted(&latencies, 95.0),
            p99_latency_ms: percentile_sorted(&latencies, 99.0),
            avg_vram_bytes,
            gpu_busy_ms: gpus.iter().map(|g| g.busy_ms).sum(),
            evictions: counters.evictions_total,
            memory_pressure_policy: format!("{:?}", policies.memory_pressure_policy).to_lowercase(),
            eviction_policy: format!("{:?}", policies.eviction_policy).to_lowercase(),
            routing_policy: policies.routing_policy.clone(),
            retry_attempts: counters.retry_attempts,
            retry_successes: counters.retry_successes,
            handoffs_total: counters.handoffs_total,
            cross_gpu_decodes: counters.cross_gpu_decodes,
            max_global_queue_depth: counters.max_global_queue_depth,
            peak_vram_per_gpu: gpus.iter().map(|g| g.peak_vram).collect(),
            tokens_per_gpu: gpus.iter().map(|g| g.tokens_generated).collect(),
            requests_finished_per_gpu: gpus.iter().map(|g| g.finished).collect(),
        }
    }
}

/// Nearest-rank percentile over a pre-sorted slice.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Format a summary as a human-readable table for stdout.
pub fn format_table(summary: &Summary) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{:=<66}\n", "  FleetSim Results  "));
    out.push_str(&format!(
        "  Makespan: {:.1}ms | Finished: {} | Rejected: {} | Evicted: {}\n",
        summary.makespan_ms, summary.finished, summary.rejected, summary.evicted,
    ));
    out.push_str(&format!(
        "  Policies: routing={} memory={} eviction={}\n",
        summary.routing_policy, summary.memory_pressure_policy, summary.eviction_policy,
    ));
    out.push_str(&format!("{:-<66}\n", "  Latency  "));
    out.push_str(&format!(
        "  E2E (ms)  P50={:>9.1}  P95={:>9.1}  P99={:>9.1}\n",
        summary.p50_latency_ms, summary.p95_latency_ms, summary.p99_latency_ms,
    ));
    out.push_str(&format!("{:-<66}\n", "  Throughput  "));
    out.push_str(&format!(
        "  Tokens: {} ({:.0} tok/s) | Completion rate: {:.1}%\n",
        summary.tokens_generated_total,
        summary.throughput_tokens_per_sec,
        summary.completion_rate * 100.0,
    ));
    out.push_str(&format!("{:-<66}\n", "  Cluster  "));
    out.push_str(&format!(
        "  Handoffs: {} | Cross-gpu decodes: {} | Retries: {}/{} ok\n",
        summary.handoffs_total,
        summary.cross_gpu_decodes,
        summary.retry_successes,
        summary.retry_attempts,
    ));
    out.push_str(&format!(
        "  Max global queue: {} | Evictions: {} | Busy: {:.0}ms\n",
        summary.max_global_queue_depth, summary.evictions, summary.gpu_busy_ms,
    ));
    out.push_str(&format!("{:=<66}\n", ""));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuConfig;

    fn idle_gpus(n: usize) -> Vec<Gpu> {
        (0..n)
            .map(|id| Gpu::new(id, GpuConfig::default(), 8))
            .collect()
    }

    #[test]
    fn test_percentile_sorted() {
        assert_eq!(percentile_sorted(&[], 50.0), 0.0);
        assert_eq!(percentile_sorted(&[42.0], 99.0), 42.0);
        let values: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert!((percentile_sorted(&values, 50.0) - 50.0).abs() < 2.0);
        assert!((percentile_sorted(&values, 99.0) - 99.0).abs() < 2.0);
    }

    #[test]
    fn test_sampler_grid_points() {
        let gpus = idle_gpus(2);
        let mut sampler = Sampler::new(10.0);
        sampler.sample_until(35.0, &gpus, 0, 100, 1);
        let samples = sampler.samples();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].time_ms, 10.0);
        assert_eq!(samples[1].time_ms, 20.0);
        assert_eq!(samples[2].time_ms, 30.0);
        // Deltas accrue only on the first crossing.
        assert_eq!(samples[0].tokens_generated_delta, 100);
        assert_eq!(samples[0].rejects_delta, 1);
        assert_eq!(samples[1].tokens_generated_delta, 0);
    }

    #[test]
    fn test_sampler_no_sample_before_first_grid_point() {
        let gpus = idle_gpus(1);
        let mut sampler = Sampler::new(10.0);
        sampler.sample_until(9.99, &gpus, 0, 0, 0);
        assert!(sampler.samples().is_empty());
    }

    #[test]
    fn test_tail_sample_off_grid() {
        let gpus = idle_gpus(1);
        let mut sampler = Sampler::new(10.0);
        sampler.sample_until(25.0, &gpus, 0, 50, 0);
        sampler.tail_sample(25.0, &gpus, 0, 50, 0);
        let samples = sampler.samples();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[2].time_ms, 25.0);
        assert_eq!(samples[2].tokens_generated_delta, 0);
    }

    #[test]
    fn test_tail_sample_on_grid_not_duplicated() {
        let gpus = idle_gpus(1);
        let mut sampler = Sampler::new(10.0);
        sampler.sample_until(20.0, &gpus, 0, 0, 0);
        sampler.tail_sample(20.0, &gpus, 0, 0, 0);
        assert_eq!(sampler.samples().len(), 2);
    }

    #[test]
    fn test_sample_captures_per_gpu_vram() {
        let mut gpus = idle_gpus(2);
        gpus[0].charge(0, 1000);
        gpus[1].charge(1, 500);
        let mut sampler = Sampler::new(10.0);
        sampler.sample_until(10.0, &gpus, 3, 0, 0);
        let sample = &sampler.samples()[0];
        assert_eq!(sample.vram_used, 1500);
        assert_eq!(sample.vram_per_gpu, vec![1000, 500]);
        assert_eq!(sample.global_queue_depth, 3);
    }

    #[test]
    fn test_summary_rates() {
        use crate::request::{Request, RequestStatus};
        let mut requests = vec![
            Request::new("a", 0.0, 10, 10, false),
            Request::new("b", 0.0, 10, 10, false),
            Request::new("c", 0.0, 10, 10, false),
            Request::new("d", 0.0, 10, 10, false),
        ];
        requests[0].status = RequestStatus::Finished;
        requests[0].finish_ms = Some(100.0);
        requests[1].status = RequestStatus::Finished;
        requests[1].finish_ms = Some(200.0);
        requests[2].status = RequestStatus::Rejected;
        requests[3].status = RequestStatus::Evicted;

        let gpus = idle_gpus(1);
        let counters = RunCounters {
            tokens_generated_total: 20,
            ..Default::default()
        };
        let summary = Summary::compute(
            &requests,
            &gpus,
            &counters,
            &[],
            &SimPolicies::default(),
            200.0,
        );
        assert_eq!(summary.finished, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.evicted, 1);
        assert_eq!(summary.completion_rate, 0.5);
        assert_eq!(summary.reject_rate, 0.25);
        assert_eq!(summary.throughput_tokens_per_sec, 100.0);
        assert_eq!(summary.memory_pressure_policy, "reject");
        assert_eq!(summary.eviction_policy, "fifo");
    }

    #[test]
    fn test_format_table_no_panic() {
        let gpus = idle_gpus(2);
        let summary = Summary::compute(
            &[],
            &gpus,
            &RunCounters::default(),
            &[],
            &SimPolicies::default(),
            0.0,
        );
        let table = format_table(&summary);
        assert!(table.contains("FleetSim"));
        assert!(table.contains("P50"));
    }
}
