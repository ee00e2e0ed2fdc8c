//! Discrete-event simulation engine.
//!
//! The engine maintains a priority queue of [`SimEvent`]s ordered by virtual
//! time with a FIFO tiebreak. Each iteration pops the next event, advances
//! the clock, dispatches to a handler by event kind, and interleaves
//! time-series sampling. Handlers mutate per-accelerator state, emit event
//! records, and schedule follow-on events.

use crate::clock::SimClock;
use crate::config::{
    ConfigError, EvictionPolicy, HandoffConfig, MemoryPressurePolicy, SchedulingMode, SimConfig,
    SimPolicies,
};
use crate::gpu::{Gpu, GpuConfig};
use crate::metrics::{EventKind, EventRecord, RunCounters, Sampler, Summary, TimeseriesSample};
use crate::request::{Request, RequestStatus};
use crate::topology::{LinkSpec, Topology};
use fleetsim_policies::RoutingPolicy;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BinaryHeap, VecDeque};

/// Sentinel accelerator index for events with no target (Arrival).
const GPU_NONE: usize = usize::MAX;

/// A scheduled event.
#[derive(Debug, Clone)]
struct SimEvent {
    time_ms: f64,
    /// Insertion order, breaking ties so same-time events run FIFO.
    seq: u64,
    kind: EventKind,
    request: usize,
    gpu: usize,
}

impl PartialEq for SimEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time_ms == other.time_ms && self.seq == other.seq
    }
}

impl Eq for SimEvent {}

impl PartialOrd for SimEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse for min-heap behavior.
        other
            .time_ms
            .total_cmp(&self.time_ms)
            .then(other.seq.cmp(&self.seq))
    }
}

/// The simulation engine.
pub struct Engine {
    policies: SimPolicies,
    handoff: HandoffConfig,
    pub gpus: Vec<Gpu>,
    pub requests: Vec<Request>,
    topology: Topology,
    event_queue: BinaryHeap<SimEvent>,
    seq: u64,
    clock: SimClock,
    rng: ChaCha8Rng,
    router: Box<dyn RoutingPolicy>,
    /// Fallback queue for arrivals no accelerator could accept.
    pub global_queue: VecDeque<usize>,
    pub counters: RunCounters,
    events: Vec<EventRecord>,
    sampler: Sampler,
}

impl Engine {
    /// Build an engine from a validated configuration.
    pub fn from_config(config: &SimConfig, requests: Vec<Request>) -> Result<Self, ConfigError> {
        config.validate()?;
        let router = fleetsim_policies::policy_by_name(&config.policy.routing_policy)
            .ok_or_else(|| {
                ConfigError::Validation(format!(
                    "unknown routing_policy `{}`",
                    config.policy.routing_policy
                ))
            })?;
        Ok(Self::with_gpus(
            config.gpu_configs(),
            config.policy.clone(),
            config.handoff.clone(),
            &config.links,
            config.timeseries_dt_ms,
            config.seed,
            requests,
            router,
        ))
    }

    /// Build an engine from explicit parts; the fleet may be heterogeneous.
    #[allow(clippy::too_many_arguments)]
    pub fn with_gpus(
        gpu_configs: Vec<GpuConfig>,
        policies: SimPolicies,
        handoff: HandoffConfig,
        links: &[LinkSpec],
        timeseries_dt_ms: f64,
        seed: u64,
        requests: Vec<Request>,
        router: Box<dyn RoutingPolicy>,
    ) -> Self {
        let num_requests = requests.len();
        let topology = Topology::new(
            gpu_configs.len(),
            handoff.bandwidth_gbps,
            handoff.latency_us / 1000.0,
            links,
        );
        let gpus = gpu_configs
            .into_iter()
            .enumerate()
            .map(|(id, config)| Gpu::new(id, config, num_requests))
            .collect();
        Self {
            policies,
            handoff,
            gpus,
            requests,
            topology,
            event_queue: BinaryHeap::new(),
            seq: 0,
            clock: SimClock::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            router,
            global_queue: VecDeque::new(),
            counters: RunCounters::default(),
            events: Vec::new(),
            sampler: Sampler::new(timeseries_dt_ms),
        }
    }

    /// Run the simulation to completion and aggregate the summary.
    pub fn run(&mut self) -> Summary {
        for i in 0..self.requests.len() {
            let at = self.requests[i].arrival_time_ms;
            self.schedule(at, EventKind::Arrival, i, GPU_NONE);
        }

        while let Some(event) = self.event_queue.pop() {
            self.clock.advance_to_ms(event.time_ms);
            self.dispatch(&event);
            self.sampler.sample_until(
                self.clock.now_ms(),
                &self.gpus,
                self.global_queue.len(),
                self.counters.tokens_generated_total,
                self.counters.rejects_total,
            );
            #[cfg(debug_assertions)]
            self.assert_invariants();
        }

        let final_ms = self.clock.now_ms();
        self.sampler.tail_sample(
            final_ms,
            &self.gpus,
            self.global_queue.len(),
            self.counters.tokens_generated_total,
            self.counters.rejects_total,
        );

        Summary::compute(
            &self.requests,
            &self.gpus,
            &self.counters,
            self.sampler.samples(),
            &self.policies,
            final_ms,
        )
    }

    /// The event log, in emission order.
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// The periodic time-series samples.
    pub fn samples(&self) -> &[TimeseriesSample] {
        self.sampler.samples()
    }

    fn now(&self) -> f64 {
        self.clock.now_ms()
    }

    fn schedule(&mut self, time_ms: f64, kind: EventKind, request: usize, gpu: usize) {
        debug_assert!(
            time_ms >= self.clock.now_ms(),
            "event scheduled in the past: {}ms < {}ms",
            time_ms,
            self.clock.now_ms(),
        );
        self.event_queue.push(SimEvent {
            time_ms,
            seq: self.seq,
            kind,
            request,
            gpu,
        });
        self.seq += 1;
    }

    fn record(&mut self, kind: EventKind, request: usize, gpu: Option<usize>) {
        self.events.push(EventRecord {
            time_ms: self.now(),
            kind,
            request: self.requests[request].id.clone(),
            gpu: gpu.map_or(-1, |g| g as i64),
        });
    }

    fn dispatch(&mut self, event: &SimEvent) {
        match event.kind {
            EventKind::Arrival => self.on_arrival(event.request),
            EventKind::StartPrefill => self.on_start_prefill(event.request, event.gpu),
            EventKind::StartDecode => self.on_start_decode(event.request, event.gpu),
            EventKind::HandoffStart => self.on_handoff_start(event.request, event.gpu),
            EventKind::HandoffComplete => self.on_handoff_complete(event.request, event.gpu),
            EventKind::Finish => self.on_finish(event.request, event.gpu),
            // Record-only kinds are never scheduled.
            EventKind::Enqueue | EventKind::Reject | EventKind::Evict => {}
        }
    }

    /// Bytes reserved at admission: prompt KV, plus generation KV under safe
    /// reservation.
    fn reserve_bytes(&self, request: usize) -> u64 {
        let req = &self.requests[request];
        let tokens = req.prompt_tokens as u64
            + if self.policies.safe_reservation {
                req.gen_tokens as u64
            } else {
                0
            };
        tokens * self.policies.kv_bytes_per_token
    }

    fn touch_lru(&mut self, gpu: usize, request: usize) {
        if self.policies.eviction_policy == EvictionPolicy::Lru {
            self.gpus[gpu].recency.touch(request);
        }
    }

    // --- Admission and routing ---

    fn on_arrival(&mut self, request: usize) {
        let need = self.reserve_bytes(request);
        let snapshots: Vec<_> = self.gpus.iter().map(|g| g.snapshot()).collect();
        let primary = self.router.pick(&snapshots, &mut self.rng);

        // Queue budget first; overflow falls back to the global queue.
        if self.gpus[primary].queued_plus_active() >= self.policies.max_queue {
            match self.find_alternate(Some(primary), need) {
                Some(alt) => {
                    if !self.try_admit(alt, request) {
                        self.reject(request, Some(alt));
                    }
                }
                None => self.enqueue_global(request),
            }
            return;
        }

        // Memory budget second; exhaustion ends in rejection.
        if self.try_admit(primary, request) {
            return;
        }
        match self.find_alternate(Some(primary), need) {
            Some(alt) => {
                if !self.try_admit(alt, request) {
                    self.reject(request, Some(alt));
                }
            }
            None => self.reject(request, Some(primary)),
        }
    }

    /// Admit `request` to `gpu` if the reservation can be secured.
    fn try_admit(&mut self, gpu: usize, request: usize) -> bool {
        let need = self.reserve_bytes(request);
        if !self.ensure_capacity_for(need, gpu, request) {
            return false;
        }
        self.admit_charged(gpu, request, need);
        true
    }

    /// Admission bookkeeping once capacity is secured.
    fn admit_charged(&mut self, gpu: usize, request: usize, need: u64) {
        self.gpus[gpu].charge(request, need);
        self.requests[request].status = RequestStatus::Queued;
        self.gpus[gpu].evict_fifo.push_back(request);
        self.touch_lru(gpu, request);
        self.record(EventKind::Arrival, request, Some(gpu));

        if self.gpus[gpu].has_free_slot() {
            // Pre-claim the slot so same-time arrivals cannot over-schedule.
            self.gpus[gpu].active_prefill += 1;
            let now = self.now();
            self.schedule(now, EventKind::StartPrefill, request, gpu);
        } else {
            self.gpus[gpu].prefill_queue.push_back(request);
        }
    }

    fn enqueue_global(&mut self, request: usize) {
        self.global_queue.push_back(request);
        if self.global_queue.len() > self.counters.max_global_queue_depth {
            self.counters.max_global_queue_depth = self.global_queue.len();
        }
        self.record(EventKind::Enqueue, request, None);
    }

    /// Scan for the least-loaded accelerator that could take `need` more
    /// bytes, excluding `exclude`. Accelerators at their queue bound are
    /// skipped; under the Reject policy, so are ones where the bytes do not
    /// fit (under Evict, eviction may still free room).
    fn find_alternate(&self, exclude: Option<usize>, need: u64) -> Option<usize> {
        let mut best: Option<(u64, usize)> = None;
        for (idx, gpu) in self.gpus.iter().enumerate() {
            if Some(idx) == exclude {
                continue;
            }
            if gpu.queued_plus_active() >= self.policies.max_queue {
                continue;
            }
            if self.policies.memory_pressure_policy == MemoryPressurePolicy::Reject
                && !gpu.fits(need)
            {
                continue;
            }
            let score = gpu.load_score();
            if best.map_or(true, |(best_score, _)| score < best_score) {
                best = Some((score, idx));
            }
        }
        best.map(|(_, idx)| idx)
    }

    fn reject(&mut self, request: usize, gpu: Option<usize>) {
        self.requests[request].status = RequestStatus::Rejected;
        self.counters.rejects_total += 1;
        self.record(EventKind::Reject, request, gpu);
    }

    // --- Memory pressure ---

    /// Make room for `bytes` on `gpu`, evicting victims under the Evict
    /// policy. `protect` is the request the bytes are for; it is never
    /// selected as a victim.
    fn ensure_capacity_for(&mut self, bytes: u64, gpu: usize, protect: usize) -> bool {
        loop {
            if self.gpus[gpu].fits(bytes) {
                return true;
            }
            if self.policies.memory_pressure_policy == MemoryPressurePolicy::Reject {
                return false;
            }
            if !self.evict_one(gpu, protect) {
                return false;
            }
        }
    }

    /// Evict one victim from `gpu`. Returns false when no victim is
    /// eligible. Terminal entries are dropped lazily; requests holding no
    /// bytes here are skipped (nothing to reclaim).
    fn evict_one(&mut self, gpu: usize, protect: usize) -> bool {
        let victim = match self.policies.eviction_policy {
            EvictionPolicy::Fifo => {
                // Lazy cleanup of terminal entries that reached the head.
                while let Some(&head) = self.gpus[gpu].evict_fifo.front() {
                    if self.requests[head].status.is_terminal() {
                        self.gpus[gpu].evict_fifo.pop_front();
                    } else {
                        break;
                    }
                }
                let pos = self.gpus[gpu].evict_fifo.iter().position(|&idx| {
                    !self.requests[idx].status.is_terminal()
                        && idx != protect
                        && self.gpus[gpu].charged_bytes(idx) > 0
                });
                pos.and_then(|p| self.gpus[gpu].evict_fifo.remove(p))
            }
            EvictionPolicy::Lru => self.gpus[gpu].recency.iter_lru().find(|&idx| {
                !self.requests[idx].status.is_terminal()
                    && idx != protect
                    && self.gpus[gpu].charged_bytes(idx) > 0
            }),
        };
        let Some(victim) = victim else {
            return false;
        };

        self.gpus[gpu].release(victim);
        match self.requests[victim].status {
            RequestStatus::Prefill => {
                self.gpus[gpu].active_prefill = self.gpus[gpu].active_prefill.saturating_sub(1);
            }
            RequestStatus::Decode => {
                self.gpus[gpu].active_decode = self.gpus[gpu].active_decode.saturating_sub(1);
            }
            RequestStatus::Queued => {
                self.gpus[gpu].prefill_queue.retain(|&idx| idx != victim);
            }
            _ => {}
        }
        self.gpus[gpu].recency.remove(victim);
        self.gpus[gpu].evict_fifo.retain(|&idx| idx != victim);

        self.requests[victim].status = RequestStatus::Evicted;
        self.counters.evictions_total += 1;
        self.record(EventKind::Evict, victim, Some(gpu));
        self.try_start_prefill(gpu);
        true
    }

    // --- Prefill / decode lifecycle ---

    /// Pull queued work into free prefill slots.
    fn try_start_prefill(&mut self, gpu: usize) {
        while !self.gpus[gpu].prefill_queue.is_empty() && self.gpus[gpu].has_free_slot() {
            let next = match self.policies.scheduling {
                SchedulingMode::Fifo => self.gpus[gpu].pop_queue_fifo(&self.requests),
                SchedulingMode::ShortestRemaining => {
                    self.gpus[gpu].pop_queue_shortest(&self.requests)
                }
            };
            let Some(request) = next else { break };
            self.gpus[gpu].active_prefill += 1;
            let now = self.now();
            self.schedule(now, EventKind::StartPrefill, request, gpu);
        }
    }

    fn on_start_prefill(&mut self, request: usize, gpu: usize) {
        if self.requests[request].status.is_terminal() {
            // The slot was pre-claimed; give it back and redraw.
            self.gpus[gpu].active_prefill = self.gpus[gpu].active_prefill.saturating_sub(1);
            self.try_start_prefill(gpu);
            return;
        }
        let now = self.now();
        {
            let req = &mut self.requests[request];
            req.status = RequestStatus::Prefill;
            req.start_prefill_ms = Some(now);
            req.prefill_gpu = Some(gpu);
        }
        self.touch_lru(gpu, request);
        self.record(EventKind::StartPrefill, request, Some(gpu));
        let duration = self.gpus[gpu]
            .config
            .prefill_duration_ms(self.requests[request].prompt_tokens);
        self.schedule(now + duration, EventKind::StartDecode, request, gpu);
    }

    fn on_start_decode(&mut self, request: usize, gpu: usize) {
        if self.requests[request].status.is_terminal() {
            return;
        }
        // The decode transition consumes the prefill slot.
        self.gpus[gpu].active_prefill = self.gpus[gpu].active_prefill.saturating_sub(1);
        if let Some(start) = self.requests[request].start_prefill_ms {
            self.gpus[gpu].busy_ms += self.now() - start;
        }

        let dest = self.route_decode(gpu, request);
        if dest == gpu {
            self.begin_local_decode(request, gpu);
        } else {
            let at = self.now() + self.handoff.latency_us / 1000.0;
            self.schedule(at, EventKind::HandoffStart, request, dest);
            // The vacated prefill slot can take queued work immediately.
            self.try_start_prefill(gpu);
        }
    }

    /// Decode on the prefill accelerator. Under deferred reservation the
    /// generation KV is allocated here; a failure enters the retry protocol
    /// with the request still in its pre-decode state.
    fn begin_local_decode(&mut self, request: usize, gpu: usize) {
        if !self.policies.safe_reservation {
            let need = self.requests[request].gen_tokens as u64 * self.policies.kv_bytes_per_token;
            if !self.ensure_capacity_for(need, gpu, request) {
                self.retry_or_reject(request, gpu);
                return;
            }
            self.gpus[gpu].charge(request, need);
        }
        self.enter_decode(request, gpu);
    }

    /// Transition to Decode on `gpu` and schedule the Finish event.
    fn enter_decode(&mut self, request: usize, gpu: usize) {
        let now = self.now();
        {
            let req = &mut self.requests[request];
            req.status = RequestStatus::Decode;
            req.start_decode_ms = Some(now);
            req.decode_gpu = Some(gpu);
        }
        self.gpus[gpu].active_decode += 1;
        self.touch_lru(gpu, request);
        self.record(EventKind::StartDecode, request, Some(gpu));

        // Throughput sharing snapshots the decoder count at decode start.
        let active = self.gpus[gpu].active_decode;
        let duration = self.gpus[gpu]
            .config
            .decode_duration_ms(self.requests[request].gen_tokens, active);
        self.schedule(now + duration, EventKind::Finish, request, gpu);
    }

    fn on_finish(&mut self, request: usize, gpu: usize) {
        if self.requests[request].status.is_terminal() {
            return;
        }
        self.gpus[gpu].active_decode = self.gpus[gpu].active_decode.saturating_sub(1);
        let now = self.now();
        {
            let req = &mut self.requests[request];
            req.status = RequestStatus::Finished;
            req.finish_ms = Some(now);
        }
        if let Some(start) = self.requests[request].start_decode_ms {
            self.gpus[gpu].busy_ms += now - start;
        }

        let gen = self.requests[request].gen_tokens as u64;
        self.counters.tokens_generated_total += gen;
        self.gpus[gpu].tokens_generated += gen;
        self.gpus[gpu].finished += 1;
        if self.requests[request].prefill_gpu != self.requests[request].decode_gpu {
            self.counters.cross_gpu_decodes += 1;
        }
        self.record(EventKind::Finish, request, Some(gpu));

        self.gpus[gpu].release(request);
        self.gpus[gpu].recency.remove(request);
        self.gpus[gpu].evict_fifo.retain(|&idx| idx != request);

        self.try_start_prefill(gpu);
        self.try_dispatch_global_queue();
    }

    // --- Decode routing and handoff ---

    /// Choose the decode accelerator: the lowest combined load + weighted
    /// handoff cost among those that can hold the full KV footprint. Falls
    /// back to staying local when nothing fits.
    fn route_decode(&self, src: usize, request: usize) -> usize {
        if self.gpus.len() == 1 {
            return src;
        }
        let need =
            self.requests[request].total_tokens() as u64 * self.policies.kv_bytes_per_token;
        let mut best: Option<(f64, usize)> = None;
        for (idx, gpu) in self.gpus.iter().enumerate() {
            if !gpu.fits(need) {
                continue;
            }
            let score = gpu.load_score() as f64
                + self.handoff.cost_weight * self.estimate_handoff_ms(src, idx, request);
            if best.map_or(true, |(best_score, _)| score < best_score) {
                best = Some((score, idx));
            }
        }
        best.map_or(src, |(_, idx)| idx)
    }

    /// Estimated KV transfer time for the request's full footprint.
    fn estimate_handoff_ms(&self, src: usize, dest: usize, request: usize) -> f64 {
        let bytes =
            self.requests[request].total_tokens() as u64 * self.policies.kv_bytes_per_token;
        self.topology.transfer_ms(src, dest, bytes)
    }

    fn on_handoff_start(&mut self, request: usize, dest: usize) {
        if self.requests[request].status.is_terminal() {
            return;
        }
        let Some(src) = self.requests[request].prefill_gpu else {
            return;
        };
        let bytes_to_copy = self.gpus[src].charged_bytes(request);
        if !self.ensure_capacity_for(bytes_to_copy, dest, request) {
            self.retry_or_reject(request, dest);
            return;
        }
        // Dual ownership while the transfer is in flight.
        self.gpus[dest].charge(request, bytes_to_copy);
        self.counters.handoffs_total += 1;
        self.record(EventKind::HandoffStart, request, Some(dest));
        let at = self.now() + self.estimate_handoff_ms(src, dest, request);
        self.schedule(at, EventKind::HandoffComplete, request, dest);
    }

    fn on_handoff_complete(&mut self, request: usize, dest: usize) {
        if self.requests[request].status.is_terminal() {
            // Evicted mid-flight: unwind whatever is still charged.
            if let Some(src) = self.requests[request].prefill_gpu {
                self.gpus[src].release(request);
            }
            self.gpus[dest].release(request);
            return;
        }
        let Some(src) = self.requests[request].prefill_gpu else {
            return;
        };
        // Ownership transfer completes.
        self.gpus[src].release(request);
        self.record(EventKind::HandoffComplete, request, Some(dest));

        if !self.policies.safe_reservation {
            let need = self.requests[request].gen_tokens as u64 * self.policies.kv_bytes_per_token;
            if !self.ensure_capacity_for(need, dest, request) {
                self.gpus[dest].release(request);
                self.reject(request, Some(dest));
                return;
            }
            self.gpus[dest].charge(request, need);
        }
        self.enter_decode(request, dest);
    }

    // --- Retry and global fallback ---

    /// Capacity could not be secured at decode-start or handoff-start on
    /// `failing_gpu`: retry on an alternate accelerator or reject.
    fn retry_or_reject(&mut self, request: usize, failing_gpu: usize) {
        self.requests[request].retries += 1;
        self.counters.retry_attempts += 1;

        if self.requests[request].retries < self.policies.max_admission_retries {
            let need = self.reserve_bytes(request);
            if let Some(alt) = self.find_alternate(Some(failing_gpu), need) {
                self.counters.retry_successes += 1;
                let at = self.now() + self.handoff.latency_us / 1000.0;
                self.schedule(at, EventKind::HandoffStart, request, alt);
                return;
            }
        }

        // Exhausted: unwind the reservation wherever it is held and resume
        // work on those accelerators.
        let holders: Vec<usize> = self
            .gpus
            .iter()
            .filter(|gpu| gpu.charged_bytes(request) > 0)
            .map(|gpu| gpu.id)
            .collect();
        for &gpu in &holders {
            self.gpus[gpu].release(request);
            self.gpus[gpu].recency.remove(request);
            self.gpus[gpu].evict_fifo.retain(|&idx| idx != request);
        }
        self.reject(request, Some(failing_gpu));
        for &gpu in &holders {
            self.try_start_prefill(gpu);
        }
    }

    /// Drain the global fallback queue while some accelerator can take the
    /// head request. Terminal heads are dropped silently.
    fn try_dispatch_global_queue(&mut self) {
        loop {
            let Some(&head) = self.global_queue.front() else {
                break;
            };
            if self.requests[head].status.is_terminal() {
                self.global_queue.pop_front();
                continue;
            }
            let need = self.reserve_bytes(head);
            let Some(gpu) = self.find_alternate(None, need) else {
                break;
            };
            self.global_queue.pop_front();
            if !self.ensure_capacity_for(need, gpu, head) {
                self.global_queue.push_front(head);
                break;
            }
            self.admit_charged(gpu, head, need);
        }
    }

    #[cfg(debug_assertions)]
    fn assert_invariants(&self) {
        for gpu in &self.gpus {
            let ledger_sum: u64 = gpu.ledger.values().sum();
            assert_eq!(
                gpu.used_bytes, ledger_sum,
                "gpu {} used_bytes {} != ledger sum {}",
                gpu.id, gpu.used_bytes, ledger_sum,
            );
            assert!(
                gpu.used_bytes <= gpu.config.vram_bytes,
                "gpu {} over capacity: {} > {}",
                gpu.id,
                gpu.used_bytes,
                gpu.config.vram_bytes,
            );
        }
    }
}
