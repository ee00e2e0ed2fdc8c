//! Simulation configuration: the policy bundle, accelerator profile, and
//! topology link declarations.
//!
//! Configuration files are plain text, one `key value` pair per line (an
//! optional `=` between key and value is tolerated), with `#` comments.
//! `link <src> <dest> <bw_gbps> <latency_ms>` rows declare interconnect
//! links. Unknown keys are skipped with a warning so configs can carry
//! annotations for external tooling.

use crate::gpu::GpuConfig;
use crate::topology::LinkSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid value for `{key}` at line {line}: {value}")]
    BadValue {
        key: String,
        line: usize,
        value: String,
    },
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// What to do when a reservation does not fit in VRAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressurePolicy {
    /// Fail the reservation.
    Reject,
    /// Evict victims until the reservation fits or no victim remains.
    Evict,
}

/// Victim selection order under the Evict policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Oldest admission first.
    Fifo,
    /// Least recently touched first.
    Lru,
}

/// Prefill queue service order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    Fifo,
    ShortestRemaining,
}

impl FromStr for MemoryPressurePolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(Self::Reject),
            "evict" => Ok(Self::Evict),
            other => Err(format!("unknown memory pressure policy: {other}")),
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(Self::Fifo),
            "lru" => Ok(Self::Lru),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

impl FromStr for SchedulingMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(Self::Fifo),
            "shortest_remaining" => Ok(Self::ShortestRemaining),
            other => Err(format!("unknown scheduling mode: {other}")),
        }
    }
}

/// The policy bundle, immutable for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimPolicies {
    pub scheduling: SchedulingMode,
    pub memory_pressure_policy: MemoryPressurePolicy,
    pub eviction_policy: EvictionPolicy,
    /// Routing policy name, resolved via `fleetsim_policies::policy_by_name`.
    pub routing_policy: String,
    /// Reserve generation KV bytes at admission, not at decode start.
    pub safe_reservation: bool,
    /// Per-accelerator bound on queued + active requests.
    pub max_queue: usize,
    pub kv_bytes_per_token: u64,
    /// Admission retries at decode-start / handoff-start before rejecting.
    pub max_admission_retries: u32,
}

impl Default for SimPolicies {
    fn default() -> Self {
        Self {
            scheduling: SchedulingMode::Fifo,
            memory_pressure_policy: MemoryPressurePolicy::Reject,
            eviction_policy: EvictionPolicy::Fifo,
            routing_policy: "power_of_two_choices".to_string(),
            safe_reservation: true,
            max_queue: 1024,
            kv_bytes_per_token: 2048,
            max_admission_retries: 3,
        }
    }
}

/// Defaults for the interconnect and the handoff cost model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffConfig {
    /// Pre-transfer scheduling delay and default link latency, microseconds.
    pub latency_us: f64,
    /// Default link bandwidth in GB/s.
    pub bandwidth_gbps: f64,
    /// Weight of the estimated handoff time in the decode routing score.
    pub cost_weight: f64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            latency_us: 500.0,
            bandwidth_gbps: 50.0,
            cost_weight: 1.0,
        }
    }
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub num_gpus: usize,
    /// Profile shared by every accelerator in the fleet.
    pub gpu: GpuConfig,
    pub policy: SimPolicies,
    pub handoff: HandoffConfig,
    /// Time-series sample period in milliseconds.
    pub timeseries_dt_ms: f64,
    pub seed: u64,
    pub links: Vec<LinkSpec>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_gpus: 1,
            gpu: GpuConfig::default(),
            policy: SimPolicies::default(),
            handoff: HandoffConfig::default(),
            timeseries_dt_ms: 20.0,
            seed: 12345,
            links: Vec::new(),
        }
    }
}

impl SimConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from its text representation.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let mut config = SimConfig::default();

        for (line_num, raw) in s.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let normalized = line.replace('=', " ");
            let mut tokens = normalized.split_whitespace();
            let Some(key) = tokens.next() else { continue };
            let line_no = line_num + 1;

            if key == "link" {
                config.links.push(parse_link(&mut tokens, line_no)?);
                continue;
            }

            let Some(value) = tokens.next() else {
                return Err(ConfigError::BadValue {
                    key: key.to_string(),
                    line: line_no,
                    value: String::new(),
                });
            };

            match key {
                "num_gpus" => config.num_gpus = parse(key, value, line_no)?,
                "vram_bytes" => config.gpu.vram_bytes = parse(key, value, line_no)?,
                "max_concurrent" => config.gpu.max_concurrent = parse(key, value, line_no)?,
                "prefill_tps" => config.gpu.prefill_tps = parse(key, value, line_no)?,
                "decode_tps" => config.gpu.decode_tps = parse(key, value, line_no)?,
                "decode_sharing_cap" => {
                    config.gpu.decode_sharing_cap = parse(key, value, line_no)?
                }
                "decode_efficiency" => config.gpu.decode_efficiency = parse(key, value, line_no)?,
                "scheduling" => {
                    config.policy.scheduling = parse_enum(key, value, line_no)?;
                }
                "memory_pressure_policy" => {
                    config.policy.memory_pressure_policy = parse_enum(key, value, line_no)?;
                }
                "eviction_policy" => {
                    config.policy.eviction_policy = parse_enum(key, value, line_no)?;
                }
                "routing_policy" => config.policy.routing_policy = value.to_string(),
                "safe_reservation" => {
                    config.policy.safe_reservation = parse_flag(key, value, line_no)?
                }
                "max_queue" => config.policy.max_queue = parse(key, value, line_no)?,
                "kv_bytes_per_token" => {
                    config.policy.kv_bytes_per_token = parse(key, value, line_no)?
                }
                "max_admission_retries" => {
                    config.policy.max_admission_retries = parse(key, value, line_no)?
                }
                "handoff_latency_us" => config.handoff.latency_us = parse(key, value, line_no)?,
                "handoff_bandwidth_gbps" => {
                    config.handoff.bandwidth_gbps = parse(key, value, line_no)?
                }
                "handoff_cost_weight" => config.handoff.cost_weight = parse(key, value, line_no)?,
                "timeseries_dt_ms" => config.timeseries_dt_ms = parse(key, value, line_no)?,
                "seed" => config.seed = parse(key, value, line_no)?,
                other => {
                    eprintln!("WARNING: ignoring unknown config key `{other}` (line {line_no})");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_gpus == 0 {
            return Err(ConfigError::Validation("num_gpus must be > 0".to_string()));
        }
        if self.gpu.prefill_tps <= 0.0 {
            return Err(ConfigError::Validation(
                "prefill_tps must be > 0".to_string(),
            ));
        }
        if self.gpu.decode_tps <= 0.0 {
            return Err(ConfigError::Validation("decode_tps must be > 0".to_string()));
        }
        if self.gpu.decode_sharing_cap == 0 {
            return Err(ConfigError::Validation(
                "decode_sharing_cap must be > 0".to_string(),
            ));
        }
        if !(self.gpu.decode_efficiency > 0.0 && self.gpu.decode_efficiency <= 1.0) {
            return Err(ConfigError::Validation(
                "decode_efficiency must be in (0, 1]".to_string(),
            ));
        }
        if self.gpu.max_concurrent == 0 {
            return Err(ConfigError::Validation(
                "max_concurrent must be > 0".to_string(),
            ));
        }
        if self.timeseries_dt_ms <= 0.0 {
            return Err(ConfigError::Validation(
                "timeseries_dt_ms must be > 0".to_string(),
            ));
        }
        if self.handoff.bandwidth_gbps <= 0.0 {
            return Err(ConfigError::Validation(
                "handoff_bandwidth_gbps must be > 0".to_string(),
            ));
        }
        if fleetsim_policies::policy_by_name(&self.policy.routing_policy).is_none() {
            return Err(ConfigError::Validation(format!(
                "unknown routing_policy `{}`; available: {:?}",
                self.policy.routing_policy,
                fleetsim_policies::available_policies(),
            )));
        }
        for link in &self.links {
            if link.src >= self.num_gpus || link.dest >= self.num_gpus {
                return Err(ConfigError::Validation(format!(
                    "link {} -> {} references an accelerator outside 0..{}",
                    link.src, link.dest, self.num_gpus,
                )));
            }
            if link.bandwidth_gbps <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "link {} -> {} must have positive bandwidth",
                    link.src, link.dest,
                )));
            }
        }
        Ok(())
    }

    /// The per-accelerator profiles for the fleet.
    pub fn gpu_configs(&self) -> Vec<GpuConfig> {
        vec![self.gpu.clone(); self.num_gpus]
    }

    /// Default link latency in milliseconds for the topology table.
    pub fn default_link_latency_ms(&self) -> f64 {
        self.handoff.latency_us / 1000.0
    }
}

fn parse<T: FromStr>(key: &str, value: &str, line: usize) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::BadValue {
        key: key.to_string(),
        line,
        value: value.to_string(),
    })
}

fn parse_enum<T>(key: &str, value: &str, line: usize) -> Result<T, ConfigError>
where
    T: FromStr<Err = String>,
{
    value.parse().map_err(|_| ConfigError::BadValue {
        key: key.to_string(),
        line,
        value: value.to_string(),
    })
}

/// Accepts 0/1 and true/false.
fn parse_flag(key: &str, value: &str, line: usize) -> Result<bool, ConfigError> {
    match value {
        "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        _ => Err(ConfigError::BadValue {
            key: key.to_string(),
            line,
            value: value.to_string(),
        }),
    }
}

fn parse_link<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    line: usize,
) -> Result<LinkSpec, ConfigError> {
    let mut next_field = |name: &str| -> Result<&'a str, ConfigError> {
        tokens.next().ok_or_else(|| ConfigError::BadValue {
            key: format!("link.{name}"),
            line,
            value: String::new(),
        })
    };
    let src = parse("link.src", next_field("src")?, line)?;
    let dest = parse("link.dest", next_field("dest")?, line)?;
    let bandwidth_gbps = parse("link.bw_gbps", next_field("bw_gbps")?, line)?;
    let latency_ms = parse("link.latency_ms", next_field("latency_ms")?, line)?;
    Ok(LinkSpec {
        src,
        dest,
        bandwidth_gbps,
        latency_ms,
    })
}
