//! Cluster interconnect model.
//!
//! All-pairs bandwidth and latency between accelerators, computed once at
//! startup from declared links plus defaults. Multi-hop paths are folded in
//! with a bandwidth-maximizing closure: a relay path replaces a direct entry
//! when its harmonic-sum bandwidth beats it, carrying the summed latency
//! along. This is not shortest-latency routing; bandwidth wins ties over
//! latency by construction.

use serde::{Deserialize, Serialize};

/// A declared interconnect link between two accelerators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub src: usize,
    pub dest: usize,
    /// Link bandwidth in GB/s.
    pub bandwidth_gbps: f64,
    /// Link latency in milliseconds.
    pub latency_ms: f64,
}

/// All-pairs bandwidth/latency table.
#[derive(Debug, Clone)]
pub struct Topology {
    n: usize,
    /// GB/s, row-major. Diagonal is infinite.
    bandwidth: Vec<f64>,
    /// Milliseconds, row-major. Diagonal is zero.
    latency: Vec<f64>,
}

impl Topology {
    /// Build the table from defaults and declared links.
    ///
    /// Declared links relax both directions: latency takes the minimum,
    /// bandwidth the maximum. Then each intermediate accelerator `k` is
    /// considered as a relay for every pair.
    pub fn new(n: usize, default_bandwidth_gbps: f64, default_latency_ms: f64, links: &[LinkSpec]) -> Self {
        let mut topo = Self {
            n,
            bandwidth: vec![default_bandwidth_gbps; n * n],
            latency: vec![default_latency_ms; n * n],
        };
        for i in 0..n {
            topo.bandwidth[i * n + i] = f64::INFINITY;
            topo.latency[i * n + i] = 0.0;
        }

        for link in links {
            if link.src >= n || link.dest >= n {
                continue;
            }
            for (a, b) in [(link.src, link.dest), (link.dest, link.src)] {
                let at = a * n + b;
                topo.latency[at] = topo.latency[at].min(link.latency_ms);
                topo.bandwidth[at] = topo.bandwidth[at].max(link.bandwidth_gbps);
            }
        }

        // Bandwidth-maximizing closure. The combined bandwidth of i -> k -> j
        // is the harmonic sum of the two hops; latency is bookkept alongside
        // and only written when bandwidth improves.
        for k in 0..n {
            for i in 0..n {
                for j in 0..n {
                    if i == j {
                        continue;
                    }
                    let b_ik = topo.bandwidth[i * n + k];
                    let b_kj = topo.bandwidth[k * n + j];
                    let combined_bw = 1.0 / (1.0 / b_ik + 1.0 / b_kj);
                    if combined_bw > topo.bandwidth[i * n + j] {
                        topo.bandwidth[i * n + j] = combined_bw;
                        topo.latency[i * n + j] =
                            topo.latency[i * n + k] + topo.latency[k * n + j];
                    }
                }
            }
        }

        topo
    }

    pub fn num_gpus(&self) -> usize {
        self.n
    }

    /// Bandwidth in GB/s; infinite on the diagonal.
    pub fn bandwidth_gbps(&self, src: usize, dest: usize) -> f64 {
        self.bandwidth[src * self.n + dest]
    }

    /// Latency in milliseconds; zero on the diagonal.
    pub fn latency_ms(&self, src: usize, dest: usize) -> f64 {
        self.latency[src * self.n + dest]
    }

    /// Estimated transfer time for `bytes` from `src` to `dest`.
    ///
    /// Bandwidth is GB/s and the payload is a byte count, hence the 1e6
    /// divisor to land in milliseconds.
    pub fn transfer_ms(&self, src: usize, dest: usize, bytes: u64) -> f64 {
        if src == dest {
            return 0.0;
        }
        self.latency_ms(src, dest) + bytes as f64 / (self.bandwidth_gbps(src, dest) * 1e6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagonal() {
        let topo = Topology::new(3, 50.0, 0.5, &[]);
        assert_eq!(topo.bandwidth_gbps(1, 1), f64::INFINITY);
        assert_eq!(topo.latency_ms(1, 1), 0.0);
        assert_eq!(topo.transfer_ms(2, 2, 1 << 30), 0.0);
    }

    #[test]
    fn test_defaults_off_diagonal() {
        let topo = Topology::new(2, 50.0, 0.5, &[]);
        assert_eq!(topo.bandwidth_gbps(0, 1), 50.0);
        assert_eq!(topo.latency_ms(0, 1), 0.5);
    }

    #[test]
    fn test_link_relaxes_both_directions() {
        let links = vec![LinkSpec {
            src: 0,
            dest: 1,
            bandwidth_gbps: 200.0,
            latency_ms: 0.1,
        }];
        let topo = Topology::new(2, 50.0, 0.5, &links);
        assert_eq!(topo.bandwidth_gbps(0, 1), 200.0);
        assert_eq!(topo.bandwidth_gbps(1, 0), 200.0);
        assert_eq!(topo.latency_ms(0, 1), 0.1);
        assert_eq!(topo.latency_ms(1, 0), 0.1);
    }

    #[test]
    fn test_link_never_worsens_defaults() {
        let links = vec![LinkSpec {
            src: 0,
            dest: 1,
            bandwidth_gbps: 10.0,
            latency_ms: 2.0,
        }];
        let topo = Topology::new(2, 50.0, 0.5, &links);
        // Lower bandwidth and higher latency than the defaults are ignored.
        assert_eq!(topo.bandwidth_gbps(0, 1), 50.0);
        assert_eq!(topo.latency_ms(0, 1), 0.5);
    }

    #[test]
    fn test_out_of_range_link_ignored() {
        let links = vec![LinkSpec {
            src: 0,
            dest: 5,
            bandwidth_gbps: 400.0,
            latency_ms: 0.01,
        }];
        let topo = Topology::new(2, 50.0, 0.5, &links);
        assert_eq!(topo.bandwidth_gbps(0, 1), 50.0);
    }

    #[test]
    fn test_relay_closure_improves_bandwidth() {
        // Two fat links 0-1 and 1-2; the 0-2 default is thin. The relay path
        // through 1 has harmonic bandwidth 100 GB/s, beating the 10 GB/s
        // default, and carries the summed latency.
        let links = vec![
            LinkSpec {
                src: 0,
                dest: 1,
                bandwidth_gbps: 200.0,
                latency_ms: 0.1,
            },
            LinkSpec {
                src: 1,
                dest: 2,
                bandwidth_gbps: 200.0,
                latency_ms: 0.1,
            },
        ];
        let topo = Topology::new(3, 10.0, 1.0, &links);
        assert!((topo.bandwidth_gbps(0, 2) - 100.0).abs() < 1e-9);
        assert!((topo.latency_ms(0, 2) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_transfer_ms_numeric_convention() {
        let topo = Topology::new(2, 50.0, 0.5, &[]);
        // 100 MB at 50 GB/s = 2ms of wire time, plus 0.5ms latency.
        let bytes = 100_000_000u64;
        assert!((topo.transfer_ms(0, 1, bytes) - 2.5).abs() < 1e-9);
    }
}
