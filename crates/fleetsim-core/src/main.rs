//! FleetSim CLI — replay an inference trace against a simulated accelerator
//! fleet and write the reports.

use clap::Parser;
use fleetsim_core::config::SimConfig;
use fleetsim_core::output::{self, RunMeta};
use fleetsim_core::request::Request;
use fleetsim_core::{metrics, trace};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "fleetsim",
    about = "Simulate LLM inference serving across an accelerator fleet",
    version
)]
struct Cli {
    /// Path to the key/value configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Path to the request trace file.
    #[arg(short, long)]
    trace: Option<PathBuf>,
    /// Output directory for summary.json, events.jsonl, timeseries.csv.
    #[arg(short, long, default_value = "runs/demo")]
    out: PathBuf,
    /// Override the configured RNG seed.
    #[arg(short, long)]
    seed: Option<u64>,
}

fn main() {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) if path.exists() => SimConfig::from_file(path).unwrap_or_else(|e| {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }),
        Some(path) => {
            eprintln!(
                "WARNING: config file {} not found, using defaults",
                path.display()
            );
            SimConfig::default()
        }
        None => SimConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }

    let requests = match &cli.trace {
        Some(path) => trace::load_trace(path).unwrap_or_else(|e| {
            eprintln!("Error loading trace: {}", e);
            std::process::exit(1);
        }),
        None => {
            eprintln!("No trace file specified, running the built-in demo workload");
            demo_requests()
        }
    };

    let outcome = fleetsim_core::run_simulation(&config, requests).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    println!("{}", metrics::format_table(&outcome.summary));

    let meta = RunMeta {
        config_path: cli.config.as_ref().and_then(|p| p.to_str()),
        trace_path: cli.trace.as_ref().and_then(|p| p.to_str()),
        seed: config.seed,
        config: &config,
    };
    if let Err(e) = output::write_reports(
        &cli.out,
        &outcome.summary,
        &outcome.events,
        &outcome.samples,
        &meta,
    ) {
        eprintln!("Error writing reports: {}", e);
        std::process::exit(1);
    }
    println!("Reports written to {}", cli.out.display());
}

/// Tiny fallback workload for running without a trace file.
fn demo_requests() -> Vec<Request> {
    vec![
        Request::new("req1", 0.0, 200, 400, false),
        Request::new("req2", 50.0, 150, 300, false),
    ]
}
