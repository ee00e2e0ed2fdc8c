//! Report writers.
//!
//! A finished run is persisted into an output directory as four files:
//! `summary.json` (terminal counters and derived metrics), `events.jsonl`
//! (the ordered event log, one JSON object per line), `timeseries.csv`
//! (periodic samples, per-accelerator VRAM columns last), and
//! `run_meta.json` (the effective configuration and input paths, for
//! reproducing the run).

use crate::config::SimConfig;
use crate::metrics::{EventRecord, Summary, TimeseriesSample};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Metadata echoed alongside a run for reproducibility.
#[derive(Debug, Clone, Serialize)]
pub struct RunMeta<'a> {
    pub config_path: Option<&'a str>,
    pub trace_path: Option<&'a str>,
    pub seed: u64,
    pub config: &'a SimConfig,
}

/// Write all report files for a run.
pub fn write_reports(
    out_dir: &Path,
    summary: &Summary,
    events: &[EventRecord],
    samples: &[TimeseriesSample],
    meta: &RunMeta,
) -> Result<(), OutputError> {
    std::fs::create_dir_all(out_dir)?;
    write_summary_json(out_dir, summary)?;
    write_events_jsonl(out_dir, events)?;
    write_timeseries_csv(out_dir, samples)?;
    write_run_meta(out_dir, meta)?;
    Ok(())
}

pub fn write_summary_json(out_dir: &Path, summary: &Summary) -> Result<(), OutputError> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(out_dir.join("summary.json"), json)?;
    Ok(())
}

pub fn write_events_jsonl(out_dir: &Path, events: &[EventRecord]) -> Result<(), OutputError> {
    let file = std::fs::File::create(out_dir.join("events.jsonl"))?;
    let mut writer = std::io::BufWriter::new(file);
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writeln!(writer)?;
    }
    Ok(())
}

pub fn write_timeseries_csv(
    out_dir: &Path,
    samples: &[TimeseriesSample],
) -> Result<(), OutputError> {
    let file = std::fs::File::create(out_dir.join("timeseries.csv"))?;
    let mut writer = std::io::BufWriter::new(file);

    let num_gpus = samples.first().map_or(0, |s| s.vram_per_gpu.len());
    write!(
        writer,
        "time_ms,vram_used,active_prefill,active_decode,queue_depth,global_queue_depth,tokens_generated_delta,rejects_delta"
    )?;
    for gpu in 0..num_gpus {
        write!(writer, ",vram_gpu{gpu}")?;
    }
    writeln!(writer)?;

    for sample in samples {
        write!(
            writer,
            "{},{},{},{},{},{},{},{}",
            sample.time_ms,
            sample.vram_used,
            sample.active_prefill,
            sample.active_decode,
            sample.queue_depth,
            sample.global_queue_depth,
            sample.tokens_generated_delta,
            sample.rejects_delta,
        )?;
        for vram in &sample.vram_per_gpu {
            write!(writer, ",{vram}")?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

pub fn write_run_meta(out_dir: &Path, meta: &RunMeta) -> Result<(), OutputError> {
    let json = serde_json::to_string_pretty(meta)?;
    std::fs::write(out_dir.join("run_meta.json"), json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::EventKind;

    fn temp_out_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fleetsim-output-test-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_write_events_jsonl_round_trips() {
        let dir = temp_out_dir("events");
        let events = vec![
            EventRecord {
                time_ms: 0.0,
                kind: EventKind::Arrival,
                request: "r1".to_string(),
                gpu: 0,
            },
            EventRecord {
                time_ms: 5.5,
                kind: EventKind::Enqueue,
                request: "r2".to_string(),
                gpu: -1,
            },
        ];
        std::fs::create_dir_all(&dir).unwrap();
        write_events_jsonl(&dir, &events).unwrap();

        let content = std::fs::read_to_string(dir.join("events.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: EventRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, events[0]);
        assert!(lines[1].contains("\"enqueue\""));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_timeseries_csv_layout() {
        let dir = temp_out_dir("csv");
        let samples = vec![TimeseriesSample {
            time_ms: 20.0,
            vram_used: 300,
            active_prefill: 1,
            active_decode: 2,
            queue_depth: 3,
            global_queue_depth: 0,
            vram_per_gpu: vec![100, 200],
            tokens_generated_delta: 7,
            rejects_delta: 0,
        }];
        std::fs::create_dir_all(&dir).unwrap();
        write_timeseries_csv(&dir, &samples).unwrap();

        let content = std::fs::read_to_string(dir.join("timeseries.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("vram_gpu0,vram_gpu1"));
        assert_eq!(lines[1], "20,300,1,2,3,0,7,0,100,200");
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
