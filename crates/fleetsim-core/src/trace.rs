//! Request trace ingestion.
//!
//! Traces are whitespace-separated text, one request per line:
//!
//! ```text
//! # id  arrival_ms  prompt_tokens  gen_tokens  streaming
//! req1  0           200            400         0
//! req2  50          150            300         1
//! ```
//!
//! Blank lines and `#` comments are skipped. File order defines request
//! indices, which feed event records and eviction bookkeeping, so lines are
//! never re-sorted.

use crate::request::Request;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to read trace file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed trace line {line}: {content}")]
    Malformed { line: usize, content: String },
}

/// Load a trace file.
pub fn load_trace(path: &Path) -> Result<Vec<Request>, TraceError> {
    let file = std::fs::File::open(path)?;
    parse_trace(BufReader::new(file))
}

/// Parse a trace from any reader.
pub fn parse_trace<R: Read>(reader: BufReader<R>) -> Result<Vec<Request>, TraceError> {
    let mut requests = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        let parsed = (|| {
            let id = fields.next()?;
            let arrival: f64 = fields.next()?.parse().ok()?;
            let prompt: u32 = fields.next()?.parse().ok()?;
            let gen: u32 = fields.next()?.parse().ok()?;
            let streaming: u32 = fields.next()?.parse().ok()?;
            Some(Request::new(id, arrival, prompt, gen, streaming != 0))
        })();
        match parsed {
            Some(request) => requests.push(request),
            None => {
                return Err(TraceError::Malformed {
                    line: line_num + 1,
                    content: trimmed.to_string(),
                })
            }
        }
    }
    Ok(requests)
}

/// Write requests back out in the trace format.
pub fn write_trace(requests: &[Request], path: &Path) -> Result<(), TraceError> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    writeln!(writer, "# id arrival_ms prompt_tokens gen_tokens streaming")?;
    for req in requests {
        writeln!(
            writer,
            "{} {} {} {} {}",
            req.id,
            req.arrival_time_ms,
            req.prompt_tokens,
            req.gen_tokens,
            u32::from(req.streaming),
        )?;
    }
    Ok(())
}
