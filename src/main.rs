//! bucket-sink
//!
//! Reads newline-delimited JSON records from stdin and rolls them into
//! objects in a bucket:
//!
//! ```text
//! {"tag": "cpu.local", "time": 1700000000.25, "record": {"cpu": 12}}
//! ```
//!
//! Records are batched per tag and flushed once a second or when a batch is
//! full. Everything open is committed on EOF or Ctrl-C.

use bucket_sink::observability::{init_tracing, LoggingConfig};
use bucket_sink::output::{encode_batch, FlushStatus, LogRecord, OutputConfig, OutputInstance};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

const CONFIG_ENV: &str = "BUCKET_SINK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "bucket-sink.toml";
const BATCH_MAX_RECORDS: usize = 500;
const BATCH_INTERVAL: Duration = Duration::from_secs(1);
const MAX_FLUSH_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// One line of input
#[derive(Debug, Deserialize)]
struct InputLine {
    tag: String,
    /// Unix seconds, fractional part allowed
    time: f64,
    #[serde(default)]
    record: Map<String, Value>,
}

fn to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1_000_000_000.0) as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
}

fn parse_line(line: &str) -> Result<(String, LogRecord), String> {
    let input: InputLine = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let timestamp = to_datetime(input.time).ok_or_else(|| format!("invalid time {}", input.time))?;
    Ok((input.tag, LogRecord::new(timestamp, input.record)))
}

/// Flush one batch, retrying with exponential backoff while the output asks for it
async fn flush_with_retry(output: &mut OutputInstance, tag: &str, records: &[LogRecord]) -> bool {
    let payload = Bytes::from(encode_batch(tag, records));
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 1..=MAX_FLUSH_ATTEMPTS {
        match output.flush(tag, payload.clone()).await {
            FlushStatus::Ok => return true,
            FlushStatus::Retry if attempt < MAX_FLUSH_ATTEMPTS => {
                warn!(tag, attempt, backoff_ms = backoff.as_millis() as u64, "retrying batch");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            FlushStatus::Retry => {}
        }
    }

    error!(
        tag,
        records = records.len(),
        "dropping batch after {} attempts",
        MAX_FLUSH_ATTEMPTS
    );
    false
}

async fn flush_pending(output: &mut OutputInstance, pending: &mut HashMap<String, Vec<LogRecord>>) {
    for (tag, records) in pending.drain() {
        if !records.is_empty() {
            flush_with_retry(output, &tag, &records).await;
        }
    }
}

fn config_path() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing(&LoggingConfig::from_env())?;

    let path = config_path();
    let config = OutputConfig::load(&path)
        .map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
    let mut output = OutputInstance::from_config(config)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: HashMap<String, Vec<LogRecord>> = HashMap::new();
    let mut tick = tokio::time::interval(BATCH_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut read = 0u64;
    let mut rejected = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    read += 1;
                    match parse_line(&line) {
                        Ok((tag, record)) => {
                            let batch = pending.entry(tag.clone()).or_default();
                            batch.push(record);
                            if batch.len() >= BATCH_MAX_RECORDS {
                                let records = std::mem::take(batch);
                                flush_with_retry(&mut output, &tag, &records).await;
                            }
                        }
                        Err(e) => {
                            rejected += 1;
                            warn!(line = read, error = %e, "skipping malformed input line");
                        }
                    }
                }
                Ok(None) => {
                    info!("end of input");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "failed to read input");
                    break;
                }
            },
            _ = tick.tick() => flush_pending(&mut output, &mut pending).await,
            _ = &mut shutdown => {
                info!("interrupted, committing open objects");
                break;
            }
        }
    }

    flush_pending(&mut output, &mut pending).await;
    output.shutdown().await;
    info!(records = read, rejected, "done");

    Ok(())
}
