//! Record encoding
//!
//! Turns decoded log records into the line format stored in objects:
//!
//! ```text
//! <tag>: [<unix seconds>, {<fields>}]
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One decoded log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

impl LogRecord {
    pub fn new(timestamp: DateTime<Utc>, fields: Map<String, Value>) -> Self {
        LogRecord { timestamp, fields }
    }

    /// Seconds since the unix epoch with sub-second precision
    pub fn unix_seconds(&self) -> f64 {
        self.timestamp.timestamp() as f64
            + f64::from(self.timestamp.timestamp_subsec_nanos()) / 1_000_000_000.0
    }
}

/// Encode a batch of records, one line each
pub fn encode_batch(tag: &str, records: &[LogRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * 64);
    for record in records {
        encode_record(tag, record, &mut out);
    }
    out
}

fn encode_record(tag: &str, record: &LogRecord, out: &mut Vec<u8>) {
    out.extend_from_slice(tag.as_bytes());
    out.extend_from_slice(b": ");
    let line = Value::Array(vec![
        serde_json::json!(record.unix_seconds()),
        Value::Object(record.fields.clone()),
    ]);
    // Serializing a Value into a Vec cannot fail
    let _ = serde_json::to_writer(&mut *out, &line);
    out.push(b'\n');
}
