//! Write-only telemetry sinks.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::warn;

use super::TelemetryRecord;

/// Destination for telemetry records. Implementations must not fail loudly.
pub trait TelemetrySink: Send + Sync {
    /// Store one record.
    fn write(&self, record: &TelemetryRecord);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn write(&self, _record: &TelemetryRecord) {}
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl MemorySink {
    /// Copy of everything recorded so far.
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records.lock().clone()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl TelemetrySink for MemorySink {
    fn write(&self, record: &TelemetryRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl TelemetrySink for JsonLinesSink {
    fn write(&self, record: &TelemetryRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to encode telemetry record");
                return;
            }
        };

        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            warn!(error = %e, "Failed to write telemetry record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TelemetryEvent;
    use time::OffsetDateTime;

    #[test]
    fn json_lines_appends_one_object_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.jsonl");
        let sink = JsonLinesSink::create(&path).unwrap();

        for cycles in [1, 2] {
            sink.write(&TelemetryRecord {
                at: OffsetDateTime::now_utc(),
                event: TelemetryEvent::Detection {
                    iteration: 7,
                    scope: "cross".to_string(),
                    cycles,
                    fallback: false,
                },
            });
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["cycles"], 2);
        assert_eq!(lines[0]["event"], "detection");
    }
}
