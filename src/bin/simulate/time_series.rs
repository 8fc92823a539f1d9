// Per-tick JSONL time series recorder.
// One JSON line per tick and peer, for plotting spread paths.

use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
pub struct TickRecord {
    pub interval_minutes: u32,
    pub day: f64,
    pub peer: usize,
    pub remote_share: f64,
    pub error: f64,
    pub spread: f64,
    pub margin: f64,
    pub outbound: f64,
    pub inbound: f64,
}

#[derive(Debug, Default)]
pub struct TimeSeriesRecorder {
    records: Vec<TickRecord>,
}

impl TimeSeriesRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: TickRecord) {
        self.records.push(record);
    }

    /// Write all records to a JSONL file
    pub fn write_jsonl(&self, path: &std::path::Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path)?;
        for record in &self.records {
            let line = serde_json::to_string(record)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
