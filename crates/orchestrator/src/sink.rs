//! Where finished trials go.

use crate::clock::unix_millis;
use crate::error::SinkError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tpmsync_core::TpmSettings;
use tpmsync_types::{SessionResult, SessionStatus, TensorPair};

/// Persists finished trials.
///
/// Called from worker threads; implementations synchronize internally. A
/// failure affects only the one record.
pub trait ResultSink: Send + Sync {
    fn record(
        &self,
        settings: &TpmSettings,
        result: &SessionResult,
        start: SystemTime,
        end: SystemTime,
    ) -> Result<(), SinkError>;

    /// Push buffered records to durable storage.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// One persisted trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub host: String,
    pub seed: u64,
    pub program_version: String,
    pub tpm_type: String,
    pub learn_rule: String,
    pub k: Vec<usize>,
    pub n: Vec<usize>,
    pub n_0: usize,
    pub l: i32,
    pub m: i32,
    pub h: usize,
    pub data_size: usize,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    pub status: SessionStatus,
    pub total_iterations: u64,
    pub learn_iterations: u64,
    pub initial_state: TensorPair,
    pub final_state: TensorPair,
}

impl ResultRecord {
    pub fn new(
        host: &str,
        settings: &TpmSettings,
        result: &SessionResult,
        start: SystemTime,
        end: SystemTime,
    ) -> Self {
        Self {
            host: host.to_string(),
            seed: result.seed,
            program_version: env!("CARGO_PKG_VERSION").to_string(),
            tpm_type: settings.topology().name().to_string(),
            learn_rule: settings.learn_rule().name().to_string(),
            k: settings.k().to_vec(),
            n: settings.n().to_vec(),
            n_0: settings.n()[0],
            l: settings.l(),
            m: settings.m(),
            h: settings.h(),
            data_size: settings.data_size(),
            start_time_ms: unix_millis(start),
            end_time_ms: unix_millis(end),
            status: result.status,
            total_iterations: result.total_iterations,
            learn_iterations: result.learn_iterations,
            initial_state: result.initial_weights.clone(),
            final_state: result.final_weights.clone(),
        }
    }
}

/// Best-effort name of this machine.
pub fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn record(
        &self,
        _settings: &TpmSettings,
        _result: &SessionResult,
        _start: SystemTime,
        _end: SystemTime,
    ) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug)]
pub struct MemorySink {
    host: String,
    records: Mutex<Vec<ResultRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            host: host_name(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<ResultRecord> {
        self.records.lock().expect("memory sink lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("memory sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink for MemorySink {
    fn record(
        &self,
        settings: &TpmSettings,
        result: &SessionResult,
        start: SystemTime,
        end: SystemTime,
    ) -> Result<(), SinkError> {
        let record = ResultRecord::new(&self.host, settings, result, start, end);
        self.records
            .lock()
            .expect("memory sink lock poisoned")
            .push(record);
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    host: String,
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            host: host_name(),
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonLinesSink {
    fn record(
        &self,
        settings: &TpmSettings,
        result: &SessionResult,
        start: SystemTime,
        end: SystemTime,
    ) -> Result<(), SinkError> {
        let record = ResultRecord::new(&self.host, settings, result, start, end);
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.writer
            .lock()
            .expect("json sink lock poisoned")
            .write_all(&line)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.writer
            .lock()
            .expect("json sink lock poisoned")
            .flush()?;
        Ok(())
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        if let Ok(writer) = self.writer.get_mut() {
            if let Err(e) = writer.flush() {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to flush results");
            }
        }
    }
}
