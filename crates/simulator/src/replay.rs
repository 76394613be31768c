//! Deterministic replay of persisted trials.
//!
//! A trial is fully determined by its settings and seed, so a stored
//! [`ResultRecord`] can be re-run and compared against what was written.

use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tpmsync_core::{EngineConfig, SettingsError, SyncEngine, TpmSettings};
use tpmsync_orchestrator::ResultRecord;
use tpmsync_types::{SessionResult, SessionStatus};
use tracing::{debug, instrument};

/// Errors raised while loading or replaying records.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("record settings rejected: {0}")]
    Settings(#[from] SettingsError),
}

/// A replayed trial next to the record it came from.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub seed: u64,
    pub recorded_status: SessionStatus,
    pub recorded_total_iterations: u64,
    pub recorded_learn_iterations: u64,
    pub result: SessionResult,
    pub weights_match: bool,
}

impl ReplayOutcome {
    /// Status, both iteration counters, and the weights all agree.
    pub fn matches(&self) -> bool {
        self.weights_match
            && self.result.status == self.recorded_status
            && self.result.total_iterations == self.recorded_total_iterations
            && self.result.learn_iterations == self.recorded_learn_iterations
    }
}

/// Read every record from a JSON-lines result file, skipping blank lines.
pub fn read_records(path: &Path) -> Result<Vec<ResultRecord>, ReplayError> {
    let read_err = |source| ReplayError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(read_err)?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(read_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| ReplayError::Decode {
            line: idx + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Rebuild the settings a record was produced with.
fn settings_of(record: &ResultRecord) -> Result<TpmSettings, ReplayError> {
    let topology: tpmsync_core::Topology = record.tpm_type.parse()?;
    let (layers, scalar) = if topology.takes_input_counts() {
        (record.n.as_slice(), record.k.last().copied().unwrap_or(0))
    } else {
        (record.k.as_slice(), record.n_0)
    };
    Ok(TpmSettings::build(
        layers,
        scalar,
        record.l,
        record.m,
        topology.name(),
        &record.learn_rule,
    )?)
}

/// Re-run the trial described by `record`.
///
/// A capped trial stops on the first pass past its cap, so a recorded
/// `LIMIT_REACHED` with `t` passes was capped at `t - 1`.
#[instrument(level = "debug", skip_all, fields(seed = record.seed))]
pub fn replay_record(record: &ResultRecord) -> Result<ReplayOutcome, ReplayError> {
    let settings = Arc::new(settings_of(record)?);
    let max_iterations = match record.status {
        SessionStatus::Finished => 0,
        SessionStatus::LimitReached => record.total_iterations.saturating_sub(1).max(1),
    };
    let engine = SyncEngine::new(
        settings,
        EngineConfig::default().with_max_iterations(max_iterations),
    );
    let result = engine.run(record.seed, None);
    let weights_match =
        result.final_weights == record.final_state && result.initial_weights == record.initial_state;
    debug!(
        status = %result.status,
        total_iterations = result.total_iterations,
        weights_match,
        "Trial replayed"
    );
    Ok(ReplayOutcome {
        seed: record.seed,
        recorded_status: record.status,
        recorded_total_iterations: record.total_iterations,
        recorded_learn_iterations: record.learn_iterations,
        result,
        weights_match,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn record_for(settings: TpmSettings, seed: u64, max_iterations: u64) -> ResultRecord {
        let engine = SyncEngine::new(
            Arc::new(settings.clone()),
            EngineConfig::default().with_max_iterations(max_iterations),
        );
        let result = engine.run(seed, None);
        ResultRecord::new("test", &settings, &result, SystemTime::now(), SystemTime::now())
    }

    #[test]
    fn test_finished_trial_replays_exactly() {
        let settings = TpmSettings::build(&[3], 4, 2, 1, "FULLY_CONNECTED", "HEBBIAN").unwrap();
        let record = record_for(settings, 42, 0);
        assert_eq!(record.status, SessionStatus::Finished);

        let outcome = replay_record(&record).unwrap();
        assert!(outcome.matches());
    }

    #[test]
    fn test_capped_trial_replays_with_recovered_cap() {
        let settings =
            TpmSettings::build(&[7, 5, 3], 6, 10, 5, "PARTIALLY_CONNECTED", "ANTI_HEBBIAN").unwrap();
        let record = record_for(settings, 9, 5);
        assert_eq!(record.status, SessionStatus::LimitReached);

        let outcome = replay_record(&record).unwrap();
        assert!(outcome.matches());
        assert_eq!(outcome.result.total_iterations, 6);
    }

    #[test]
    fn test_non_overlapped_settings_recovered() {
        let settings = TpmSettings::build(&[2, 2], 2, 2, 1, "NO_OVERLAP", "RANDOM_WALK").unwrap();
        let record = record_for(settings.clone(), 3, 2000);
        assert_eq!(settings_of(&record).unwrap(), settings);
        assert!(replay_record(&record).unwrap().matches());
    }

    #[test]
    fn test_tampered_record_detected() {
        let settings = TpmSettings::build(&[3], 4, 2, 1, "FULLY_CONNECTED", "HEBBIAN").unwrap();
        let mut record = record_for(settings, 42, 0);
        record.seed += 1;
        assert!(!replay_record(&record).unwrap().matches());
    }

    #[test]
    fn test_learn_counter_mismatch_detected() {
        let settings = TpmSettings::build(&[3], 4, 2, 1, "FULLY_CONNECTED", "HEBBIAN").unwrap();
        let mut record = record_for(settings, 42, 0);
        record.learn_iterations += 1;

        let outcome = replay_record(&record).unwrap();
        assert!(outcome.weights_match);
        assert_eq!(outcome.result.total_iterations, record.total_iterations);
        assert!(!outcome.matches());
    }

    #[test]
    fn test_read_records_reports_bad_line() {
        let settings = TpmSettings::build(&[3], 4, 2, 1, "FULLY_CONNECTED", "HEBBIAN").unwrap();
        let record = record_for(settings, 1, 0);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        let line = serde_json::to_string(&record).unwrap();
        std::fs::write(&path, format!("{line}\n\n{line}\nnot json\n")).unwrap();

        match read_records(&path) {
            Err(ReplayError::Decode { line, .. }) => assert_eq!(line, 4),
            other => panic!("expected decode error, got {other:?}"),
        }

        std::fs::write(&path, format!("{line}\n\n{line}\n")).unwrap();
        assert_eq!(read_records(&path).unwrap().len(), 2);
    }
}
