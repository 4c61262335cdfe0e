//! Firing history: a bounded, newest-first record list persisted as one
//! JSON blob, plus a minute-resolution CSV trace per firing.
//!
//! Persistence problems here are logged and swallowed; live control
//! never depends on history writes succeeding.

use kiln_shared::StoreError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const MAX_RECORDS: usize = 20;

/// Upper bound on the history blob; anything larger is treated as corrupt.
const MAX_JSON_BYTES: usize = 32 * 1024;

const HISTORY_FILE: &str = "history.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FiringOutcome {
    Complete,
    Error,
    Aborted,
}

impl From<FiringOutcome> for u8 {
    fn from(outcome: FiringOutcome) -> u8 {
        match outcome {
            FiringOutcome::Complete => 0,
            FiringOutcome::Error => 1,
            FiringOutcome::Aborted => 2,
        }
    }
}

impl TryFrom<u8> for FiringOutcome {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(FiringOutcome::Complete),
            1 => Ok(FiringOutcome::Error),
            2 => Ok(FiringOutcome::Aborted),
            other => Err(format!("unknown outcome {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: u32,
    /// Wall-clock start, seconds since the Unix epoch.
    pub start_time: i64,
    pub profile_name: String,
    pub profile_id: String,
    pub peak_temp: f32,
    pub duration_s: u32,
    pub outcome: FiringOutcome,
    pub error_code: i32,
}

struct ActiveFiring {
    record: HistoryRecord,
    writer: Option<csv::Writer<File>>,
    sample_count: u32,
}

struct Recording {
    next_id: u32,
    active: Option<ActiveFiring>,
}

pub struct HistoryStore {
    dir: PathBuf,
    inner: Mutex<Recording>,
}

impl HistoryStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Io(e.to_string()))?;
        let store = Self {
            dir,
            inner: Mutex::new(Recording {
                next_id: 1,
                active: None,
            }),
        };
        let records = store.load_records();
        if let Some(newest) = records.first() {
            store.inner.lock().expect("history lock poisoned").next_id = newest.id + 1;
        }
        tracing::info!(
            existing = records.len(),
            "history initialized"
        );
        Ok(store)
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    fn trace_path(&self, id: u32) -> PathBuf {
        self.dir.join(format!("trc_{id}.csv"))
    }

    fn load_records(&self) -> Vec<HistoryRecord> {
        let bytes = match std::fs::read(self.history_path()) {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        if bytes.len() > MAX_JSON_BYTES {
            tracing::warn!(len = bytes.len(), "history blob oversized, ignoring");
            return Vec::new();
        }
        match serde_json::from_slice::<Vec<HistoryRecord>>(&bytes) {
            Ok(mut records) => {
                records.truncate(MAX_RECORDS);
                records
            }
            Err(e) => {
                tracing::warn!("corrupt history blob: {}", e);
                Vec::new()
            }
        }
    }

    fn save_records(&self, records: &[HistoryRecord]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(records).map_err(|e| StoreError::Io(e.to_string()))?;
        std::fs::write(self.history_path(), bytes).map_err(|e| StoreError::Io(e.to_string()))
    }

    pub fn is_recording(&self) -> bool {
        self.inner.lock().expect("history lock poisoned").active.is_some()
    }

    /// Begin a firing session: allocate an id and open its trace file.
    pub fn firing_start(&self, profile_id: &str, profile_name: &str, start_epoch_s: i64) {
        let mut inner = self.inner.lock().expect("history lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;

        let writer = match File::create(self.trace_path(id)) {
            Ok(file) => {
                let mut w = csv::Writer::from_writer(file);
                if let Err(e) = w.write_record(["time_s", "temp_c"]) {
                    tracing::warn!("trace header write failed: {}", e);
                }
                Some(w)
            }
            Err(e) => {
                tracing::warn!("could not open trace file: {}", e);
                None
            }
        };

        inner.active = Some(ActiveFiring {
            record: HistoryRecord {
                id,
                start_time: start_epoch_s,
                profile_name: profile_name.to_string(),
                profile_id: profile_id.to_string(),
                peak_temp: 0.0,
                duration_s: 0,
                outcome: FiringOutcome::Complete,
                error_code: 0,
            },
            writer,
            sample_count: 0,
        });
        tracing::info!(id, profile = profile_name, "firing recording started");
    }

    /// Append one minute-resolution sample to the active trace.
    pub fn record_temp(&self, temp_c: f32) {
        let mut inner = self.inner.lock().expect("history lock poisoned");
        let Some(active) = inner.active.as_mut() else {
            return;
        };
        if let Some(writer) = active.writer.as_mut() {
            let row = [
                (active.sample_count * 60).to_string(),
                format!("{temp_c:.1}"),
            ];
            if let Err(e) = writer.write_record(row) {
                tracing::warn!("trace write failed: {}", e);
            } else if let Err(e) = writer.flush() {
                tracing::warn!("trace flush failed: {}", e);
            }
        }
        active.sample_count += 1;
        if temp_c > active.record.peak_temp {
            active.record.peak_temp = temp_c;
        }
    }

    /// Close the active session and persist it. No-op when idle.
    pub fn firing_end(
        &self,
        outcome: FiringOutcome,
        peak_temp_c: f32,
        duration_s: u32,
        error_code: i32,
    ) {
        let mut inner = self.inner.lock().expect("history lock poisoned");
        let Some(mut active) = inner.active.take() else {
            return;
        };
        drop(inner);

        active.record.outcome = outcome;
        active.record.peak_temp = active.record.peak_temp.max(peak_temp_c);
        active.record.duration_s = duration_s;
        active.record.error_code = error_code;
        if let Some(writer) = active.writer.take() {
            if let Err(e) = writer.into_inner() {
                tracing::warn!("trace close failed: {}", e);
            }
        }

        let mut records = self.load_records();
        records.insert(0, active.record.clone());
        while records.len() > MAX_RECORDS {
            if let Some(evicted) = records.pop() {
                if let Err(e) = std::fs::remove_file(self.trace_path(evicted.id)) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(id = evicted.id, "evicted trace removal failed: {}", e);
                    }
                }
            }
        }
        if let Err(e) = self.save_records(&records) {
            tracing::warn!("history save failed: {}", e);
        }

        tracing::info!(
            id = active.record.id,
            ?outcome,
            peak = active.record.peak_temp,
            duration_s,
            "firing recording ended"
        );
    }

    /// All records, newest first.
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.load_records()
    }

    pub fn trace_csv(&self, id: u32) -> Result<String, StoreError> {
        std::fs::read_to_string(self.trace_path(id))
            .map_err(|_| StoreError::NotFound(format!("trace {id}")))
    }

    /// Drop all records and their traces.
    pub fn clear(&self) {
        for record in self.load_records() {
            let _ = std::fs::remove_file(self.trace_path(record.id));
        }
        let _ = std::fs::remove_file(self.history_path());
    }
}
