//! CSV trial recorder.
//!
//! Appends one row per trial in contract column order. The header is
//! written only when the file is created, so restarts keep appending to
//! the same table. File I/O runs on tokio's blocking pool.

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::TrialRecorder;
use crate::types::{PulseError, TrialRecord};

pub struct CsvRecorder {
    path: Arc<PathBuf>,
    // Serializes appends from concurrent blocking tasks.
    lock: Arc<Mutex<()>>,
}

impl CsvRecorder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Arc::new(path.as_ref().to_path_buf()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn append(path: &Path, lock: &Mutex<()>, trial: &TrialRecord) -> Result<(), PulseError> {
    let _guard = lock
        .lock()
        .map_err(|_| PulseError::Recorder("csv writer lock poisoned".into()))?;

    let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PulseError::Recorder(format!("open {}: {e}", path.display())))?;

    let mut writer = ::csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    writer
        .serialize(trial)
        .map_err(|e| PulseError::Recorder(format!("csv write: {e}")))?;
    writer
        .flush()
        .map_err(|e| PulseError::Recorder(format!("csv flush: {e}")))?;

    debug!(path = %path.display(), round = trial.round, "Trial appended to CSV");
    Ok(())
}

#[async_trait]
impl TrialRecorder for CsvRecorder {
    async fn record(&self, trial: &TrialRecord) -> Result<(), PulseError> {
        let path = Arc::clone(&self.path);
        let lock = Arc::clone(&self.lock);
        let trial = trial.clone();
        tokio::task::spawn_blocking(move || append(&path, &lock, &trial))
            .await
            .map_err(|e| PulseError::Recorder(format!("csv writer task failed: {e}")))?
    }
}
