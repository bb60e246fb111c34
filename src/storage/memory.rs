//! In-memory trial recorder.
//!
//! Keeps every trial in a vector. Failures can be forced from test code
//! to exercise the host's retry path.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::TrialRecorder;
use crate::types::{PulseError, TrialRecord};

#[derive(Clone, Default)]
pub struct MemoryRecorder {
    trials: Arc<Mutex<Vec<TrialRecord>>>,
    /// If set, every `record` call fails with this message.
    force_error: Arc<Mutex<Option<String>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force all subsequent writes to fail.
    pub fn set_error(&self, msg: &str) {
        if let Ok(mut e) = self.force_error.lock() {
            *e = Some(msg.to_string());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut e) = self.force_error.lock() {
            *e = None;
        }
    }

    /// All trials stored so far, in arrival order.
    pub fn trials(&self) -> Vec<TrialRecord> {
        self.trials.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.trials.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TrialRecorder for MemoryRecorder {
    async fn record(&self, trial: &TrialRecord) -> Result<(), PulseError> {
        let forced = self
            .force_error
            .lock()
            .map_err(|_| PulseError::Recorder("memory recorder lock poisoned".into()))?
            .clone();
        if let Some(msg) = forced {
            return Err(PulseError::Recorder(msg));
        }
        self.trials
            .lock()
            .map_err(|_| PulseError::Recorder("memory recorder lock poisoned".into()))?
            .push(trial.clone());
        Ok(())
    }
}
