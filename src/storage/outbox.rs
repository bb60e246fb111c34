//! Outbox for undelivered trial records.
//!
//! Every trial passes through here on its way to the recorder and stays
//! until stored. Records leave strictly in arrival order and survive
//! restarts through a JSON file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, info};

use crate::types::TrialRecord;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Outbox {
    pending: VecDeque<TrialRecord>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, trial: TrialRecord) {
        self.pending.push_back(trial);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &TrialRecord> {
        self.pending.iter()
    }

    /// Oldest undelivered record.
    pub fn front(&self) -> Option<&TrialRecord> {
        self.pending.front()
    }

    pub fn pop_front(&mut self) -> Option<TrialRecord> {
        self.pending.pop_front()
    }

    /// Save pending records to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialise outbox")?;
        // Write then rename so a crash mid-write leaves the previous copy intact.
        let tmp = format!("{path}.tmp");
        std::fs::write(&tmp, &json).context(format!("Failed to write outbox to {tmp}"))?;
        std::fs::rename(&tmp, path).context(format!("Failed to move outbox into {path}"))?;
        debug!(path, pending = self.len(), "Outbox saved");
        Ok(())
    }

    /// Load pending records from a JSON file.
    /// Returns an empty outbox if the file doesn't exist.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::new());
        }
        let json = std::fs::read_to_string(path)
            .context(format!("Failed to read outbox from {path}"))?;
        let outbox: Outbox = serde_json::from_str(&json)
            .context(format!("Failed to parse outbox from {path}"))?;
        info!(path, pending = outbox.len(), "Outbox restored from disk");
        Ok(outbox)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Choice, Condition, Outcome};
    use chrono::Utc;
    use uuid::Uuid;

    fn trial(round: u32) -> TrialRecord {
        TrialRecord {
            participant_id: Uuid::new_v4(),
            block: 1,
            condition: Condition::Affective,
            round,
            choice: Choice::Risk,
            outcome: Outcome::Win,
            p_win: 0.5,
            win_streak: 1,
            loss_streak: 0,
            balance: 24,
            timestamp: Utc::now(),
            reaction_time_ms: 640.0,
        }
    }

    fn temp_path() -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("pulse_test_outbox_{}.json", Uuid::new_v4()));
        p.to_string_lossy().to_string()
    }

    #[test]
    fn test_front_is_oldest() {
        let mut outbox = Outbox::new();
        for round in 0..3 {
            outbox.push(trial(round));
        }
        assert_eq!(outbox.front().unwrap().round, 0);
        assert_eq!(outbox.pop_front().unwrap().round, 0);
        assert_eq!(outbox.front().unwrap().round, 1);
        assert_eq!(outbox.len(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path();
        let mut outbox = Outbox::new();
        outbox.push(trial(5));
        outbox.save(&path).unwrap();

        let loaded = Outbox::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.pending().next().unwrap().round, 5);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_nonexistent() {
        let loaded = Outbox::load("/tmp/pulse_outbox_does_not_exist_xyz.json").unwrap();
        assert!(loaded.is_empty());
    }
}
