//! SQLite trial recorder.
//!
//! Stores trials in an `experiment_data` table whose columns follow the
//! trial record contract order.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::TrialRecorder;
use crate::types::{PulseError, TrialRecord};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS experiment_data (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    participant_id   TEXT    NOT NULL,
    block            INTEGER NOT NULL,
    condition        TEXT    NOT NULL,
    round            INTEGER NOT NULL,
    choice           TEXT    NOT NULL,
    outcome          TEXT    NOT NULL,
    p_win            REAL    NOT NULL,
    win_streak       INTEGER NOT NULL,
    loss_streak      INTEGER NOT NULL,
    balance          INTEGER NOT NULL,
    timestamp        TEXT    NOT NULL,
    reaction_time_ms REAL    NOT NULL
)
"#;

const INSERT_TRIAL: &str = r#"
INSERT INTO experiment_data (
    participant_id, block, condition, round, choice, outcome, p_win,
    win_streak, loss_streak, balance, timestamp, reaction_time_ms
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

pub struct SqliteRecorder {
    pool: SqlitePool,
}

impl SqliteRecorder {
    /// Open (creating if missing) the database and ensure the table exists.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid SQLite URL: {url}"))?
            .create_if_missing(true);
        // SQLite takes one writer at a time; a single connection also keeps
        // `sqlite::memory:` databases shared across calls.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database: {url}"))?;

        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .context("Failed to create experiment_data table")?;

        info!(url, "SQLite recorder connected");
        Ok(Self { pool })
    }

    /// Number of stored trials.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM experiment_data")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count trials")?;
        Ok(count)
    }
}

#[async_trait]
impl TrialRecorder for SqliteRecorder {
    async fn record(&self, trial: &TrialRecord) -> Result<(), PulseError> {
        sqlx::query(INSERT_TRIAL)
            .bind(trial.participant_id.to_string())
            .bind(trial.block as i64)
            .bind(trial.condition.label())
            .bind(trial.round as i64)
            .bind(trial.choice.to_string())
            .bind(trial.outcome.to_string())
            .bind(trial.p_win)
            .bind(trial.win_streak as i64)
            .bind(trial.loss_streak as i64)
            .bind(trial.balance)
            .bind(trial.timestamp.to_rfc3339())
            .bind(trial.reaction_time_ms)
            .execute(&self.pool)
            .await
            .map_err(|e| PulseError::Recorder(format!("sqlite insert: {e}")))?;

        debug!(participant = %trial.participant_id, round = trial.round, "Trial inserted");
        Ok(())
    }
}
