//! Persistence layer.
//!
//! Defines the `TrialRecorder` trait and its backends:
//! - CSV file: one row per trial, header written on creation
//! - SQLite: `experiment_data` table via sqlx
//! - Memory: for tests and dry runs
//!
//! Trials reach the recorder through `TrialDelivery`, a background worker
//! that queues them in the `Outbox` and delivers them in order, so a
//! failing or slow recorder never blocks gameplay.

pub mod csv_file;
pub mod delivery;
pub mod sqlite;
pub mod memory;
pub mod outbox;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::{StorageBackend, StorageConfig};
use crate::types::{PulseError, TrialRecord};

pub use csv_file::CsvRecorder;
pub use delivery::{DeliveryOptions, TrialDelivery};
pub use memory::MemoryRecorder;
pub use outbox::Outbox;
pub use sqlite::SqliteRecorder;

/// Sink for finalized trial records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrialRecorder: Send + Sync {
    /// Persist one trial. An error means the record was not stored.
    async fn record(&self, trial: &TrialRecord) -> Result<(), PulseError>;
}

/// Build the recorder selected in the storage configuration.
pub async fn build_recorder(config: &StorageConfig) -> Result<Arc<dyn TrialRecorder>> {
    let recorder: Arc<dyn TrialRecorder> = match config.backend {
        StorageBackend::Csv => Arc::new(CsvRecorder::new(&config.csv_path)),
        StorageBackend::Sqlite => Arc::new(SqliteRecorder::connect(&config.sqlite_url).await?),
        StorageBackend::Memory => Arc::new(MemoryRecorder::new()),
    };
    info!(backend = ?config.backend, "Trial recorder ready");
    Ok(recorder)
}
