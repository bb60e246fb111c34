//! Ordered background delivery of trial records.
//!
//! The host hands each finalized trial to `TrialDelivery::submit`, which
//! only enqueues it. A single worker task appends the trial to the outbox
//! and drains the outbox front to back, so the recorder sees trials in
//! submission order even across failures. A slow or hung recorder delays
//! delivery, never gameplay. Each recorder call is bounded by a timeout.
//!
//! When an outbox path is configured, the pending queue is written to disk
//! whenever it changes, so a crash loses nothing that was not yet stored.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use super::{Outbox, TrialRecorder};
use crate::config::StorageConfig;
use crate::types::TrialRecord;

#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Upper bound on a single recorder call; on expiry the trial stays queued.
    pub record_timeout: Duration,
    /// Where the pending queue is mirrored. `None` keeps it in memory only.
    pub outbox_path: Option<String>,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            record_timeout: Duration::from_secs(10),
            outbox_path: None,
        }
    }
}

impl From<&StorageConfig> for DeliveryOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            record_timeout: Duration::from_millis(config.record_timeout_ms.max(1)),
            outbox_path: Some(config.outbox_path.clone()),
        }
    }
}

enum Job {
    Trial(TrialRecord),
    /// Answered once every job queued before it has been handled.
    Sync(oneshot::Sender<()>),
}

/// State shared by the handle and the worker.
struct Queue {
    recorder: Arc<dyn TrialRecorder>,
    outbox: Mutex<Outbox>,
    // Only one drain talks to the recorder at a time.
    drain_gate: Mutex<()>,
    options: DeliveryOptions,
}

impl Queue {
    async fn park(&self, trial: TrialRecord) -> usize {
        let mut outbox = self.outbox.lock().await;
        outbox.push(trial);
        outbox.len()
    }

    /// Deliver pending trials front to back, stopping at the first failure.
    /// The outbox lock is never held across a recorder call.
    async fn drain(&self) -> usize {
        let _gate = self.drain_gate.lock().await;
        let mut delivered = 0;
        loop {
            let Some(trial) = self.outbox.lock().await.front().cloned() else {
                break;
            };
            let result = tokio::time::timeout(
                self.options.record_timeout,
                self.recorder.record(&trial),
            )
            .await;
            match result {
                Ok(Ok(())) => {
                    self.outbox.lock().await.pop_front();
                    delivered += 1;
                }
                Ok(Err(e)) => {
                    warn!(
                        participant = %trial.participant_id,
                        block = trial.block,
                        round = trial.round,
                        error = %e,
                        "Trial not recorded, kept in outbox"
                    );
                    break;
                }
                Err(_) => {
                    warn!(
                        participant = %trial.participant_id,
                        block = trial.block,
                        round = trial.round,
                        timeout_ms = self.options.record_timeout.as_millis() as u64,
                        "Recorder timed out, trial kept in outbox"
                    );
                    break;
                }
            }
        }
        if delivered > 0 {
            debug!(delivered, "Outbox drained");
        }
        delivered
    }

    /// Mirror the outbox to disk, off the async workers.
    async fn persist(&self) {
        let Some(path) = self.options.outbox_path.clone() else {
            return;
        };
        let snapshot = self.outbox.lock().await.clone();
        let saved = tokio::task::spawn_blocking(move || snapshot.save(&path)).await;
        match saved {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Failed to persist outbox"),
            Err(e) => error!(error = %e, "Outbox persist task failed"),
        }
    }
}

async fn run_worker(queue: Arc<Queue>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Trial(trial) => {
                let queued = queue.park(trial).await;
                queue.drain().await;
                let pending = queue.outbox.lock().await.len();
                // Persist whenever the queue was or still is non-empty.
                if queued > 1 || pending > 0 {
                    queue.persist().await;
                }
            }
            Job::Sync(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Delivery worker stopped");
}

/// Handle to the delivery worker. Dropping it stops the worker once the
/// queued jobs are handled.
pub struct TrialDelivery {
    queue: Arc<Queue>,
    tx: mpsc::UnboundedSender<Job>,
}

impl TrialDelivery {
    /// Start the worker on the current tokio runtime. `outbox` holds records
    /// left over from a previous run; they are delivered ahead of new ones.
    pub fn spawn(
        recorder: Arc<dyn TrialRecorder>,
        outbox: Outbox,
        options: DeliveryOptions,
    ) -> Self {
        let queue = Arc::new(Queue {
            recorder,
            outbox: Mutex::new(outbox),
            drain_gate: Mutex::new(()),
            options,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(Arc::clone(&queue), rx));
        Self { queue, tx }
    }

    /// Enqueue a trial. Returns immediately.
    pub async fn submit(&self, trial: TrialRecord) {
        if let Err(mpsc::error::SendError(job)) = self.tx.send(Job::Trial(trial)) {
            // Worker gone: keep the record rather than drop it.
            if let Job::Trial(trial) = job {
                error!(round = trial.round, "Delivery worker unavailable, parking trial");
                self.queue.park(trial).await;
                self.queue.persist().await;
            }
        }
    }

    /// Wait until every trial submitted so far has been handled.
    pub async fn sync(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Job::Sync(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Retry the outbox now. Returns how many trials were stored.
    pub async fn retry(&self) -> usize {
        let delivered = self.queue.drain().await;
        if delivered > 0 {
            let pending = self.pending_len().await;
            info!(
                delivered,
                pending,
                "Outbox retry delivered trials"
            );
            self.queue.persist().await;
        }
        delivered
    }

    pub async fn pending_len(&self) -> usize {
        self.queue.outbox.lock().await.len()
    }

    pub async fn snapshot(&self) -> Outbox {
        self.queue.outbox.lock().await.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRecorder;
    use crate::types::{Choice, Condition, Outcome, PulseError};
    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    fn trial(round: u32) -> TrialRecord {
        TrialRecord {
            participant_id: Uuid::nil(),
            block: 1,
            condition: Condition::Visual,
            round,
            choice: Choice::Safe,
            outcome: Outcome::Safe,
            p_win: 0.5,
            win_streak: 0,
            loss_streak: 0,
            balance: 21 + round as i64,
            timestamp: Utc::now(),
            reaction_time_ms: 400.0,
        }
    }

    fn temp_path() -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("pulse_test_delivery_{}.json", Uuid::new_v4()));
        p.to_string_lossy().to_string()
    }

    struct StalledRecorder;

    #[async_trait]
    impl TrialRecorder for StalledRecorder {
        async fn record(&self, _trial: &TrialRecord) -> Result<(), PulseError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delivers_in_submission_order() {
        let recorder = MemoryRecorder::new();
        let delivery =
            TrialDelivery::spawn(Arc::new(recorder.clone()), Outbox::new(), DeliveryOptions::default());
        for round in 0..5 {
            delivery.submit(trial(round)).await;
        }
        delivery.sync().await;
        let rounds: Vec<u32> = recorder.trials().iter().map(|t| t.round).collect();
        assert_eq!(rounds, vec![0, 1, 2, 3, 4]);
        assert_eq!(delivery.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_later_trial_waits_behind_failed_one() {
        let recorder = MemoryRecorder::new();
        let delivery =
            TrialDelivery::spawn(Arc::new(recorder.clone()), Outbox::new(), DeliveryOptions::default());

        recorder.set_error("offline");
        delivery.submit(trial(0)).await;
        delivery.sync().await;
        assert_eq!(delivery.pending_len().await, 1);

        recorder.clear_error();
        delivery.submit(trial(1)).await;
        delivery.sync().await;
        assert_eq!(delivery.retry().await, 0);

        let rounds: Vec<u32> = recorder.trials().iter().map(|t| t.round).collect();
        assert_eq!(rounds, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_leftover_outbox_goes_first() {
        let mut leftover = Outbox::new();
        leftover.push(trial(0));
        let recorder = MemoryRecorder::new();
        let delivery =
            TrialDelivery::spawn(Arc::new(recorder.clone()), leftover, DeliveryOptions::default());
        delivery.submit(trial(1)).await;
        delivery.sync().await;
        let rounds: Vec<u32> = recorder.trials().iter().map(|t| t.round).collect();
        assert_eq!(rounds, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_stalled_recorder_times_out() {
        let options = DeliveryOptions {
            record_timeout: Duration::from_millis(50),
            outbox_path: None,
        };
        let delivery = TrialDelivery::spawn(Arc::new(StalledRecorder), Outbox::new(), options);

        // Submitting never waits on the recorder.
        tokio::time::timeout(Duration::from_secs(1), delivery.submit(trial(0)))
            .await
            .unwrap();
        delivery.sync().await;
        assert_eq!(delivery.pending_len().await, 1);
    }

    #[tokio::test]
    async fn test_outbox_mirrored_to_disk_on_failure() {
        let path = temp_path();
        let recorder = MemoryRecorder::new();
        recorder.set_error("disk full");
        let options = DeliveryOptions {
            outbox_path: Some(path.clone()),
            ..DeliveryOptions::default()
        };
        let delivery = TrialDelivery::spawn(Arc::new(recorder.clone()), Outbox::new(), options);

        delivery.submit(trial(0)).await;
        delivery.submit(trial(1)).await;
        delivery.sync().await;
        assert_eq!(Outbox::load(&path).unwrap().len(), 2);

        recorder.clear_error();
        assert_eq!(delivery.retry().await, 2);
        assert!(Outbox::load(&path).unwrap().is_empty());

        std::fs::remove_file(&path).unwrap();
    }
}
