//! Session host. Owns live sessions and wires them to the recorder.
//!
//! Each session sits behind its own async mutex, so requests for one
//! participant are applied strictly one at a time while different
//! participants proceed in parallel. Finished trials are handed to the
//! background `TrialDelivery` worker; the round result is returned without
//! waiting on the recorder. Completed sessions leave the registry.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::config::ExperimentConfig;
use crate::engine::rng::{RandomSource, SeededRng};
use crate::engine::session::{Session, SessionView};
use crate::storage::{DeliveryOptions, Outbox, TrialDelivery, TrialRecorder};
use crate::types::{Choice, Phase, PulseError, TrialRecord};

/// A live session together with the random source that drives it.
pub struct SessionSlot {
    pub session: Session,
    rng: Box<dyn RandomSource>,
}

/// Result of a choice: the trial queued for the recorder plus the new screen state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoundResult {
    pub trial: TrialRecord,
    pub session: SessionView,
}

pub struct SessionHost {
    config: ExperimentConfig,
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<SessionSlot>>>>,
    delivery: TrialDelivery,
    sessions_started: AtomicU64,
}

impl SessionHost {
    /// Host with an empty in-memory outbox. Must be called inside a tokio
    /// runtime; it starts the delivery worker.
    pub fn new(config: ExperimentConfig, recorder: Arc<dyn TrialRecorder>) -> Self {
        Self::with_outbox(config, recorder, Outbox::new())
    }

    /// Host that resumes delivering records left over from a previous run.
    pub fn with_outbox(
        config: ExperimentConfig,
        recorder: Arc<dyn TrialRecorder>,
        outbox: Outbox,
    ) -> Self {
        let delivery = TrialDelivery::spawn(recorder, outbox, DeliveryOptions::default());
        Self::with_delivery(config, delivery)
    }

    pub fn with_delivery(config: ExperimentConfig, delivery: TrialDelivery) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            delivery,
            sessions_started: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Create a session with its own RNG: `rng_seed + n` for the n-th
    /// session when a seed is configured, entropy otherwise.
    pub async fn start_session(&self) -> Result<SessionView, PulseError> {
        let n = self.sessions_started.fetch_add(1, Ordering::Relaxed);
        let rng: Box<dyn RandomSource> = match self.config.rng_seed {
            Some(seed) => Box::new(SeededRng::new(seed.wrapping_add(n))),
            None => Box::new(SeededRng::from_entropy()),
        };
        self.start_session_with_rng(rng).await
    }

    /// Create a session driven by a caller-supplied random source.
    pub async fn start_session_with_rng(
        &self,
        mut rng: Box<dyn RandomSource>,
    ) -> Result<SessionView, PulseError> {
        let now = Utc::now();
        let session = Session::start(self.config.clone(), rng.as_mut(), now)?;
        let view = session.view(now);
        let slot = SessionSlot { session, rng };

        let mut sessions = self.sessions.write().await;
        sessions.insert(view.participant_id, Arc::new(Mutex::new(slot)));
        info!(
            participant = %view.participant_id,
            order = %view.order_name,
            live_sessions = sessions.len(),
            "Session registered"
        );
        Ok(view)
    }

    /// Sessions not yet complete.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn view(&self, id: Uuid) -> Result<SessionView, PulseError> {
        let slot = self.slot(id).await?;
        let slot = slot.lock().await;
        Ok(slot.session.view(Utc::now()))
    }

    /// NotStarted → Playing.
    pub async fn begin(&self, id: Uuid) -> Result<SessionView, PulseError> {
        let slot = self.slot(id).await?;
        let mut slot = slot.lock().await;
        let now = Utc::now();
        slot.session.begin(now)?;
        Ok(slot.session.view(now))
    }

    pub async fn choose_safe(&self, id: Uuid) -> Result<RoundResult, PulseError> {
        self.choose(id, Choice::Safe).await
    }

    pub async fn choose_risk(&self, id: Uuid) -> Result<RoundResult, PulseError> {
        self.choose(id, Choice::Risk).await
    }

    /// Resolve a choice and queue the trial for the recorder.
    pub async fn choose(&self, id: Uuid, choice: Choice) -> Result<RoundResult, PulseError> {
        let slot = self.slot(id).await?;
        let mut guard = slot.lock().await;
        let now = Utc::now();
        let SessionSlot { session, rng } = &mut *guard;
        let trial = session.choose(choice, rng.as_mut(), now)?;
        let view = session.view(now);

        // Queued under the session lock so one participant's trials enter
        // the delivery queue in round order.
        self.delivery.submit(trial.clone()).await;
        Ok(RoundResult {
            trial,
            session: view,
        })
    }

    /// Acknowledge feedback; may enter the break or complete the session.
    pub async fn continue_round(&self, id: Uuid) -> Result<SessionView, PulseError> {
        let slot = self.slot(id).await?;
        let view = {
            let mut slot = slot.lock().await;
            let now = Utc::now();
            slot.session.continue_round(now)?;
            slot.session.view(now)
        };
        self.retire_if_complete(&view).await;
        Ok(view)
    }

    /// Leave the break for the next block.
    pub async fn continue_block(&self, id: Uuid) -> Result<SessionView, PulseError> {
        let slot = self.slot(id).await?;
        let view = {
            let mut slot = slot.lock().await;
            let now = Utc::now();
            slot.session.continue_block(now)?;
            slot.session.view(now)
        };
        self.retire_if_complete(&view).await;
        Ok(view)
    }

    // -- Delivery ---------------------------------------------------------

    pub async fn outbox_len(&self) -> usize {
        self.delivery.pending_len().await
    }

    /// Retry undelivered records. Returns how many were stored.
    pub async fn retry_outbox(&self) -> usize {
        self.delivery.retry().await
    }

    /// Wait until every trial queued so far has reached the recorder or
    /// been left in the outbox.
    pub async fn sync_deliveries(&self) {
        self.delivery.sync().await;
    }

    /// Copy of the outbox, e.g. for saving on shutdown.
    pub async fn outbox_snapshot(&self) -> Outbox {
        self.delivery.snapshot().await
    }

    // -- Internals --------------------------------------------------------

    async fn slot(&self, id: Uuid) -> Result<Arc<Mutex<SessionSlot>>, PulseError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(PulseError::SessionNotFound(id))
    }

    /// A complete session accepts no further actions; drop it from the registry.
    async fn retire_if_complete(&self, view: &SessionView) {
        if view.phase != Phase::Complete {
            return;
        }
        let mut sessions = self.sessions.write().await;
        if sessions.remove(&view.participant_id).is_some() {
            info!(
                participant = %view.participant_id,
                trials = view.trials_completed,
                live_sessions = sessions.len(),
                "Session retired"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
