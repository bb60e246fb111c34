//! Round/block state machine.
//!
//! A `Session` is one participant's run through the four blocks. Every
//! operation checks the phase first and returns an error without touching
//! state when the action is not allowed, so a rejected call never leaves a
//! half-applied round behind.
//!
//! ```text
//! NotStarted -> Playing <-> AwaitingFeedback -> OnBreak -> Playing (next block) ... -> Complete
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{ExperimentConfig, OrderAssignment};
use crate::engine::outcome::OutcomeEngine;
use crate::engine::rng::RandomSource;
use crate::engine::streak::StreakState;
use crate::types::{
    BlockOrder, Choice, Condition, Outcome, Phase, PulseError, TrialRecord, BLOCK_COUNT,
    COUNTERBALANCED_ORDERS,
};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One participant's experiment state.
#[derive(Debug, Clone)]
pub struct Session {
    participant_id: Uuid,
    block_order: BlockOrder,
    config: ExperimentConfig,
    engine: OutcomeEngine,
    phase: Phase,
    /// 1-indexed block number; 0 before start, `BLOCK_COUNT + 1` once complete.
    block: u32,
    block_index: usize,
    round_index: u32,
    balance: i64,
    streaks: StreakState,
    round_started_at: DateTime<Utc>,
    break_started_at: Option<DateTime<Utc>>,
    last_trial: Option<TrialRecord>,
    trials_completed: u32,
}

impl Session {
    /// Create a session, assigning its block order from the configuration.
    ///
    /// The order draw comes from `rng` so a seeded source reproduces both
    /// the order and every outcome after it.
    pub fn start(
        config: ExperimentConfig,
        rng: &mut dyn RandomSource,
        now: DateTime<Utc>,
    ) -> Result<Self, PulseError> {
        config.validate()?;
        let order = match config.fixed_block_order()? {
            Some(order) => order,
            None => assign_block_order(config.order_assignment, rng)?,
        };
        Self::with_order(config, order, now)
    }

    /// Create a session with an explicit block order.
    pub fn with_order(
        config: ExperimentConfig,
        block_order: BlockOrder,
        now: DateTime<Utc>,
    ) -> Result<Self, PulseError> {
        config.validate()?;
        let session = Self {
            participant_id: Uuid::new_v4(),
            engine: OutcomeEngine::new(&config),
            balance: config.starting_balance,
            config,
            block_order,
            phase: Phase::NotStarted,
            block: 0,
            block_index: 0,
            round_index: 0,
            streaks: StreakState::new(),
            round_started_at: now,
            break_started_at: None,
            last_trial: None,
            trials_completed: 0,
        };
        info!(
            participant = %session.participant_id,
            order = %session.block_order,
            "Session created"
        );
        Ok(session)
    }

    // -- Accessors ------------------------------------------------------

    pub fn participant_id(&self) -> Uuid {
        self.participant_id
    }

    pub fn block_order(&self) -> &BlockOrder {
        &self.block_order
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn block(&self) -> u32 {
        self.block
    }

    pub fn block_index(&self) -> usize {
        self.block_index
    }

    pub fn round_index(&self) -> u32 {
        self.round_index
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn streaks(&self) -> &StreakState {
        &self.streaks
    }

    pub fn win_streak(&self) -> u32 {
        self.streaks.win_streak()
    }

    pub fn loss_streak(&self) -> u32 {
        self.streaks.loss_streak()
    }

    pub fn bias_window_remaining(&self) -> u32 {
        self.streaks.bias_window_remaining()
    }

    pub fn bias_window_active(&self) -> bool {
        self.streaks.bias_window_active()
    }

    pub fn last_trial(&self) -> Option<&TrialRecord> {
        self.last_trial.as_ref()
    }

    pub fn trials_completed(&self) -> u32 {
        self.trials_completed
    }

    /// Condition of the current block. Stays on the last block's condition
    /// once the session is complete.
    pub fn condition(&self) -> Condition {
        let index = self.block_index.min(BLOCK_COUNT - 1);
        self.block_order.conditions()[index]
    }

    /// p_win the next risky choice would be evaluated at.
    pub fn next_p_win(&self) -> f64 {
        self.engine.p_win(
            self.streaks.win_streak(),
            self.streaks.loss_streak(),
            self.streaks.bias_window_remaining(),
            self.streaks.bias_window_active(),
        )
    }

    // -- Transitions ----------------------------------------------------

    /// NotStarted → Playing at block 1.
    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<(), PulseError> {
        self.require(Phase::NotStarted, "start")?;
        self.phase = Phase::Playing;
        self.block = 1;
        self.block_index = 0;
        self.round_index = 0;
        self.round_started_at = now;
        info!(
            participant = %self.participant_id,
            block = self.block,
            condition = %self.condition(),
            "Experiment started"
        );
        Ok(())
    }

    /// Take the safe payoff. No random draw, streaks untouched.
    pub fn choose_safe(&mut self, now: DateTime<Utc>) -> Result<TrialRecord, PulseError> {
        self.require(Phase::Playing, "choose_safe")?;
        self.balance += self.config.safe_payoff;
        let p_win = self.config.base_p_win;
        Ok(self.finish_round(Choice::Safe, Outcome::Safe, p_win, now))
    }

    /// Take the risky bet, resolved by the outcome engine.
    pub fn choose_risk(
        &mut self,
        rng: &mut dyn RandomSource,
        now: DateTime<Utc>,
    ) -> Result<TrialRecord, PulseError> {
        self.require(Phase::Playing, "choose_risk")?;
        // Draw before any mutation so an RNG failure leaves the round intact.
        let (outcome, p_win) = self.engine.resolve(&self.streaks, rng)?;

        self.streaks.consume_bias_window();
        self.balance += match outcome {
            Outcome::Win => self.config.risk_win_payoff,
            _ => self.config.risk_loss_payoff,
        };
        let armed = self.streaks.apply_outcome(
            outcome,
            self.config.streak_threshold,
            self.config.bias_window_length,
        );
        if armed {
            info!(
                participant = %self.participant_id,
                block = self.block,
                round = self.round_index,
                direction = %outcome,
                "Bias window armed"
            );
        }
        Ok(self.finish_round(Choice::Risk, outcome, p_win, now))
    }

    /// Dispatch on a choice.
    pub fn choose(
        &mut self,
        choice: Choice,
        rng: &mut dyn RandomSource,
        now: DateTime<Utc>,
    ) -> Result<TrialRecord, PulseError> {
        match choice {
            Choice::Safe => self.choose_safe(now),
            Choice::Risk => self.choose_risk(rng, now),
        }
    }

    /// Acknowledge the feedback for the last round.
    ///
    /// Moves to the next round, to the break once the block's round budget
    /// is spent, or straight to Complete after the final block.
    pub fn continue_round(&mut self, now: DateTime<Utc>) -> Result<Phase, PulseError> {
        self.require(Phase::AwaitingFeedback, "continue_round")?;

        if self.round_index < self.config.rounds_per_block {
            self.phase = Phase::Playing;
            self.round_started_at = now;
            return Ok(self.phase);
        }

        self.last_trial = None;
        if self.block_index + 1 >= BLOCK_COUNT {
            self.complete();
        } else {
            self.phase = Phase::OnBreak;
            self.break_started_at = Some(now);
            info!(
                participant = %self.participant_id,
                block = self.block,
                balance = self.balance,
                "Block finished, entering break"
            );
        }
        Ok(self.phase)
    }

    /// Leave the break and start the next block with fresh per-block state.
    pub fn continue_block(&mut self, now: DateTime<Utc>) -> Result<Phase, PulseError> {
        self.require(Phase::OnBreak, "continue_block")?;
        if let Some(started) = self.break_started_at {
            let elapsed = (now - started).num_seconds();
            if elapsed < self.config.min_break_secs {
                return Err(PulseError::BreakNotOver {
                    remaining_secs: self.config.min_break_secs - elapsed,
                });
            }
        }

        self.block += 1;
        self.block_index += 1;
        self.round_index = 0;
        self.balance = self.config.starting_balance;
        self.streaks.reset();
        self.break_started_at = None;
        self.last_trial = None;

        if self.block_index >= BLOCK_COUNT {
            self.complete();
            return Ok(self.phase);
        }

        self.phase = Phase::Playing;
        self.round_started_at = now;
        info!(
            participant = %self.participant_id,
            block = self.block,
            condition = %self.condition(),
            "Block started"
        );
        Ok(self.phase)
    }

    /// Seconds of the minimum break still to wait (0 outside a break).
    pub fn break_remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        match (self.phase, self.break_started_at) {
            (Phase::OnBreak, Some(started)) => {
                (self.config.min_break_secs - (now - started).num_seconds()).max(0)
            }
            _ => 0,
        }
    }

    /// Snapshot for rendering.
    pub fn view(&self, now: DateTime<Utc>) -> SessionView {
        SessionView {
            participant_id: self.participant_id,
            order_name: self.block_order.name().to_string(),
            block_order: self.block_order.conditions().to_vec(),
            phase: self.phase,
            block: self.block,
            condition: self.condition(),
            round: self.round_index,
            rounds_per_block: self.config.rounds_per_block,
            balance: self.balance,
            win_streak: self.streaks.win_streak(),
            loss_streak: self.streaks.loss_streak(),
            bias_window_active: self.streaks.bias_window_active(),
            bias_window_remaining: self.streaks.bias_window_remaining(),
            break_remaining_secs: self.break_remaining_secs(now),
            trials_completed: self.trials_completed,
            last_trial: self.last_trial.clone(),
        }
    }

    // -- Internals ------------------------------------------------------

    fn require(&self, expected: Phase, action: &'static str) -> Result<(), PulseError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(PulseError::InvalidPhase {
                action,
                phase: self.phase,
            })
        }
    }

    /// Compose the trial record and advance to feedback. Payoff and streaks
    /// must already reflect this round.
    fn finish_round(
        &mut self,
        choice: Choice,
        outcome: Outcome,
        p_win: f64,
        now: DateTime<Utc>,
    ) -> TrialRecord {
        let reaction_time_ms = (now - self.round_started_at)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
            .unwrap_or(0.0)
            .max(0.0);

        let record = TrialRecord {
            participant_id: self.participant_id,
            block: (self.block_index + 1) as u32,
            condition: self.condition(),
            round: self.round_index,
            choice,
            outcome,
            p_win,
            win_streak: self.streaks.win_streak(),
            loss_streak: self.streaks.loss_streak(),
            balance: self.balance,
            timestamp: now,
            reaction_time_ms,
        };

        self.round_index += 1;
        self.trials_completed += 1;
        self.phase = Phase::AwaitingFeedback;
        self.last_trial = Some(record.clone());

        debug!(
            participant = %self.participant_id,
            trial = %record,
            "Trial resolved"
        );
        record
    }

    fn complete(&mut self) {
        self.phase = Phase::Complete;
        self.block = BLOCK_COUNT as u32 + 1;
        self.block_index = BLOCK_COUNT;
        self.break_started_at = None;
        info!(
            participant = %self.participant_id,
            trials = self.trials_completed,
            "Experiment complete"
        );
    }
}

/// Pick a block order according to the assignment mode.
pub fn assign_block_order(
    mode: OrderAssignment,
    rng: &mut dyn RandomSource,
) -> Result<BlockOrder, PulseError> {
    match mode {
        OrderAssignment::Counterbalanced => {
            let index = rng.pick_index(COUNTERBALANCED_ORDERS.len())?;
            Ok(BlockOrder::counterbalanced(index))
        }
        OrderAssignment::Shuffled => {
            let mut conditions = Condition::ALL;
            for i in (1..conditions.len()).rev() {
                let j = rng.pick_index(i + 1)?;
                conditions.swap(i, j);
            }
            BlockOrder::new(&conditions)
        }
    }
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

/// Everything a host needs to render the current screen.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub participant_id: Uuid,
    pub order_name: String,
    pub block_order: Vec<Condition>,
    pub phase: Phase,
    pub block: u32,
    pub condition: Condition,
    pub round: u32,
    pub rounds_per_block: u32,
    pub balance: i64,
    pub win_streak: u32,
    pub loss_streak: u32,
    pub bias_window_active: bool,
    pub bias_window_remaining: u32,
    pub break_remaining_secs: i64,
    pub trials_completed: u32,
    pub last_trial: Option<TrialRecord>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
