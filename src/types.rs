//! Shared types for the PULSE experiment runner.
//!
//! These types form the data model used across the engine, the host
//! layer, storage backends, and the HTTP interface. They are kept free
//! of behaviour beyond parsing and display so that every module can
//! depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// Framing treatment applied to a block. Affects presentation only,
/// never the underlying probability model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = "neutral")]
    Neutral,
    #[serde(rename = "visual")]
    Visual,
    #[serde(rename = "affective")]
    Affective,
    #[serde(rename = "de-salience")]
    DeSalience,
}

impl Condition {
    pub const ALL: [Condition; 4] = [
        Condition::Neutral,
        Condition::Visual,
        Condition::Affective,
        Condition::DeSalience,
    ];

    /// Label used in trial records and configuration files.
    pub fn label(&self) -> &'static str {
        match self {
            Condition::Neutral => "neutral",
            Condition::Visual => "visual",
            Condition::Affective => "affective",
            Condition::DeSalience => "de-salience",
        }
    }

    /// Single-letter code used in block order names (N, V, A, D).
    pub fn initial(&self) -> char {
        match self {
            Condition::Neutral => 'N',
            Condition::Visual => 'V',
            Condition::Affective => 'A',
            Condition::DeSalience => 'D',
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Condition {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "neutral" => Ok(Condition::Neutral),
            "visual" => Ok(Condition::Visual),
            "affective" => Ok(Condition::Affective),
            "de-salience" | "desalience" | "de_salience" => Ok(Condition::DeSalience),
            other => Err(PulseError::MalformedBlockOrder(format!(
                "unknown condition label: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Block order
// ---------------------------------------------------------------------------

/// The four counterbalanced orders, with their analysis names.
pub const COUNTERBALANCED_ORDERS: [(&str, [Condition; 4]); 4] = [
    (
        "Order1_NVAD",
        [Condition::Neutral, Condition::Visual, Condition::Affective, Condition::DeSalience],
    ),
    (
        "Order2_VDNA",
        [Condition::Visual, Condition::DeSalience, Condition::Neutral, Condition::Affective],
    ),
    (
        "Order3_ANDV",
        [Condition::Affective, Condition::Neutral, Condition::DeSalience, Condition::Visual],
    ),
    (
        "Order4_DAVN",
        [Condition::DeSalience, Condition::Affective, Condition::Visual, Condition::Neutral],
    ),
];

/// Number of blocks in a session.
pub const BLOCK_COUNT: usize = 4;

/// Sequence of the four conditions a participant plays, fixed at session start.
///
/// Construction guarantees exactly four distinct labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOrder {
    conditions: [Condition; BLOCK_COUNT],
    name: String,
}

impl BlockOrder {
    /// Build an order from an explicit list of conditions.
    pub fn new(conditions: &[Condition]) -> Result<Self, PulseError> {
        if conditions.len() != BLOCK_COUNT {
            return Err(PulseError::MalformedBlockOrder(format!(
                "expected {BLOCK_COUNT} conditions, got {}",
                conditions.len()
            )));
        }
        for (i, c) in conditions.iter().enumerate() {
            if conditions[..i].contains(c) {
                return Err(PulseError::MalformedBlockOrder(format!(
                    "condition {c} appears more than once"
                )));
            }
        }

        let mut fixed = [Condition::Neutral; BLOCK_COUNT];
        fixed.copy_from_slice(conditions);
        Ok(Self {
            name: Self::name_for(&fixed),
            conditions: fixed,
        })
    }

    /// Parse an order from condition labels, e.g. from a config file.
    pub fn parse<S: AsRef<str>>(labels: &[S]) -> Result<Self, PulseError> {
        let conditions = labels
            .iter()
            .map(|l| l.as_ref().parse::<Condition>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(&conditions)
    }

    /// One of the named counterbalanced orders (index 0–3).
    pub fn counterbalanced(index: usize) -> Self {
        let (name, conditions) = COUNTERBALANCED_ORDERS[index % COUNTERBALANCED_ORDERS.len()];
        Self {
            conditions,
            name: name.to_string(),
        }
    }

    pub fn conditions(&self) -> &[Condition; BLOCK_COUNT] {
        &self.conditions
    }

    /// Condition for a zero-based block index, if within the session.
    pub fn get(&self, block_index: usize) -> Option<Condition> {
        self.conditions.get(block_index).copied()
    }

    /// Analysis name: `OrderN_XXXX` for counterbalanced orders, else `Custom_XXXX`.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn name_for(conditions: &[Condition; BLOCK_COUNT]) -> String {
        COUNTERBALANCED_ORDERS
            .iter()
            .find(|(_, c)| c == conditions)
            .map(|(name, _)| name.to_string())
            .unwrap_or_else(|| {
                let initials: String = conditions.iter().map(|c| c.initial()).collect();
                format!("Custom_{initials}")
            })
    }
}

impl fmt::Display for BlockOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.conditions.iter().map(|c| c.label()).collect();
        write!(f, "{} [{}]", self.name, labels.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Choice / Outcome
// ---------------------------------------------------------------------------

/// The player's decision for a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    Safe,
    Risk,
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Choice::Safe => write!(f, "safe"),
            Choice::Risk => write!(f, "risk"),
        }
    }
}

/// Resolved result of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Safe,
    Win,
    Loss,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Safe => write!(f, "safe"),
            Outcome::Win => write!(f, "win"),
            Outcome::Loss => write!(f, "loss"),
        }
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Where a session is in the block/round state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Session created, start action not yet taken.
    NotStarted,
    /// Waiting for the player's choice in the current round.
    Playing,
    /// A round was resolved; waiting for the player to acknowledge the result.
    AwaitingFeedback,
    /// Round budget of the block is spent; waiting to continue.
    OnBreak,
    /// All blocks finished. Terminal.
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::NotStarted => "NOT_STARTED",
            Phase::Playing => "PLAYING",
            Phase::AwaitingFeedback => "AWAITING_FEEDBACK",
            Phase::OnBreak => "ON_BREAK",
            Phase::Complete => "COMPLETE",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Trial record
// ---------------------------------------------------------------------------

/// One resolved round, as handed to the trial recorder.
///
/// Field order is the column order of every storage backend and must not
/// change: analysis pipelines depend on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub participant_id: Uuid,
    /// 1-indexed block number.
    pub block: u32,
    pub condition: Condition,
    /// Zero-based round index within the block at the time of the choice.
    pub round: u32,
    pub choice: Choice,
    pub outcome: Outcome,
    /// Win probability in force for the round: the drawn probability for a
    /// risky choice, the base probability for a safe one (no draw happens).
    pub p_win: f64,
    pub win_streak: u32,
    pub loss_streak: u32,
    /// Balance after the round's payoff.
    pub balance: i64,
    pub timestamp: DateTime<Utc>,
    pub reaction_time_ms: f64,
}

impl TrialRecord {
    /// Column names in contract order.
    pub const COLUMNS: [&'static str; 12] = [
        "participant_id",
        "block",
        "condition",
        "round",
        "choice",
        "outcome",
        "p_win",
        "win_streak",
        "loss_streak",
        "balance",
        "timestamp",
        "reaction_time_ms",
    ];
}

impl fmt::Display for TrialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {} ({}) round {}: {} -> {} (p={:.2}) balance={} streaks W{}/L{}",
            self.block,
            self.condition,
            self.round,
            self.choice,
            self.outcome,
            self.p_win,
            self.balance,
            self.win_streak,
            self.loss_streak,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for PULSE.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PulseError {
    #[error("Action '{action}' not allowed in phase {phase}")]
    InvalidPhase { action: &'static str, phase: Phase },

    #[error("Break not over: {remaining_secs}s remaining")]
    BreakNotOver { remaining_secs: i64 },

    #[error("Malformed block order: {0}")]
    MalformedBlockOrder(String),

    #[error("Random source unavailable: {0}")]
    RngUnavailable(String),

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
