//! Outcome engine.
//!
//! Decides the win probability for a risky choice from the current streak
//! and bias window, then draws the outcome from the session's random
//! source. Pure apart from the single draw.

use crate::config::ExperimentConfig;
use crate::engine::rng::RandomSource;
use crate::engine::streak::StreakState;
use crate::types::{Outcome, PulseError};

/// Probability model for risky bets.
#[derive(Debug, Clone)]
pub struct OutcomeEngine {
    base_p_win: f64,
    win_ladder: Vec<f64>,
    loss_ladder: Vec<f64>,
    streak_threshold: u32,
    window_length: u32,
}

impl OutcomeEngine {
    pub fn new(config: &ExperimentConfig) -> Self {
        Self {
            base_p_win: config.base_p_win,
            win_ladder: config.win_bias_ladder.clone(),
            loss_ladder: config.loss_bias_ladder.clone(),
            streak_threshold: config.streak_threshold,
            window_length: config.bias_window_length,
        }
    }

    /// Win probability for the next risky choice.
    ///
    /// Fair unless a window is active with rounds left; then the ladder of
    /// the streak at or above threshold applies, indexed by how far the
    /// window has counted down.
    pub fn p_win(
        &self,
        win_streak: u32,
        loss_streak: u32,
        bias_window_remaining: u32,
        bias_window_active: bool,
    ) -> f64 {
        if !bias_window_active || bias_window_remaining == 0 {
            return self.base_p_win;
        }
        let Some(step) = self.window_length.checked_sub(bias_window_remaining) else {
            return self.base_p_win;
        };

        let ladder = if win_streak >= self.streak_threshold {
            &self.win_ladder
        } else if loss_streak >= self.streak_threshold {
            &self.loss_ladder
        } else {
            return self.base_p_win;
        };
        ladder.get(step as usize).copied().unwrap_or(self.base_p_win)
    }

    /// Resolve a risky choice: returns the outcome and the p_win used.
    pub fn compute_outcome(
        &self,
        win_streak: u32,
        loss_streak: u32,
        bias_window_remaining: u32,
        bias_window_active: bool,
        rng: &mut dyn RandomSource,
    ) -> Result<(Outcome, f64), PulseError> {
        let p_win = self.p_win(win_streak, loss_streak, bias_window_remaining, bias_window_active);
        let draw = rng.next_unit()?;
        let outcome = if draw < p_win { Outcome::Win } else { Outcome::Loss };
        Ok((outcome, p_win))
    }

    /// `compute_outcome` driven by a tracker's current state.
    pub fn resolve(
        &self,
        streaks: &StreakState,
        rng: &mut dyn RandomSource,
    ) -> Result<(Outcome, f64), PulseError> {
        self.compute_outcome(
            streaks.win_streak(),
            streaks.loss_streak(),
            streaks.bias_window_remaining(),
            streaks.bias_window_active(),
            rng,
        )
    }
}

impl Default for OutcomeEngine {
    fn default() -> Self {
        Self::new(&ExperimentConfig::default())
    }
}
