//! Streak tracker.
//!
//! Counts consecutive risky wins and losses and arms the bias window when
//! a streak first reaches the threshold. Safe choices never touch it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::Outcome;

/// Streak counters and bias window for one block.
///
/// At most one of the two streaks is nonzero. The window is active exactly
/// when `bias_remaining > 0`, so the two can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreakState {
    win_streak: u32,
    loss_streak: u32,
    bias_remaining: u32,
}

impl StreakState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn win_streak(&self) -> u32 {
        self.win_streak
    }

    pub fn loss_streak(&self) -> u32 {
        self.loss_streak
    }

    pub fn bias_window_remaining(&self) -> u32 {
        self.bias_remaining
    }

    pub fn bias_window_active(&self) -> bool {
        self.bias_remaining > 0
    }

    /// Use up one round of the bias window for a risky attempt.
    ///
    /// Must run with the pre-round state, before `apply_outcome`.
    pub fn consume_bias_window(&mut self) {
        if self.bias_remaining > 0 {
            self.bias_remaining -= 1;
            if self.bias_remaining == 0 {
                debug!("Bias window exhausted");
            }
        }
    }

    /// Fold a round's outcome into the streaks. Returns true if this
    /// outcome armed a new bias window.
    ///
    /// Arming is edge-triggered: only when a streak lands exactly on
    /// `threshold` while no window is active.
    pub fn apply_outcome(&mut self, outcome: Outcome, threshold: u32, window_length: u32) -> bool {
        let streak = match outcome {
            Outcome::Safe => return false,
            Outcome::Win => {
                self.win_streak += 1;
                self.loss_streak = 0;
                self.win_streak
            }
            Outcome::Loss => {
                self.loss_streak += 1;
                self.win_streak = 0;
                self.loss_streak
            }
        };

        if streak == threshold && !self.bias_window_active() {
            self.bias_remaining = window_length;
            debug!(
                direction = %outcome,
                streak,
                window = window_length,
                "Bias window armed"
            );
            return true;
        }
        false
    }

    /// Hard reset at a block boundary.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[cfg(test)]
    pub(crate) fn from_parts(win_streak: u32, loss_streak: u32, bias_remaining: u32) -> Self {
        Self {
            win_streak,
            loss_streak,
            bias_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn risky(state: &mut StreakState, outcome: Outcome) -> bool {
        state.consume_bias_window();
        state.apply_outcome(outcome, 3, 3)
    }

    #[test]
    fn test_safe_changes_nothing() {
        let mut state = StreakState::from_parts(2, 0, 1);
        assert!(!state.apply_outcome(Outcome::Safe, 3, 3));
        assert_eq!(state, StreakState::from_parts(2, 0, 1));
    }

    #[test]
    fn test_win_resets_loss_streak() {
        let mut state = StreakState::from_parts(0, 2, 0);
        state.apply_outcome(Outcome::Win, 3, 3);
        assert_eq!(state.win_streak(), 1);
        assert_eq!(state.loss_streak(), 0);
    }

    #[test]
    fn test_loss_resets_win_streak() {
        let mut state = StreakState::from_parts(4, 0, 0);
        state.apply_outcome(Outcome::Loss, 3, 3);
        assert_eq!(state.win_streak(), 0);
        assert_eq!(state.loss_streak(), 1);
    }

    #[test]
    fn test_third_win_arms_window() {
        let mut state = StreakState::new();
        assert!(!risky(&mut state, Outcome::Win));
        assert!(!risky(&mut state, Outcome::Win));
        assert!(risky(&mut state, Outcome::Win));
        assert!(state.bias_window_active());
        assert_eq!(state.bias_window_remaining(), 3);
    }

    #[test]
    fn test_third_loss_arms_window() {
        let mut state = StreakState::new();
        risky(&mut state, Outcome::Loss);
        risky(&mut state, Outcome::Loss);
        assert!(risky(&mut state, Outcome::Loss));
        assert_eq!(state.loss_streak(), 3);
        assert_eq!(state.bias_window_remaining(), 3);
    }

    #[test]
    fn test_continued_streak_does_not_rearm() {
        let mut state = StreakState::new();
        let mut armed = 0;
        for _ in 0..12 {
            if risky(&mut state, Outcome::Win) {
                armed += 1;
            }
        }
        assert_eq!(armed, 1);
        assert_eq!(state.win_streak(), 12);
        assert!(!state.bias_window_active());
    }

    #[test]
    fn test_window_counts_down_on_risky_attempts() {
        let mut state = StreakState::from_parts(3, 0, 3);
        risky(&mut state, Outcome::Win);
        assert_eq!(state.bias_window_remaining(), 2);
        risky(&mut state, Outcome::Loss);
        assert_eq!(state.bias_window_remaining(), 1);
        risky(&mut state, Outcome::Loss);
        assert_eq!(state.bias_window_remaining(), 0);
        assert!(!state.bias_window_active());
    }

    #[test]
    fn test_rearm_on_round_that_exhausts_window() {
        // Window armed by wins, then three losses. The third loss lands on
        // the round that exhausts the window, so it may arm a fresh one.
        let mut state = StreakState::from_parts(3, 0, 3);
        assert!(!risky(&mut state, Outcome::Loss));
        assert!(!risky(&mut state, Outcome::Loss));
        assert!(risky(&mut state, Outcome::Loss));
        assert_eq!(state.bias_window_remaining(), 3);
    }

    #[test]
    fn test_opposite_streak_blocked_by_active_window() {
        // Window of length 5: third loss arrives while two rounds remain.
        let mut state = StreakState::from_parts(3, 0, 5);
        for _ in 0..3 {
            state.consume_bias_window();
            assert!(!state.apply_outcome(Outcome::Loss, 3, 5));
        }
        assert_eq!(state.loss_streak(), 3);
        assert_eq!(state.bias_window_remaining(), 2);
    }

    #[test]
    fn test_streaks_never_both_positive() {
        let mut state = StreakState::new();
        let pattern = [
            Outcome::Win, Outcome::Win, Outcome::Loss, Outcome::Safe,
            Outcome::Loss, Outcome::Loss, Outcome::Win, Outcome::Loss,
        ];
        for outcome in pattern.iter().cycle().take(64) {
            if *outcome != Outcome::Safe {
                state.consume_bias_window();
            }
            state.apply_outcome(*outcome, 3, 3);
            assert!(state.win_streak() == 0 || state.loss_streak() == 0);
            assert_eq!(state.bias_window_active(), state.bias_window_remaining() > 0);
        }
    }

    #[test]
    fn test_reset() {
        let mut state = StreakState::from_parts(5, 0, 2);
        state.reset();
        assert_eq!(state, StreakState::new());
    }
}
