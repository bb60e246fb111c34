//! Offline simulation of synthetic participants.
//!
//! Runs the real engine end to end with scripted choice policies and
//! reports how often bias windows fire and what win rates participants
//! actually experience inside and outside them. Used to sanity-check a
//! design configuration before running it on people.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::ExperimentConfig;
use crate::engine::rng::{RandomSource, SeededRng};
use crate::engine::session::Session;
use crate::types::{Choice, Condition, Outcome, Phase, PulseError};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// How a synthetic participant chooses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChoicePolicy {
    AlwaysSafe,
    AlwaysRisk,
    /// Risky with the given probability, safe otherwise.
    Mixed(f64),
}

impl ChoicePolicy {
    fn choose(&self, rng: &mut dyn RandomSource) -> Result<Choice, PulseError> {
        Ok(match self {
            ChoicePolicy::AlwaysSafe => Choice::Safe,
            ChoicePolicy::AlwaysRisk => Choice::Risk,
            ChoicePolicy::Mixed(p_risk) => {
                if rng.next_unit()? < *p_risk {
                    Choice::Risk
                } else {
                    Choice::Safe
                }
            }
        })
    }
}

impl FromStr for ChoicePolicy {
    type Err = PulseError;

    /// `safe`, `risk`, or `mixed:<p>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "safe" => Ok(ChoicePolicy::AlwaysSafe),
            "risk" => Ok(ChoicePolicy::AlwaysRisk),
            other => {
                let p = other
                    .strip_prefix("mixed:")
                    .and_then(|p| p.parse::<f64>().ok())
                    .filter(|p| (0.0..=1.0).contains(p))
                    .ok_or_else(|| PulseError::Config(format!("unknown policy: {s}")))?;
                Ok(ChoicePolicy::Mixed(p))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    pub participants: usize,
    pub trials: usize,
    pub risky_trials: usize,
    pub fair_trials: usize,
    pub fair_wins: usize,
    pub biased_trials: usize,
    pub biased_wins: usize,
    pub windows_armed: usize,
    /// Sum and count of end-of-block balances per condition.
    block_balances: HashMap<Condition, (i64, usize)>,
}

impl SimulationReport {
    pub fn fair_win_rate(&self) -> f64 {
        ratio(self.fair_wins, self.fair_trials)
    }

    pub fn biased_win_rate(&self) -> f64 {
        ratio(self.biased_wins, self.biased_trials)
    }

    /// Share of risky choices evaluated at a biased probability.
    pub fn biased_share(&self) -> f64 {
        ratio(self.biased_trials, self.risky_trials)
    }

    pub fn mean_block_balance(&self, condition: Condition) -> Option<f64> {
        self.block_balances
            .get(&condition)
            .filter(|(_, n)| *n > 0)
            .map(|(sum, n)| *sum as f64 / *n as f64)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "participants:     {}", self.participants)?;
        writeln!(f, "trials:           {}", self.trials)?;
        writeln!(f, "risky trials:     {}", self.risky_trials)?;
        writeln!(f, "windows armed:    {}", self.windows_armed)?;
        writeln!(
            f,
            "fair win rate:    {:.4} ({} trials)",
            self.fair_win_rate(),
            self.fair_trials
        )?;
        writeln!(
            f,
            "biased win rate:  {:.4} ({} trials, {:.1}% of risky)",
            self.biased_win_rate(),
            self.biased_trials,
            self.biased_share() * 100.0
        )?;
        for condition in Condition::ALL {
            if let Some(mean) = self.mean_block_balance(condition) {
                writeln!(f, "end balance {:<12} {:.2}", condition.label(), mean)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct Simulator {
    config: ExperimentConfig,
    policy: ChoicePolicy,
}

impl Simulator {
    pub fn new(config: ExperimentConfig, policy: ChoicePolicy) -> Self {
        Self { config, policy }
    }

    /// Run `participants` complete sessions. Participant `i` uses engine seed
    /// `seed + i`; policy draws come from a separate stream.
    pub fn run(&self, participants: usize, seed: u64) -> Result<SimulationReport, PulseError> {
        let mut report = SimulationReport::default();
        for i in 0..participants {
            let mut engine_rng = SeededRng::new(seed.wrapping_add(i as u64));
            let mut policy_rng = SeededRng::new(!seed.wrapping_add(i as u64));
            self.run_participant(&mut engine_rng, &mut policy_rng, &mut report)?;
            report.participants += 1;
        }
        Ok(report)
    }

    fn run_participant(
        &self,
        engine_rng: &mut dyn RandomSource,
        policy_rng: &mut dyn RandomSource,
        report: &mut SimulationReport,
    ) -> Result<(), PulseError> {
        let mut clock: DateTime<Utc> = Utc::now();
        let mut session = Session::start(self.config.clone(), engine_rng, clock)?;
        session.begin(clock)?;
        let window = self.config.bias_window_length;

        loop {
            clock += Duration::seconds(1);
            let biased = session.bias_window_active();
            let choice = self.policy.choose(policy_rng)?;
            let trial = session.choose(choice, engine_rng, clock)?;

            report.trials += 1;
            if choice == Choice::Risk {
                report.risky_trials += 1;
                let won = trial.outcome == Outcome::Win;
                // Window rounds at base probability count as fair: their p_win
                // was never shifted.
                if biased && trial.p_win != self.config.base_p_win {
                    report.biased_trials += 1;
                    report.biased_wins += won as usize;
                } else {
                    report.fair_trials += 1;
                    report.fair_wins += won as usize;
                }
                if session.bias_window_remaining() == window {
                    report.windows_armed += 1;
                }
            }
            if trial.round + 1 == self.config.rounds_per_block {
                let entry = report.block_balances.entry(trial.condition).or_insert((0, 0));
                entry.0 += trial.balance;
                entry.1 += 1;
            }

            match session.continue_round(clock)? {
                Phase::Complete => return Ok(()),
                Phase::OnBreak => {
                    clock += Duration::seconds(self.config.min_break_secs);
                    session.continue_block(clock)?;
                }
                _ => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn short_config() -> ExperimentConfig {
        ExperimentConfig {
            rounds_per_block: 15,
            ..ExperimentConfig::default()
        }
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("safe".parse::<ChoicePolicy>().unwrap(), ChoicePolicy::AlwaysSafe);
        assert_eq!("RISK".parse::<ChoicePolicy>().unwrap(), ChoicePolicy::AlwaysRisk);
        assert_eq!("mixed:0.3".parse::<ChoicePolicy>().unwrap(), ChoicePolicy::Mixed(0.3));
        assert!("mixed:1.5".parse::<ChoicePolicy>().is_err());
        assert!("yolo".parse::<ChoicePolicy>().is_err());
    }

    #[test]
    fn test_always_safe_is_deterministic() {
        let sim = Simulator::new(short_config(), ChoicePolicy::AlwaysSafe);
        let report = sim.run(3, 1).unwrap();
        assert_eq!(report.participants, 3);
        assert_eq!(report.trials, 3 * 4 * 15);
        assert_eq!(report.risky_trials, 0);
        assert_eq!(report.windows_armed, 0);
        for condition in Condition::ALL {
            assert_eq!(report.mean_block_balance(condition), Some(35.0));
        }
    }

    #[test]
    fn test_always_risk_arms_windows() {
        let sim = Simulator::new(short_config(), ChoicePolicy::AlwaysRisk);
        let report = sim.run(50, 42).unwrap();
        assert_eq!(report.risky_trials, report.trials);
        assert_eq!(report.fair_trials + report.biased_trials, report.risky_trials);
        assert!(report.windows_armed > 0);
        assert!(report.biased_trials > 0);
        assert!(report.biased_trials <= report.windows_armed * 3);
    }

    #[test]
    fn test_fair_win_rate_near_half() {
        let sim = Simulator::new(ExperimentConfig::default(), ChoicePolicy::AlwaysRisk);
        let report = sim.run(200, 7).unwrap();
        // 24k risky trials; the fair rate should sit close to 0.5.
        assert!((report.fair_win_rate() - 0.5).abs() < 0.03);
    }

    #[test]
    fn test_same_seed_same_report() {
        let sim = Simulator::new(short_config(), ChoicePolicy::Mixed(0.5));
        let a = sim.run(10, 99).unwrap();
        let b = sim.run(10, 99).unwrap();
        assert_eq!(a.trials, b.trials);
        assert_eq!(a.risky_trials, b.risky_trials);
        assert_eq!(a.biased_wins, b.biased_wins);
        assert_eq!(a.fair_wins, b.fair_wins);
    }

    #[test]
    fn test_report_display() {
        let sim = Simulator::new(short_config(), ChoicePolicy::AlwaysSafe);
        let text = sim.run(1, 0).unwrap().to_string();
        assert!(text.contains("participants:     1"));
        assert!(text.contains("end balance neutral"));
    }
}
