//! Configuration loading from TOML.
//!
//! Reads `config.toml` (or the file named by `PULSE_CONFIG`) and
//! deserializes into strongly-typed structs. Every section falls back to
//! its `Default`, so a partial file only needs to name what it changes.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::types::{BlockOrder, PulseError};

/// Default config file path.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub experiment: ExperimentConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

/// How a session's block order is chosen at session start.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderAssignment {
    /// Uniform pick among the four named counterbalanced orders.
    #[default]
    Counterbalanced,
    /// Uniform random permutation of the four conditions.
    Shuffled,
}

/// Constants of the experimental design.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExperimentConfig {
    pub starting_balance: i64,
    pub rounds_per_block: u32,
    pub safe_payoff: i64,
    pub risk_win_payoff: i64,
    pub risk_loss_payoff: i64,
    pub bias_window_length: u32,
    pub streak_threshold: u32,
    /// Fair win probability used outside a bias window.
    pub base_p_win: f64,
    /// p_win while a window armed by a win streak is active.
    /// Entry `i` applies when `bias_window_length - i` rounds remain.
    pub win_bias_ladder: Vec<f64>,
    /// p_win while a window armed by a loss streak is active.
    pub loss_bias_ladder: Vec<f64>,
    /// Minimum break length before the next block may start.
    pub min_break_secs: i64,
    pub order_assignment: OrderAssignment,
    /// Force every session onto this order (pilot runs, debugging).
    pub fixed_order: Option<Vec<String>>,
    /// Base seed for per-session RNGs. Entropy-seeded when absent.
    pub rng_seed: Option<u64>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            starting_balance: 20,
            rounds_per_block: 30,
            safe_payoff: 1,
            risk_win_payoff: 4,
            risk_loss_payoff: -2,
            bias_window_length: 3,
            streak_threshold: 3,
            base_p_win: 0.5,
            win_bias_ladder: vec![0.75, 0.80, 0.85],
            loss_bias_ladder: vec![0.25, 0.20, 0.15],
            min_break_secs: 20,
            order_assignment: OrderAssignment::Counterbalanced,
            fixed_order: None,
            rng_seed: None,
        }
    }
}

impl ExperimentConfig {
    /// Check the design constants for internal consistency.
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.rounds_per_block == 0 {
            return Err(PulseError::Config("rounds_per_block must be positive".into()));
        }
        if self.bias_window_length == 0 {
            return Err(PulseError::Config("bias_window_length must be positive".into()));
        }
        if self.streak_threshold == 0 {
            return Err(PulseError::Config("streak_threshold must be positive".into()));
        }
        if self.min_break_secs < 0 {
            return Err(PulseError::Config("min_break_secs must not be negative".into()));
        }

        let window = self.bias_window_length as usize;
        for (name, ladder) in [
            ("win_bias_ladder", &self.win_bias_ladder),
            ("loss_bias_ladder", &self.loss_bias_ladder),
        ] {
            if ladder.len() != window {
                return Err(PulseError::Config(format!(
                    "{name} has {} entries, expected {window}",
                    ladder.len()
                )));
            }
            if ladder.iter().any(|p| !(0.0..=1.0).contains(p)) {
                return Err(PulseError::Config(format!("{name} has a probability outside [0, 1]")));
            }
        }
        if !(0.0..=1.0).contains(&self.base_p_win) {
            return Err(PulseError::Config("base_p_win outside [0, 1]".into()));
        }

        if let Some(order) = &self.fixed_order {
            BlockOrder::parse(order.as_slice())?;
        }
        Ok(())
    }

    /// The configured fixed order, if any.
    pub fn fixed_block_order(&self) -> Result<Option<BlockOrder>, PulseError> {
        self.fixed_order
            .as_deref()
            .map(|labels| BlockOrder::parse(labels))
            .transpose()
    }

    /// Shorter variant of the design: 15 rounds per block, +2 on a risky win.
    pub fn short_variant() -> Self {
        Self {
            rounds_per_block: 15,
            risk_win_payoff: 2,
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Which trial recorder backs the host.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Csv,
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub csv_path: String,
    pub sqlite_url: String,
    /// Where undelivered trial records are kept across restarts.
    pub outbox_path: String,
    pub retry_interval_secs: u64,
    /// Upper bound on one recorder call before the trial is left queued.
    pub record_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Csv,
            csv_path: "experiment_data.csv".to_string(),
            sqlite_url: "sqlite://experiment_data.db".to_string(),
            outbox_path: "pulse_outbox.json".to_string(),
            retry_interval_secs: 30,
            record_timeout_ms: 5000,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.experiment.validate()?;
        Ok(config)
    }

    /// Path from `PULSE_CONFIG`, or the default file name.
    pub fn path_from_env() -> String {
        std::env::var("PULSE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = ExperimentConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.starting_balance, 20);
        assert_eq!(cfg.rounds_per_block, 30);
        assert_eq!(cfg.risk_win_payoff, 4);
        assert_eq!(cfg.risk_loss_payoff, -2);
    }

    #[test]
    fn test_short_variant() {
        let cfg = ExperimentConfig::short_variant();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.rounds_per_block, 15);
        assert_eq!(cfg.risk_win_payoff, 2);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg = AppConfig::from_toml(
            r#"
            [experiment]
            rounds_per_block = 15
            rng_seed = 42

            [storage]
            backend = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.experiment.rounds_per_block, 15);
        assert_eq!(cfg.experiment.rng_seed, Some(42));
        assert_eq!(cfg.experiment.starting_balance, 20);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.storage.record_timeout_ms, 5000);
    }

    #[test]
    fn test_empty_toml() {
        let cfg = AppConfig::from_toml("").unwrap();
        assert_eq!(cfg.experiment, ExperimentConfig::default());
    }

    #[test]
    fn test_ladder_length_must_match_window() {
        let cfg = ExperimentConfig {
            win_bias_ladder: vec![0.75, 0.80],
            ..ExperimentConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(PulseError::Config(_))));
    }

    #[test]
    fn test_ladder_probability_range() {
        let cfg = ExperimentConfig {
            loss_bias_ladder: vec![0.25, -0.1, 0.15],
            ..ExperimentConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let cfg = ExperimentConfig {
            rounds_per_block: 0,
            ..ExperimentConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_fixed_order() {
        let cfg = ExperimentConfig {
            fixed_order: Some(vec![
                "affective".into(),
                "neutral".into(),
                "de-salience".into(),
                "visual".into(),
            ]),
            ..ExperimentConfig::default()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.fixed_block_order().unwrap().unwrap().name(), "Order3_ANDV");
    }

    #[test]
    fn test_malformed_fixed_order_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [experiment]
            fixed_order = ["neutral", "neutral", "visual", "affective"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_file() {
        // Requires config.toml in the working directory; skipped otherwise.
        if let Ok(cfg) = AppConfig::load(DEFAULT_CONFIG_FILE) {
            assert!(cfg.experiment.validate().is_ok());
            assert!(cfg.experiment.rounds_per_block > 0);
        }
    }
}
