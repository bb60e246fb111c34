//! Offline simulator.
//!
//! Usage: `simulate [participants] [policy] [seed]`
//! where policy is `safe`, `risk`, or `mixed:<p>`. The experiment
//! parameters come from the same config file as the server.

use anyhow::{Context, Result};
use tracing::info;

use pulse::config::AppConfig;
use pulse::simulation::{ChoicePolicy, Simulator};

fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pulse=warn")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let participants: usize = match args.first() {
        Some(n) => n.parse().context("participants must be a number")?,
        None => 1000,
    };
    let policy: ChoicePolicy = match args.get(1) {
        Some(p) => p.parse()?,
        None => ChoicePolicy::AlwaysRisk,
    };
    let seed: u64 = match args.get(2) {
        Some(s) => s.parse().context("seed must be a number")?,
        None => 0,
    };

    let cfg = AppConfig::load(&AppConfig::path_from_env())?;
    info!(participants, ?policy, seed, "Running simulation");

    let report = Simulator::new(cfg.experiment, policy).run(participants, seed)?;
    println!("{report}");
    Ok(())
}
