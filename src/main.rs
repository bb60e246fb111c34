//! PULSE: streak-biased risk-choice experiment runner
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores undelivered trials from disk, and serves the experiment API
//! until Ctrl+C, retrying the outbox in the background.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use pulse::config::AppConfig;
use pulse::host::SessionHost;
use pulse::server;
use pulse::storage::{self, DeliveryOptions, Outbox, TrialDelivery};

const BANNER: &str = r#"
 ____  _   _ _     ____  _____
|  _ \| | | | |   / ___|| ____|
| |_) | | | | |   \___ \|  _|
|  __/| |_| | |___ ___) | |___
|_|    \___/|_____|____/|_____|

  Streak-biased risk-choice experiment
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = AppConfig::path_from_env();
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        config = %config_path,
        rounds_per_block = cfg.experiment.rounds_per_block,
        starting_balance = cfg.experiment.starting_balance,
        order_assignment = ?cfg.experiment.order_assignment,
        seeded = cfg.experiment.rng_seed.is_some(),
        "PULSE starting up"
    );

    // -- Storage ---------------------------------------------------------

    let recorder = storage::build_recorder(&cfg.storage).await?;
    let outbox = Outbox::load(&cfg.storage.outbox_path)?;
    if !outbox.is_empty() {
        warn!(pending = outbox.len(), "Resuming with undelivered trials");
    }

    let delivery = TrialDelivery::spawn(recorder, outbox, DeliveryOptions::from(&cfg.storage));
    let host = Arc::new(SessionHost::with_delivery(cfg.experiment.clone(), delivery));

    // -- Outbox retry loop -----------------------------------------------

    let retry_host = Arc::clone(&host);
    let retry_every = Duration::from_secs(cfg.storage.retry_interval_secs.max(1));
    let retry_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(retry_every);
        loop {
            interval.tick().await;
            retry_host.retry_outbox().await;
        }
    });

    // -- Serve -----------------------------------------------------------

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", cfg.server.host, cfg.server.port))?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown signal received.");
    };

    server::serve(Arc::clone(&host), addr, shutdown).await?;
    retry_task.abort();

    // Let queued trials land, then one last attempt before parking the rest.
    host.sync_deliveries().await;
    host.retry_outbox().await;
    let outbox = host.outbox_snapshot().await;
    outbox.save(&cfg.storage.outbox_path)?;
    info!(
        sessions = host.session_count().await,
        undelivered = outbox.len(),
        "PULSE shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pulse=info"));

    let json_logging = std::env::var("PULSE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
