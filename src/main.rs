//! PITCHWATCH: live football betting-signal engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores state from disk (or starts fresh), and runs the
//! poll→analyse→emit→resolve loop with graceful shutdown.
//!
//! Usage: `pitchwatch [config.toml]`

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use pitchwatch::config::{self, AppConfig};
use pitchwatch::engine::replay::ReplayFeed;
use pitchwatch::engine::sink::LoggingSink;
use pitchwatch::engine::{CycleReport, MatchMonitor};
use pitchwatch::storage;

const BANNER: &str = r#"
 ___ ___ _____ ___ _  _ __      ___ _____ ___ _  _
| _ \_ _|_   _/ __| || |\ \    / /_\_   _/ __| || |
|  _/| |  | || (__| __ | \ \/\/ / _ \| || (__| __ |
|_| |___| |_| \___|_||_|  \_/\_/_/ \_\_| \___|_||_|

  Live match metrics → betting signals
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let cfg = if Path::new(&config_path).exists() {
        AppConfig::load(&config_path)?
    } else {
        AppConfig::default()
    };

    init_logging(&cfg);

    println!("{BANNER}");
    info!(
        config = %config_path,
        poll_interval_secs = cfg.monitor.poll_interval_secs,
        max_matches = cfg.monitor.max_concurrent_matches,
        floor = cfg.signals.confidence_floor,
        "PITCHWATCH starting up"
    );

    // -- Collaborators ---------------------------------------------------

    let replay_path = cfg
        .monitor
        .replay_path
        .clone()
        .context("No feed configured: set [monitor] replay_path")?;
    let feed = Arc::new(ReplayFeed::from_file(&replay_path)?);
    let sink = Arc::new(LoggingSink::new());

    let mut monitor = MatchMonitor::new(cfg.monitor.clone(), cfg.pipeline(), feed.clone(), sink.clone());

    // -- Restore state ---------------------------------------------------

    let state_path = cfg.storage.state_path.as_str();
    if let Some(state) = storage::load_state(Some(state_path))? {
        monitor.restore(state);
    } else {
        info!("Fresh start");
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.monitor.poll_interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.monitor.poll_interval_secs,
        feed = %replay_path,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match monitor.run_cycle(Utc::now()).await {
                    Ok(report) => {
                        log_cycle_report(&report);
                        if monitor.recalibration_due() {
                            run_recalibration(&monitor);
                        }
                        if cfg.storage.save_every_cycle {
                            if let Err(e) = storage::save_state(&monitor.state(Utc::now()), Some(state_path)) {
                                error!(error = %e, "Failed to save state");
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Cycle failed, continuing to next");
                    }
                }

                if feed.is_exhausted() && monitor.pending().is_empty() {
                    info!("Replay finished and nothing pending. Shutting down.");
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    storage::save_state(&monitor.state(Utc::now()), Some(state_path))?;
    let summary = monitor.pending_summary();
    info!(
        cycles = monitor.cycle_count(),
        emitted = sink.emitted(),
        resolved = sink.resolved(),
        pending = summary.count,
        at_risk = format!("{:.2}", summary.stake_at_risk),
        "PITCHWATCH shut down cleanly."
    );

    Ok(())
}

fn run_recalibration(monitor: &MatchMonitor) {
    for (strategy, outcome) in monitor.recalibrate_from_settled(Utc::now()) {
        match outcome {
            Ok(report) => info!(
                strategy = %strategy,
                samples = report.stats.total,
                win_rate = format!("{:.1}%", report.stats.win_rate * 100.0),
                previous = ?report.previous_win_rate,
                "Recalibrated"
            ),
            Err(e) => warn!(strategy = %strategy, error = %e, "Recalibration skipped"),
        }
    }
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    info!(
        cycle = report.cycle_number,
        matches = report.matches_seen,
        analysed = report.matches_analysed,
        generated = report.signals_generated,
        emitted = report.signals_emitted,
        dropped = report.dropped_low_confidence,
        duplicates = report.suppressed_duplicates,
        resolved = report.signals_resolved,
        record = format!("{}W-{}L-{}P", report.wins, report.losses, report.pushes),
        pnl = format!("{:+.2}", report.realised_pnl),
        pending = report.pending,
        evicted = report.evicted.len(),
        "Cycle complete"
    );
    if report.sink_failures > 0 {
        warn!(failures = report.sink_failures, "Signal sink reported failures this cycle");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.logging.filter));

    let json_logging = cfg.logging.json || std::env::var("PITCHWATCH_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
