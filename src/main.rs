//! Pool Replay - Main Entry Point
//!
//! Runs a scripted job session through a real pool and prints every
//! delivered chunk as one JSON line.
//!
//! ```text
//! pool-replay <replay.json> [pool.toml]
//! ```

use anyhow::{bail, Context};
use explorer_pool::config::{default_config_path, PoolConfig};
use explorer_pool::replay::{run_replay, ReplayFile};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(replay_path) = args.next().map(PathBuf::from) else {
        bail!("usage: pool-replay <replay.json> [pool.toml]");
    };

    let config = match args.next() {
        Some(path) => PoolConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => PoolConfig::load_or_default(),
    };

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&config);

    tracing::info!("Starting pool replay of {}", replay_path.display());
    if let Some(path) = default_config_path() {
        tracing::debug!("Default config location: {}", path.display());
    }

    let replay = ReplayFile::load(&replay_path)?;
    let jobs = replay.jobs.len();
    let report = run_replay(replay, config)?;

    for chunk in &report.chunks {
        println!("{}", serde_json::to_string(chunk)?);
    }

    tracing::info!(
        "Replayed {} jobs: {} completed, {} failed, {} cancelled, {} discarded, {} chunks dropped",
        jobs,
        report.metrics.jobs.completed,
        report.metrics.jobs.failed,
        report.metrics.jobs.cancelled,
        report.metrics.jobs.discarded,
        report.metrics.jobs.chunks_dropped
    );
    tracing::debug!("Final metrics: {}", serde_json::to_string(&report.metrics)?);

    Ok(())
}

/// Install the tracing subscriber; logs go to stderr and optionally a daily file
fn init_logging(config: &PoolConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match config.logging.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, "pool-replay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}
