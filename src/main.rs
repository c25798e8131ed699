use std::time::Duration;

use anyhow::Context;
use tokio::time::MissedTickBehavior;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use memdir::config::MemdirConfig;
use memdir::llm::{LlmConfig, create_structured_generator};
use memdir::organizer::MemoryOrganizer;
use memdir::storage::MemoryStorage;

/// Staged files older than this are leftovers from a crash.
const STALE_STAGING_AGE: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let _log_guard = init_tracing();

    let config = MemdirConfig::from_env().context("invalid memdir configuration")?;

    let llm_config = LlmConfig::from_env(config.backend, config.default_model.clone())?;

    eprintln!("memdir v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Store: {}", config.root.display());
    eprintln!("   Model: {} ({:?})", config.default_model, config.backend);
    eprintln!(
        "   Batch: {} (concurrency {})",
        config.batch_size, config.concurrency
    );

    // ── Storage ─────────────────────────────────────────────────────────
    let storage = MemoryStorage::open(&config.root)
        .await
        .with_context(|| format!("failed to open store at {}", config.root.display()))?;
    let swept = storage.sweep_staging(STALE_STAGING_AGE).await?;
    if swept > 0 {
        eprintln!("   Removed {} stale staged files", swept);
    }

    // ── Enrichment ──────────────────────────────────────────────────────
    let generator = create_structured_generator(&llm_config)?;

    let organizer = MemoryOrganizer::from_config(storage, generator, &config);

    if config.run_once {
        let processed = run_batch(&organizer, config.concurrency).await?;
        eprintln!("   Processed {} records", processed);
        return Ok(());
    }

    eprintln!(
        "   Polling every {}s. Ctrl-C to stop.\n",
        config.poll_interval.as_secs()
    );

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_batch(&organizer, config.concurrency).await {
                    tracing::error!(error = %e, "Inbox batch failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    Ok(())
}

async fn run_batch(organizer: &MemoryOrganizer, concurrency: usize) -> memdir::error::Result<usize> {
    let processed = if concurrency > 1 {
        organizer
            .process_batch_concurrent(organizer.batch_size(), concurrency)
            .await?
    } else {
        organizer.process_new_memories().await?
    };
    Ok(processed)
}

/// Console logging, plus a daily rolling file under `MEMDIR_LOG_DIR` if set.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match std::env::var("MEMDIR_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "memdir.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}
