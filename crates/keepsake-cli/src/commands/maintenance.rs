//! Sweep and compaction commands.

use std::time::Duration;

use anyhow::Context;
use keepsake_core::Config;
use keepsake_session::{DocSessionStore, StoreOptions};

use super::open_store;

pub async fn sweep(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let report = store.sweep_expired().await?;

    println!(
        "Expired: {}  removed: {}  failed: {}  compacted: {}",
        report.matched,
        report.removed,
        report.failed,
        if report.compacted { "yes" } else { "no" }
    );
    Ok(())
}

pub async fn compact(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    store.compact().await?;
    println!("Compacted {}.", config.store.storage_location.display());
    Ok(())
}

/// Keep a sweeper running until Ctrl-C.
pub async fn watch(config: &Config, interval_ms: Option<u64>) -> anyhow::Result<()> {
    let interval = interval_ms
        .map(Duration::from_millis)
        .or_else(|| config.store.sweep_interval())
        .filter(|d| !d.is_zero())
        .context("No sweep interval: pass --interval-ms or set store.sweep_interval_ms")?;

    let store = DocSessionStore::open(
        StoreOptions::from_config(&config.store).with_sweep_interval(interval),
    )
    .await?;

    tracing::info!(interval_ms = interval.as_millis() as u64, "Watching for expired sessions, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    store.shutdown().await;
    tracing::info!("Sweeper stopped");
    Ok(())
}
