//! CLI command implementations.

pub mod config;
pub mod maintenance;
pub mod session;

use anyhow::Context;
use keepsake_core::Config;
use keepsake_session::{DocSessionStore, StoreOptions};

/// Open the configured store without a background sweeper.
pub async fn open_store(config: &Config) -> anyhow::Result<DocSessionStore> {
    let mut options = StoreOptions::from_config(&config.store);
    options.sweep_interval = None;

    DocSessionStore::open(options).await.with_context(|| {
        format!(
            "Failed to open session store at {}",
            config.store.storage_location.display()
        )
    })
}
