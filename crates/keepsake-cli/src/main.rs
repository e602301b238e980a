//! # keepsake-cli
//!
//! Command-line interface for inspecting and maintaining a Keepsake
//! session store.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keepsake_core::Config;

mod commands;

/// Keepsake - session store maintenance
#[derive(Parser)]
#[command(name = "keepsake")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file layered over the defaults
    #[arg(short, long, value_name = "PATH", env = "KEEPSAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the storage location from configuration
    #[arg(short, long, value_name = "PATH")]
    storage: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the payload stored for a session
    Get {
        /// Session ID
        sid: String,
    },
    /// Store a JSON object as a session's payload
    Set {
        /// Session ID
        sid: String,
        /// Payload, e.g. '{"cookie":{"_expires":"2030-01-01T00:00:00Z"}}'
        data: String,
    },
    /// Delete a session
    Destroy {
        /// Session ID
        sid: String,
    },
    /// List stored sessions with their expiry
    List,
    /// Print the number of stored sessions
    Count,
    /// Delete every session
    Clear,
    /// Remove expired sessions once
    Sweep,
    /// Reclaim space in the storage file
    Compact,
    /// Run the expiration sweeper until interrupted
    Watch {
        /// Sweep interval in milliseconds (defaults to configuration)
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Validate configuration and list issues
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        // A file the user named must load.
        Err(e) if cli.config.is_some() => anyhow::bail!("Failed to load config: {}", e),
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {}", e);
            Config::default()
        }
    };
    if let Some(storage) = cli.storage {
        config.store.storage_location = storage;
    }

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Config { action } => commands::config::handle(action, &config)?,
        Commands::Get { sid } => commands::session::get(&config, &sid).await?,
        Commands::Set { sid, data } => commands::session::set(&config, &sid, &data).await?,
        Commands::Destroy { sid } => commands::session::destroy(&config, &sid).await?,
        Commands::List => commands::session::list(&config).await?,
        Commands::Count => commands::session::count(&config).await?,
        Commands::Clear => commands::session::clear(&config).await?,
        Commands::Sweep => commands::maintenance::sweep(&config).await?,
        Commands::Compact => commands::maintenance::compact(&config).await?,
        Commands::Watch { interval_ms } => {
            commands::maintenance::watch(&config, interval_ms).await?
        }
    }

    Ok(())
}
