//! Configuration system for Keepsake.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Main configuration struct for Keepsake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session storage settings
    pub store: StoreConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backing file for the document store. `:memory:` keeps everything in memory.
    pub storage_location: PathBuf,
    /// Collection (namespace) owned by the session store
    pub collection: String,
    /// Milliseconds between expiration sweeps; 0 disables sweeping
    pub sweep_interval_ms: u64,
    /// Enforce at most one record per session id with a unique index
    pub unique_sid: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_location: Config::data_dir().join("sessions.db"),
            collection: "sessions".to_string(),
            sweep_interval_ms: 0,
            unique_sid: true,
        }
    }
}

impl StoreConfig {
    /// The sweep period, or `None` when sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.sweep_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    /// Field path (e.g., "store.collection")
    pub field: String,
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the standard ones.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new()
            // Default values
            .merge(Serialized::defaults(Config::default()))
            // User config
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            // Project config
            .merge(Toml::file("keepsake.toml"));

        if let Some(path) = explicit {
            // Implicit files are optional; one named explicitly must exist.
            if !path.is_file() {
                return Err(figment::Error::from(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        figment
            // Environment variables, e.g. KEEPSAKE_STORE__SWEEP_INTERVAL_MS=60000
            .merge(Env::prefixed("KEEPSAKE_").split("__"))
            .extract()
    }

    /// Load and validate configuration.
    pub fn load_validated(explicit: Option<&Path>) -> Result<Self, Error> {
        let config = Self::load_from(explicit).map_err(|e| Error::Config(e.to_string()))?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Validation(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.store.storage_location.as_os_str().is_empty() {
            result.add_error("store.storage_location", "storage_location is required");
        }

        if self.store.collection.trim().is_empty() {
            result.add_error("store.collection", "collection name cannot be empty");
        }

        match self.store.sweep_interval_ms {
            0 => result.add_warning(
                "store.sweep_interval_ms",
                "sweeping is disabled; expired sessions stay until destroyed",
            ),
            ms if ms < 100 => result.add_warning(
                "store.sweep_interval_ms",
                format!("sweeping every {}ms will keep the store busy", ms),
            ),
            _ => {}
        }

        if !self.store.unique_sid {
            result.add_warning(
                "store.unique_sid",
                "without a unique index concurrent writes may duplicate a session",
            );
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            result.add_error(
                "logging.level",
                format!("Invalid log level '{}'. Valid values: {:?}", self.logging.level, LOG_LEVELS),
            );
        }

        result
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("keepsake"))
            .unwrap_or_else(|| PathBuf::from("~/.config/keepsake"))
    }

    /// Get the data directory (for the session database).
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join("keepsake"))
            .unwrap_or_else(|| PathBuf::from("~/.local/share/keepsake"))
    }
}
