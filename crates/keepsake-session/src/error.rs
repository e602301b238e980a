//! Errors raised by session storage operations.

use std::path::Path;

use thiserror::Error;

/// Errors that can occur during session storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing file could not be opened or loaded.
    #[error("Session storage at {location} is unavailable: {source}")]
    Unavailable {
        location: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("{0}")]
    Record(#[from] keepsake_core::Error),

    /// A blocking storage task panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Background(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub fn unavailable(
        location: &Path,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StoreError::Unavailable {
            location: location.display().to_string(),
            source: source.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
