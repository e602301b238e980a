//! # keepsake-core
//!
//! Core types and configuration for Keepsake, a session store for web
//! session middleware backed by an embedded document database.
//!
//! This crate provides:
//! - The persisted session record shape and the filters that address it
//! - Field paths and filter primitives understood by document backends
//! - The configuration system
//! - Common error types

pub mod config;
pub mod error;
pub mod filter;
pub mod record;

pub use config::{Config, LoggingConfig, StoreConfig};
pub use error::{Error, Result};
pub use filter::{Bound, FieldPath, Filter};
pub use record::{SessionData, SessionRecord};
