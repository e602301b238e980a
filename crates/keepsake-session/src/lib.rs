//! # keepsake-session
//!
//! Session persistence for web session middleware, backed by an embedded
//! document database.
//!
//! This crate provides:
//! - The [`SessionStore`] contract (get, set, destroy) middleware depends on
//! - [`DocSessionStore`], keyed by session id over any [`DocumentStore`]
//! - A SQLite-backed document store holding one JSON document per session
//! - A background sweeper that removes sessions whose cookie has expired
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use keepsake_session::{DocSessionStore, SessionStore, StoreOptions};
//!
//! let store = DocSessionStore::open(
//!     StoreOptions::new("/var/lib/app/sessions.db")
//!         .with_sweep_interval(Duration::from_secs(600)),
//! )
//! .await?;
//!
//! store.set("abc", &data).await?;
//! let data = store.get("abc").await?;
//! store.destroy("abc").await?;
//!
//! store.shutdown().await;
//! ```
//!
//! ## Storage Layout
//!
//! Each session is one document `{ "sid": ..., "data": ... }` in the store's
//! collection. Expiration is read from `data.cookie._expires`, which may be
//! an RFC 3339 string or epoch milliseconds.

pub mod docstore;
pub mod error;
pub mod sqlite;
pub mod store;
pub mod sweeper;

// Re-export commonly used types
pub use docstore::{DocumentStore, RemoveOptions, UpdateOptions, UpdateOutcome};
pub use error::{Result, StoreError};
pub use sqlite::{SqliteDocumentStore, MEMORY_LOCATION};
pub use store::{DocSessionStore, SessionInventory, SessionStore, StoreOptions};
pub use sweeper::{sweep_expired, SweepReport, SweeperHandle};
