//! Contract the session store needs from its document database.
//!
//! A backend is opened (loaded) by its own constructor before any call here
//! is issued. Every operation is asynchronous and may suspend.

use async_trait::async_trait;
use keepsake_core::Filter;
use serde_json::Value;

use crate::error::Result;

/// Options for [`DocumentStore::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Replace every matching document instead of only the first.
    pub multi: bool,
    /// Insert the document when nothing matches.
    pub upsert: bool,
}

impl UpdateOptions {
    /// Replace at most one document, inserting it if none matches.
    pub fn upsert_one() -> Self {
        Self {
            multi: false,
            upsert: true,
        }
    }
}

/// Options for [`DocumentStore::remove`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub multi: bool,
}

impl RemoveOptions {
    pub fn single() -> Self {
        Self { multi: false }
    }

    pub fn all() -> Self {
        Self { multi: true }
    }
}

/// Result of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Number of existing documents replaced.
    pub replaced: usize,
    /// Whether a new document was inserted.
    pub upserted: bool,
}

/// Document storage trait for abstraction over embedded databases.
///
/// All operations are scoped to the collection the backend was opened for.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// First document matching the filter, in insertion order.
    async fn find_one(&self, filter: &Filter) -> Result<Option<Value>>;

    /// Every document matching the filter.
    async fn find(&self, filter: &Filter) -> Result<Vec<Value>>;

    /// Number of documents matching the filter.
    async fn count(&self, filter: &Filter) -> Result<usize>;

    /// Replace matching documents with `document`.
    async fn update(
        &self,
        filter: &Filter,
        document: Value,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome>;

    /// Remove matching documents, returning how many were removed.
    async fn remove(&self, filter: &Filter, options: RemoveOptions) -> Result<usize>;

    /// Reclaim space left by removed and overwritten documents.
    async fn compact(&self) -> Result<()>;
}
