//! Session store implementation.
//!
//! [`SessionStore`] is the contract a session middleware depends on.
//! [`DocSessionStore`] implements it on top of any [`DocumentStore`],
//! keyed by session id, and owns the background expiration sweep.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use keepsake_core::record::{self, SID_FIELD};
use keepsake_core::{FieldPath, Filter, SessionData, SessionRecord, StoreConfig};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::docstore::{DocumentStore, RemoveOptions, UpdateOptions};
use crate::error::{Result, StoreError};
use crate::sqlite::SqliteDocumentStore;
use crate::sweeper::{self, SweepReport, SweeperHandle};

/// Session storage trait consumed by session middleware.
///
/// Absence is not an error: `get` of an unknown sid is `Ok(None)` and
/// `destroy` of an unknown sid is `Ok(())`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the payload stored for `sid`.
    async fn get(&self, sid: &str) -> Result<Option<SessionData>>;

    /// Create or replace the payload for `sid`.
    async fn set(&self, sid: &str, data: &SessionData) -> Result<()>;

    /// Remove the session for `sid`.
    async fn destroy(&self, sid: &str) -> Result<()>;

    /// Refresh a session's payload, and with it the cookie expiry.
    async fn touch(&self, sid: &str, data: &SessionData) -> Result<()> {
        self.set(sid, data).await
    }
}

/// Whole-collection operations for stores that can enumerate sessions.
#[async_trait]
pub trait SessionInventory: Send + Sync {
    /// Every stored session keyed by sid.
    async fn all(&self) -> Result<BTreeMap<String, SessionData>>;

    /// Number of stored sessions.
    async fn length(&self) -> Result<usize>;

    /// Remove every session.
    async fn clear(&self) -> Result<()>;
}

type ReadyHook = Box<dyn FnOnce(std::result::Result<(), &StoreError>) + Send>;

/// Options for opening a [`DocSessionStore`].
pub struct StoreOptions {
    pub storage_location: PathBuf,
    pub collection: String,
    pub sweep_interval: Option<Duration>,
    pub unique_sid: bool,
    on_ready: Option<ReadyHook>,
}

impl StoreOptions {
    pub fn new(storage_location: impl Into<PathBuf>) -> Self {
        Self {
            storage_location: storage_location.into(),
            collection: "sessions".to_string(),
            sweep_interval: None,
            unique_sid: true,
            on_ready: None,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            storage_location: config.storage_location.clone(),
            collection: config.collection.clone(),
            sweep_interval: config.sweep_interval(),
            unique_sid: config.unique_sid,
            on_ready: None,
        }
    }

    /// Sweep expired sessions on this period. A zero duration disables sweeping.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval).filter(|d| !d.is_zero());
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_unique_sid(mut self, unique: bool) -> Self {
        self.unique_sid = unique;
        self
    }

    /// Called once with the outcome of the initial load.
    pub fn on_ready<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(std::result::Result<(), &StoreError>) + Send + 'static,
    {
        self.on_ready = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("storage_location", &self.storage_location)
            .field("collection", &self.collection)
            .field("sweep_interval", &self.sweep_interval)
            .field("unique_sid", &self.unique_sid)
            .field("on_ready", &self.on_ready.is_some())
            .finish()
    }
}

/// Session store backed by a document database.
pub struct DocSessionStore<D: DocumentStore = SqliteDocumentStore> {
    backend: Arc<D>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl DocSessionStore<SqliteDocumentStore> {
    /// Load the backing file and start the sweeper if an interval is set.
    ///
    /// Resolves once the store is ready for CRUD calls.
    pub async fn open(options: StoreOptions) -> Result<Self> {
        let StoreOptions {
            storage_location,
            collection,
            sweep_interval,
            unique_sid,
            on_ready,
        } = options;

        let loaded = Self::load(storage_location, collection, unique_sid).await;
        if let Some(hook) = on_ready {
            hook(loaded.as_ref().map(|_| ()));
        }
        let backend = loaded?;

        info!(
            location = %backend.location().display(),
            collection = %backend.collection(),
            sweep_interval_ms = sweep_interval.map(|d| d.as_millis() as u64),
            "Session store ready"
        );

        Ok(Self::with_backend(Arc::new(backend), sweep_interval))
    }

    async fn load(
        location: PathBuf,
        collection: String,
        unique_sid: bool,
    ) -> Result<SqliteDocumentStore> {
        let backend = SqliteDocumentStore::open(&location, collection).await?;
        if unique_sid {
            backend
                .ensure_unique_index(&FieldPath::new([SID_FIELD]))
                .await
                .map_err(|e| StoreError::unavailable(&location, e))?;
        }
        Ok(backend)
    }
}

impl<D: DocumentStore + 'static> DocSessionStore<D> {
    /// Wrap an already-loaded backend.
    ///
    /// Spawns the sweeper when `sweep_interval` is non-zero, so this must
    /// be called from within a tokio runtime in that case.
    pub fn with_backend(backend: Arc<D>, sweep_interval: Option<Duration>) -> Self {
        let sweeper = sweep_interval
            .filter(|d| !d.is_zero())
            .map(|interval| SweeperHandle::spawn(Arc::clone(&backend), interval));

        Self {
            backend,
            sweeper: Mutex::new(sweeper),
        }
    }

    pub fn backend(&self) -> &Arc<D> {
        &self.backend
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(SweeperHandle::is_running)
    }

    /// Run one expiration sweep now.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        sweeper::sweep_expired(self.backend.as_ref(), Utc::now()).await
    }

    /// Reclaim space in the backing storage.
    pub async fn compact(&self) -> Result<()> {
        self.backend.compact().await
    }

    /// Stop the background sweeper. Further CRUD calls still work.
    pub async fn shutdown(&self) {
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
            debug!("Session store sweeper stopped");
        }
    }
}

#[async_trait]
impl<D: DocumentStore + 'static> SessionStore for DocSessionStore<D> {
    async fn get(&self, sid: &str) -> Result<Option<SessionData>> {
        match self.backend.find_one(&record::by_sid(sid)).await? {
            Some(doc) => Ok(Some(SessionRecord::from_document(doc)?.data)),
            None => {
                trace!(sid = %sid, "No stored session");
                Ok(None)
            }
        }
    }

    async fn set(&self, sid: &str, data: &SessionData) -> Result<()> {
        let outcome = self
            .backend
            .update(
                &record::by_sid(sid),
                SessionRecord::document(sid, data),
                UpdateOptions::upsert_one(),
            )
            .await?;
        trace!(sid = %sid, created = outcome.upserted, "Session stored");
        Ok(())
    }

    async fn destroy(&self, sid: &str) -> Result<()> {
        let removed = self
            .backend
            .remove(&record::by_sid(sid), RemoveOptions::single())
            .await?;
        trace!(sid = %sid, removed, "Session destroyed");
        Ok(())
    }
}

#[async_trait]
impl<D: DocumentStore + 'static> SessionInventory for DocSessionStore<D> {
    async fn all(&self) -> Result<BTreeMap<String, SessionData>> {
        self.backend
            .find(&Filter::All)
            .await?
            .into_iter()
            .map(|doc| -> Result<(String, SessionData)> {
                let record = SessionRecord::from_document(doc)?;
                Ok((record.sid, record.data))
            })
            .collect()
    }

    async fn length(&self) -> Result<usize> {
        self.backend.count(&Filter::All).await
    }

    async fn clear(&self) -> Result<()> {
        let removed = self.backend.remove(&Filter::All, RemoveOptions::all()).await?;
        debug!(removed, "Cleared all sessions");
        self.backend.compact().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn session(value: Value) -> SessionData {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    async fn create_test_store() -> DocSessionStore {
        DocSessionStore::open(StoreOptions::new(":memory:")).await.unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let store = create_test_store().await;
        let data = session(json!({
            "cookie": { "_expires": "2999-01-01T00:00:00.000Z", "httpOnly": true, "path": "/" },
            "user": "alice",
            "cart": [1, 2, 3],
        }));

        store.set("abc", &data).await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_get_unknown_is_none() {
        let store = create_test_store().await;
        assert_eq!(store.get("never-set").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_twice_keeps_one_record() {
        let store = create_test_store().await;
        let first = session(json!({ "user": "alice", "visits": 1 }));
        let second = session(json!({ "user": "alice", "visits": 2 }));

        store.set("abc", &first).await.unwrap();
        store.set("abc", &second).await.unwrap();

        assert_eq!(store.get("abc").await.unwrap(), Some(second));
        assert_eq!(store.backend().count(&record::by_sid("abc")).await.unwrap(), 1);
        assert_eq!(store.length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_destroy_unknown_succeeds() {
        let store = create_test_store().await;
        store.destroy("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_removes_session() {
        let store = create_test_store().await;
        store.set("abc", &session(json!({ "n": 1 }))).await.unwrap();
        store.set("other", &session(json!({ "n": 2 }))).await.unwrap();

        store.destroy("abc").await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), None);
        assert!(store.get("other").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_touch_replaces_payload() {
        let store = create_test_store().await;
        store
            .set("abc", &session(json!({ "cookie": { "_expires": 1 } })))
            .await
            .unwrap();
        let refreshed = session(json!({ "cookie": { "_expires": 4_102_444_800_000i64 } }));
        store.touch("abc", &refreshed).await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), Some(refreshed));
    }

    #[tokio::test]
    async fn test_inventory_all_length_clear() {
        let store = create_test_store().await;
        store.set("b", &session(json!({ "n": 2 }))).await.unwrap();
        store.set("a", &session(json!({ "n": 1 }))).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(all["a"]["n"], 1);
        assert_eq!(store.length().await.unwrap(), 2);

        store.clear().await.unwrap();
        assert_eq!(store.length().await.unwrap(), 0);
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_sweep() {
        let store = create_test_store().await;
        let now = Utc::now().timestamp_millis();
        store
            .set("old", &session(json!({ "cookie": { "_expires": now - 1000 } })))
            .await
            .unwrap();
        store
            .set("new", &session(json!({ "cookie": { "_expires": now + 100_000 } })))
            .await
            .unwrap();

        let report = store.sweep_expired().await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(store.get("old").await.unwrap(), None);
        assert!(store.get("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_interval_means_no_sweeper() {
        let store = create_test_store().await;
        assert!(!store.is_sweeping());

        let zero = DocSessionStore::open(
            StoreOptions::new(":memory:").with_sweep_interval(Duration::ZERO),
        )
        .await
        .unwrap();
        assert!(!zero.is_sweeping());
    }

    #[tokio::test]
    async fn test_shutdown_stops_sweeper() {
        let store = DocSessionStore::open(
            StoreOptions::new(":memory:").with_sweep_interval(Duration::from_secs(60)),
        )
        .await
        .unwrap();
        assert!(store.is_sweeping());

        store.shutdown().await;
        assert!(!store.is_sweeping());
        // Shutting down twice is harmless and CRUD keeps working.
        store.shutdown().await;
        store.set("abc", &session(json!({}))).await.unwrap();
    }

    #[tokio::test]
    async fn test_on_ready_reports_success() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);

        let _store = DocSessionStore::open(StoreOptions::new(":memory:").on_ready(move |result| {
            assert!(result.is_ok());
            flag.store(true, Ordering::SeqCst);
        }))
        .await
        .unwrap();

        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_on_ready_reports_unavailable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let seen = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&seen);
        let options = StoreOptions::new(blocker.join("sessions.db")).on_ready(move |result| {
            flag.store(result.err().is_some_and(StoreError::is_unavailable), Ordering::SeqCst);
        });

        let result = DocSessionStore::open(options).await;
        assert!(result.err().unwrap().is_unavailable());
        assert!(seen.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_collections_do_not_leak() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.db");

        let web = DocSessionStore::open(StoreOptions::new(&path).with_collection("web"))
            .await
            .unwrap();
        web.set("abc", &session(json!({ "app": "web" }))).await.unwrap();
        drop(web);

        let admin = DocSessionStore::open(StoreOptions::new(&path).with_collection("admin"))
            .await
            .unwrap();
        assert_eq!(admin.get("abc").await.unwrap(), None);
    }

    #[test]
    fn test_options_from_config() {
        let config = StoreConfig {
            storage_location: PathBuf::from("/var/lib/keepsake/s.db"),
            collection: "web".to_string(),
            sweep_interval_ms: 250,
            unique_sid: false,
        };
        let options = StoreOptions::from_config(&config);
        assert_eq!(options.storage_location, PathBuf::from("/var/lib/keepsake/s.db"));
        assert_eq!(options.collection, "web");
        assert_eq!(options.sweep_interval, Some(Duration::from_millis(250)));
        assert!(!options.unique_sid);
        assert!(format!("{:?}", options).contains("on_ready: false"));
    }
}
