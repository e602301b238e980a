//! SQLite-backed document storage.
//!
//! Documents live as JSON text in one `documents` table partitioned by
//! collection and are queried through SQLite's JSON functions. Blocking
//! database work runs on the tokio blocking pool; the connection mutex
//! serializes the operation queue.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use keepsake_core::record::parse_timestamp;
use keepsake_core::{Bound, FieldPath, Filter};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, trace};

use crate::docstore::{DocumentStore, RemoveOptions, UpdateOptions, UpdateOutcome};
use crate::error::{Result, StoreError};

/// Location that opens a private in-memory database.
pub const MEMORY_LOCATION: &str = ":memory:";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY,
    collection TEXT NOT NULL,
    body TEXT NOT NULL CHECK (json_valid(body))
);
CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
"#;

/// SQL function mapping an RFC 3339 string to epoch milliseconds, NULL otherwise.
const TIMESTAMP_MILLIS_FN: &str = "keepsake_timestamp_millis";

/// Free pages released per lock acquisition while compacting.
const VACUUM_PAGES_PER_STEP: u32 = 256;

/// SQLite-backed document store scoped to one collection.
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
    collection: Arc<str>,
    location: PathBuf,
}

impl SqliteDocumentStore {
    /// Open (or create) the database at `location` and load its schema.
    ///
    /// Any failure here is reported as [`StoreError::Unavailable`].
    pub async fn open(location: impl AsRef<Path>, collection: impl Into<String>) -> Result<Self> {
        let location = location.as_ref().to_path_buf();
        let path = location.clone();
        let conn = tokio::task::spawn_blocking(move || Self::open_connection(&path)).await??;

        debug!(location = %location.display(), "Document store loaded");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            collection: Arc::from(collection.into()),
            location,
        })
    }

    /// Open a private in-memory store.
    pub async fn open_in_memory(collection: impl Into<String>) -> Result<Self> {
        Self::open(MEMORY_LOCATION, collection).await
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Enforce that no two documents in a collection share a value at `path`.
    pub async fn ensure_unique_index(&self, path: &FieldPath) -> Result<()> {
        let sql = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON documents(collection, {})",
            index_name(path),
            json_extract(path)
        );
        let field = path.to_string();
        self.with_conn(move |conn, _| {
            conn.execute_batch(&sql)?;
            trace!(field = %field, "Unique index ensured");
            Ok(())
        })
        .await
    }

    fn open_connection(location: &Path) -> Result<Connection> {
        let conn = if location.as_os_str() == MEMORY_LOCATION {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = location.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| StoreError::unavailable(location, e))?;
            }
            Connection::open(location)
        }
        .map_err(|e| StoreError::unavailable(location, e))?;

        Self::prepare(&conn).map_err(|e| StoreError::unavailable(location, e))?;
        Ok(conn)
    }

    fn prepare(conn: &Connection) -> rusqlite::Result<()> {
        // auto_vacuum only takes effect before the first table is created.
        conn.pragma_update(None, "auto_vacuum", "INCREMENTAL")?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        Self::register_functions(conn)?;

        // Surfaces "file is not a database" at load time.
        conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get::<_, i64>(0))?;

        trace!(journal_mode = %journal_mode, "Document store schema ready");
        Ok(())
    }

    /// Timestamps in queries go through the same parser as the record mapper,
    /// so SQL and Rust agree on which strings are instants.
    fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
        conn.create_scalar_function(
            TIMESTAMP_MILLIS_FN,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let millis = match ctx.get_raw(0) {
                    ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                        .ok()
                        .and_then(parse_timestamp)
                        .map(|at| at.timestamp_millis()),
                    _ => None,
                };
                Ok(millis)
            },
        )
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let collection = Arc::clone(&self.collection);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            op(&mut conn, &collection)
        })
        .await?
    }

    async fn select(&self, filter: &Filter, limit: Option<usize>) -> Result<Vec<Value>> {
        let clause = Clause::compile(filter);
        let mut sql = format!(
            "SELECT body FROM documents WHERE collection = ? AND ({}) ORDER BY id",
            clause.sql
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        self.with_conn(move |conn, collection| {
            let mut stmt = conn.prepare(&sql)?;
            let bodies = stmt
                .query_map(params_from_iter(clause.bind(collection)), |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            bodies
                .iter()
                .map(|body| serde_json::from_str(body).map_err(StoreError::from))
                .collect()
        })
        .await
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn find_one(&self, filter: &Filter) -> Result<Option<Value>> {
        Ok(self.select(filter, Some(1)).await?.into_iter().next())
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Value>> {
        self.select(filter, None).await
    }

    async fn count(&self, filter: &Filter) -> Result<usize> {
        let clause = Clause::compile(filter);
        let sql = format!(
            "SELECT COUNT(*) FROM documents WHERE collection = ? AND ({})",
            clause.sql
        );
        self.with_conn(move |conn, collection| {
            let count: i64 =
                conn.query_row(&sql, params_from_iter(clause.bind(collection)), |row| row.get::<_, i64>(0))?;
            Ok(count as usize)
        })
        .await
    }

    async fn update(
        &self,
        filter: &Filter,
        document: Value,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        if !document.is_object() {
            return Err(StoreError::InvalidDocument(
                "documents must be JSON objects".to_string(),
            ));
        }
        let body = serde_json::to_string(&document)?;
        let clause = Clause::compile(filter);
        let select = format!(
            "SELECT id FROM documents WHERE collection = ? AND ({}) ORDER BY id{}",
            clause.sql,
            if options.multi { "" } else { " LIMIT 1" }
        );

        self.with_conn(move |conn, collection| {
            // IMMEDIATE takes the write lock up front so the match and the
            // insert cannot interleave with another writer.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let ids: Vec<i64> = {
                let mut stmt = tx.prepare(&select)?;
                let rows = stmt.query_map(params_from_iter(clause.bind(collection)), |row| row.get::<_, i64>(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            let outcome = if ids.is_empty() {
                if options.upsert {
                    tx.execute(
                        "INSERT INTO documents (collection, body) VALUES (?1, ?2)",
                        params![collection, body],
                    )?;
                    UpdateOutcome {
                        replaced: 0,
                        upserted: true,
                    }
                } else {
                    UpdateOutcome::default()
                }
            } else {
                let mut stmt = tx.prepare("UPDATE documents SET body = ?1 WHERE id = ?2")?;
                for id in &ids {
                    stmt.execute(params![body, id])?;
                }
                UpdateOutcome {
                    replaced: ids.len(),
                    upserted: false,
                }
            };

            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn remove(&self, filter: &Filter, options: RemoveOptions) -> Result<usize> {
        let clause = Clause::compile(filter);
        let sql = if options.multi {
            format!(
                "DELETE FROM documents WHERE collection = ? AND ({})",
                clause.sql
            )
        } else {
            format!(
                "DELETE FROM documents WHERE id = \
                 (SELECT id FROM documents WHERE collection = ? AND ({}) ORDER BY id LIMIT 1)",
                clause.sql
            )
        };

        self.with_conn(move |conn, collection| {
            Ok(conn.execute(&sql, params_from_iter(clause.bind(collection)))?)
        })
        .await
    }

    async fn compact(&self) -> Result<()> {
        // Reclaim free pages in bounded steps so other operations can take
        // the connection in between.
        let mut previous: Option<i64> = None;
        loop {
            let remaining = self
                .with_conn(|conn, _| {
                    {
                        let mut stmt = conn.prepare(&format!(
                            "PRAGMA incremental_vacuum({})",
                            VACUUM_PAGES_PER_STEP
                        ))?;
                        let mut rows = stmt.query([])?;
                        while rows.next()?.is_some() {}
                    }
                    Ok(conn.query_row("PRAGMA freelist_count", [], |row| row.get::<_, i64>(0))?)
                })
                .await?;
            // Stop when done, or when the database was not created for incremental vacuum.
            if remaining == 0 || previous.is_some_and(|p| remaining >= p) {
                trace!(remaining, "Free pages reclaimed");
                break;
            }
            previous = Some(remaining);
        }

        self.with_conn(|conn, _| {
            let (busy, log_frames, checkpointed): (i64, i64, i64) =
                conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
            debug!(busy, log_frames, checkpointed, "Document store compacted");
            Ok(())
        })
        .await
    }
}

/// A filter rendered to a SQL boolean expression over `body`.
struct Clause {
    sql: String,
    params: Vec<SqlValue>,
}

impl Clause {
    fn compile(filter: &Filter) -> Self {
        let mut clause = Clause {
            sql: String::new(),
            params: Vec::new(),
        };
        clause.push(filter);
        clause
    }

    /// Parameters for a statement whose first placeholder is the collection.
    fn bind(&self, collection: &str) -> Vec<SqlValue> {
        std::iter::once(SqlValue::Text(collection.to_string()))
            .chain(self.params.iter().cloned())
            .collect()
    }

    fn push(&mut self, filter: &Filter) {
        match filter {
            Filter::All => self.sql.push('1'),
            Filter::Eq(path, value) => self.push_eq(path, value),
            Filter::Lt(path, Bound::Number(n)) => {
                self.sql.push_str(&format!(
                    "(json_type(body, {p}) IN ('integer', 'real') AND {e} < ?)",
                    p = path_literal(path),
                    e = json_extract(path)
                ));
                self.params.push(SqlValue::Real(*n));
            }
            Filter::Lt(path, Bound::Instant(at)) => {
                // Epoch milliseconds or RFC 3339 strings, compared as whole
                // milliseconds. Fractional numbers truncate toward zero.
                self.sql.push_str(&format!(
                    "(CASE json_type(body, {p}) \
                     WHEN 'integer' THEN {e} < ? \
                     WHEN 'real' THEN CAST({e} AS INTEGER) < ? \
                     WHEN 'text' THEN {f}({e}) < ? \
                     ELSE 0 END)",
                    p = path_literal(path),
                    e = json_extract(path),
                    f = TIMESTAMP_MILLIS_FN,
                ));
                let millis = at.timestamp_millis();
                for _ in 0..3 {
                    self.params.push(SqlValue::Integer(millis));
                }
            }
            Filter::And(filters) if filters.is_empty() => self.sql.push('1'),
            Filter::And(filters) => {
                for (i, filter) in filters.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(" AND ");
                    }
                    self.sql.push('(');
                    self.push(filter);
                    self.sql.push(')');
                }
            }
        }
    }

    fn push_eq(&mut self, path: &FieldPath, value: &Value) {
        let param = match value {
            Value::Null => {
                self.sql
                    .push_str(&format!("json_type(body, {}) = 'null'", path_literal(path)));
                return;
            }
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(SqlValue::Integer)
                .or_else(|| n.as_f64().map(SqlValue::Real))
                .unwrap_or(SqlValue::Null),
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => {
                // Structural values compare as minified JSON text.
                self.sql
                    .push_str(&format!("json({}) = json(?)", json_extract(path)));
                self.params.push(SqlValue::Text(value.to_string()));
                return;
            }
        };
        self.sql.push_str(&format!("{} = ?", json_extract(path)));
        self.params.push(param);
    }
}

/// `json_extract(body, '<path>')` with the path inlined so expression
/// indexes match the queries that use them.
fn json_extract(path: &FieldPath) -> String {
    format!("json_extract(body, {})", path_literal(path))
}

fn path_literal(path: &FieldPath) -> String {
    format!("'{}'", path.to_json_path().replace('\'', "''"))
}

fn index_name(path: &FieldPath) -> String {
    let suffix: String = path
        .segments()
        .join("_")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("uniq_documents_{}", suffix)
}
