//! SQLite-backed [`CacheStore`].
//!
//! The connection is opened in WAL mode and wrapped in a `Mutex` so the store
//! is `Send + Sync` and can be shared by every resource in the process.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::{schema, CacheStore, Namespace};
use crate::errors::CacheError;

/// Durable cache store in a single SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// Missing parent directories are created.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening cache database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        debug!("cache database opened with WAL mode");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database.
    pub fn in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run all schema migrations to bring the database up to date.
    pub fn initialize(&self) -> Result<(), CacheError> {
        let conn = self.conn();
        schema::run_migrations(&conn)
    }

    /// Lock the underlying connection, recovering from a poisoned mutex.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Execute a closure inside a SQLite transaction. If the closure returns
    /// `Ok`, the transaction is committed; otherwise it is rolled back.
    fn transaction<F, T>(&self, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(&Connection) -> Result<T, CacheError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

impl CacheStore for SqliteStore {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<String>, CacheError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE namespace = ?1 AND key = ?2")?;
        let mut rows = stmt.query_map(params![ns.as_str(), key], |row| row.get(0))?;
        match rows.next() {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    fn put_all(&self, entries: &[(Namespace, &str, &str)]) -> Result<(), CacheError> {
        let now = Utc::now().to_rfc3339();
        self.transaction(|conn| {
            for (ns, key, value) in entries {
                conn.execute(
                    "INSERT INTO kv (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(namespace, key) DO UPDATE SET value = ?3, updated_at = ?4",
                    params![ns.as_str(), key, value, now],
                )?;
            }
            Ok(())
        })
    }

    fn keys(&self, ns: Namespace) -> Result<Vec<String>, CacheError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE namespace = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![ns.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn clear(&self, namespaces: &[Namespace]) -> Result<(), CacheError> {
        self.transaction(|conn| {
            for ns in namespaces {
                let removed = conn.execute("DELETE FROM kv WHERE namespace = ?1", params![ns.as_str()])?;
                debug!(namespace = %ns, removed, "cleared namespace");
            }
            Ok(())
        })
    }
}
