pub mod backend;
pub mod migrations;
pub mod queries;
pub mod rows;

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use rusqlite::Connection;
use tokio::sync::broadcast;
use tracing::info;

use parley_types::RowChange;

/// Default capacity of the change feed. A subscriber that falls further
/// behind than this sees `StreamError::Lagged`.
pub const CHANGE_FEED_CAPACITY: usize = 1024;

/// SQLite-backed store with a row-level change feed.
///
/// Every write runs under the single connection lock and publishes its
/// changes before releasing it, so the feed order is the commit order.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<RowChange>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::from_connection(conn, CHANGE_FEED_CAPACITY)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_capacity(CHANGE_FEED_CAPACITY)
    }

    pub fn open_in_memory_with_capacity(feed_capacity: usize) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, feed_capacity)
    }

    fn from_connection(mut conn: Connection, feed_capacity: usize) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&mut conn)?;

        let (changes, _) = broadcast::channel(feed_capacity.max(1));
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                conn: Mutex::new(conn),
                changes,
            }),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.inner.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Run a write. Changes returned by `f` are published while the lock is
    /// still held.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<(T, Vec<RowChange>)>,
    {
        let mut conn = self.inner.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        let (value, changes) = f(&mut conn)?;
        for change in changes {
            // No receivers is fine: nobody is listening yet.
            let _ = self.inner.changes.send(change);
        }
        Ok(value)
    }

    /// Raw receiver over every change the store commits.
    pub fn changes(&self) -> broadcast::Receiver<RowChange> {
        self.inner.changes.subscribe()
    }

    /// Number of live change-feed receivers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.changes.receiver_count()
    }
}
