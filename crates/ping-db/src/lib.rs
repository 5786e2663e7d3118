pub mod blobs;
pub mod credentials;
pub mod live;
pub mod migrations;
pub mod models;
pub mod queries;

pub use blobs::BlobStore;
pub use live::ListenerRegistration;
pub use models::{ChangeKind, Direction, Document, DocumentChange, Filter, Query, WriteOp};

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the change feed. Listeners that fall further behind refetch.
const CHANGE_FEED_CAPACITY: usize = 1024;

/// SQLite-backed document store with a change feed for live queries.
pub struct Database {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<DocumentChange>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::from_conn(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_conn(Connection::open_in_memory()?)
    }

    fn from_conn(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }

    /// Subscribe to committed document changes.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }

    /// Publish changes after their transaction committed.
    pub(crate) fn notify(&self, changes: Vec<DocumentChange>) {
        for change in changes {
            debug!(collection = %change.collection, id = %change.id, "document changed");
            // No receivers is fine: nobody is listening yet.
            let _ = self.changes.send(change);
        }
    }
}
