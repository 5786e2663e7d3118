use std::sync::Arc;

use anyhow::anyhow;
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use ping_db::{BlobStore, Database, Document};

use crate::error::{SyncError, SyncResult};

/// Handle to the document store and blob store.
#[derive(Clone)]
pub struct Backend {
    db: Arc<Database>,
    blobs: BlobStore,
}

impl Backend {
    pub fn new(db: Arc<Database>, blobs: BlobStore) -> Self {
        Self { db, blobs }
    }

    /// In-memory store with blobs under a fresh temp directory.
    pub fn in_memory() -> anyhow::Result<Self> {
        let db = Arc::new(Database::open_in_memory()?);
        let dir = std::env::temp_dir().join(format!("ping-blobs-{}", uuid::Uuid::new_v4()));
        let blobs = BlobStore::new(dir, db.clone());
        Ok(Self::new(db, blobs))
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Run blocking store work off the async runtime. Failures are logged
    /// here and surfaced as [`SyncError::Backend`].
    pub async fn run<F, T>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db.as_ref()))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                SyncError::Backend(anyhow!("backend task failed: {}", e))
            })?
            .map_err(|e| {
                error!("Backend call failed: {:#}", e);
                SyncError::Backend(e)
            })
    }
}

/// Decode a snapshot, skipping documents that do not parse.
pub(crate) fn decode_all<T: DeserializeOwned>(docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| {
            doc.decode()
                .map_err(|e| warn!("Skipping {:#}", e))
                .ok()
        })
        .collect()
}
