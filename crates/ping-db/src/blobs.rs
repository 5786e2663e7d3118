use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use uuid::Uuid;

use crate::Database;
use crate::queries::OptionalExt;

/// File-system blob store for profile images. Metadata rows live in the
/// `blobs` table, bytes under `root/{id}`.
#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
    db: Arc<Database>,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>, db: Arc<Database>) -> Self {
        Self { root: root.into(), db }
    }

    pub async fn put(&self, owner_id: Uuid, bytes: &[u8]) -> Result<Uuid> {
        if bytes.is_empty() {
            bail!("Refusing to store an empty blob");
        }

        let blob_id = Uuid::new_v4();

        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create blob directory {}", self.root.display()))?;

        let path = self.root.join(blob_id.to_string());
        let mut file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("Failed to create blob {}", path.display()))?;
        file.write_all(bytes).await?;
        file.flush().await?;

        let db = self.db.clone();
        let size = bytes.len() as i64;
        let id = blob_id.to_string();
        let owner = owner_id.to_string();
        let inserted = tokio::task::spawn_blocking(move || {
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO blobs (id, owner_id, size) VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, owner, size],
                )?;
                Ok(())
            })
        })
        .await?;

        if let Err(e) = inserted {
            error!("Blob row insert failed, removing {}: {}", path.display(), e);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        info!("Stored blob {} ({} bytes) for {}", blob_id, size, owner_id);
        Ok(blob_id)
    }

    pub async fn get(&self, blob_id: Uuid) -> Result<Option<Vec<u8>>> {
        let db = self.db.clone();
        let id = blob_id.to_string();
        let known = tokio::task::spawn_blocking(move || {
            db.with_conn(|conn| {
                conn.query_row("SELECT id FROM blobs WHERE id = ?1", [&id], |row| {
                    row.get::<_, String>(0)
                })
                .optional()
            })
        })
        .await??;

        if known.is_none() {
            return Ok(None);
        }

        let path = self.root.join(blob_id.to_string());
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Blob {} has a row but no file", blob_id))?;
        Ok(Some(bytes))
    }
}
