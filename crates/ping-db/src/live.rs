//! Live queries: standing reads that re-run whenever a committed change can
//! affect their result and push the full result to a callback.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::Database;
use crate::models::{Document, DocumentChange, Query};

/// Handle for one live query. Dropping it (or calling [`remove`]) stops the
/// listener; a snapshot computed after that point is discarded.
///
/// [`remove`]: ListenerRegistration::remove
pub struct ListenerRegistration {
    id: Uuid,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerRegistration {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// False once removed, or once the listener stopped on an error.
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }

    pub fn remove(self) {}
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Database {
    /// Live version of [`Database::query`].
    pub fn listen<S, E>(self: &Arc<Self>, query: Query, on_snapshot: S, on_error: E) -> ListenerRegistration
    where
        S: FnMut(Vec<Document>) + Send + 'static,
        E: FnOnce(anyhow::Error) + Send + 'static,
    {
        let matcher = query.clone();
        self.listen_with(
            move |change| matcher.affected_by(change),
            move |db| db.query(&query),
            on_snapshot,
            on_error,
        )
    }

    /// Generic live read. `fetch` runs on the blocking pool once at start and
    /// again after every batch of changes for which `affects` is true.
    ///
    /// The first error ends the listener: `on_error` is called once and no
    /// reconnect is attempted. Must be called from within a tokio runtime.
    pub fn listen_with<T, M, F, S, E>(
        self: &Arc<Self>,
        affects: M,
        fetch: F,
        mut on_snapshot: S,
        on_error: E,
    ) -> ListenerRegistration
    where
        T: Send + 'static,
        M: Fn(&DocumentChange) -> bool + Send + 'static,
        F: Fn(&Database) -> Result<T> + Send + Sync + 'static,
        S: FnMut(T) + Send + 'static,
        E: FnOnce(anyhow::Error) + Send + 'static,
    {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let db = self.clone();
        let fetch = Arc::new(fetch);

        // Subscribe before the first fetch so nothing committed in between is missed.
        let mut changes = self.subscribe_changes();

        let task = tokio::spawn(async move {
            let mut on_error = Some(on_error);
            let mut dirty = true;

            loop {
                if dirty {
                    dirty = false;

                    let db = db.clone();
                    let fetch = fetch.clone();
                    let result = tokio::select! {
                        _ = cancelled.cancelled() => break,
                        joined = tokio::task::spawn_blocking(move || fetch(db.as_ref())) => joined,
                    };

                    if cancelled.is_cancelled() {
                        break;
                    }

                    let error = match result {
                        Ok(Ok(snapshot)) => {
                            on_snapshot(snapshot);
                            None
                        }
                        Ok(Err(e)) => Some(e),
                        Err(e) => Some(anyhow::anyhow!("Listener fetch panicked: {}", e)),
                    };

                    if let Some(e) = error {
                        warn!("Listener {} failed: {:#}", id, e);
                        if let Some(report) = on_error.take() {
                            report(e);
                        }
                        break;
                    }
                }

                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(change) => dirty |= affects(&change),
                        Err(RecvError::Lagged(n)) => {
                            debug!("Listener {} lagged by {} changes, refetching", id, n);
                            dirty = true;
                        }
                        Err(RecvError::Closed) => break,
                    },
                }

                // Coalesce whatever else is already queued into one refetch.
                loop {
                    match changes.try_recv() {
                        Ok(change) => dirty |= affects(&change),
                        Err(TryRecvError::Lagged(_)) => dirty = true,
                        Err(_) => break,
                    }
                }
            }

            debug!("Listener {} stopped", id);
        });

        ListenerRegistration { id, token, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(WAIT, rx.recv()).await.expect("timed out").expect("channel closed")
    }

    #[tokio::test]
    async fn delivers_initial_and_updated_snapshots() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.set("posts", "p1", json!({ "text": "one" })).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let reg = db.listen(
            Query::collection("posts"),
            move |docs| {
                let _ = tx.send(docs.len());
            },
            |_| {},
        );

        assert_eq!(next(&mut rx).await, 1);

        // other collections do not wake the listener
        db.set("users", "u1", json!({ "n": 1 })).unwrap();
        db.set("posts", "p2", json!({ "text": "two" })).unwrap();
        assert_eq!(next(&mut rx).await, 2);

        assert!(reg.is_active());
    }

    #[tokio::test]
    async fn nothing_is_delivered_after_removal() {
        let db = Arc::new(Database::open_in_memory().unwrap());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let reg = db.listen(
            Query::collection("posts"),
            move |docs| {
                let _ = tx.send(docs.len());
            },
            |_| {},
        );
        assert_eq!(next(&mut rx).await, 0);

        reg.remove();
        db.set("posts", "p1", json!({ "text": "late" })).unwrap();

        // the sender lives in the stopped task, so the channel closes
        let after = timeout(WAIT, rx.recv()).await.expect("timed out");
        assert_eq!(after, None);
    }

    #[tokio::test]
    async fn fetch_error_is_terminal() {
        let db = Arc::new(Database::open_in_memory().unwrap());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let reg = db.listen_with(
            |_| true,
            |_| -> Result<()> { anyhow::bail!("backend unavailable") },
            |_| panic!("no snapshot expected"),
            move |e| {
                let _ = tx.send(e.to_string());
            },
        );

        assert_eq!(next(&mut rx).await, "backend unavailable");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reg.is_active());
    }
}
