use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ping_db::{Database, Direction, ListenerRegistration, Query, WriteOp};
use ping_types::models::{Message, MessageStatus, chat_participants};
use ping_types::paths;

use crate::backend::{Backend, decode_all};
use crate::chat_list::{self, ChatListHandle};
use crate::error::{SyncError, SyncResult};
use crate::friends::upsert_chat_op;
use crate::session::Session;
use crate::subscriptions::LiveSubscription;

pub const MAX_MESSAGE_LEN: usize = 4000;

/// Where a live view stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Loading,
    Live,
    /// Terminal: the live query stopped and will not restart on its own.
    ListenFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub chat_id: String,
    pub messages: Vec<Message>,
    pub state: SyncState,
}

/// An open conversation. Dropping it closes the live query.
pub struct ConversationHandle {
    chat_id: String,
    view: watch::Receiver<ConversationView>,
    registration: ListenerRegistration,
    closed: Arc<AtomicBool>,
}

impl ConversationHandle {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn view(&self) -> ConversationView {
        self.view.borrow().clone()
    }

    /// Receiver that sees every new snapshot; closes with the handle.
    pub fn watch(&self) -> watch::Receiver<ConversationView> {
        self.view.clone()
    }

    /// Wait until the view satisfies `f`.
    pub async fn wait_for<F>(&mut self, f: F) -> SyncResult<ConversationView>
    where
        F: FnMut(&ConversationView) -> bool,
    {
        self.view
            .wait_for(f)
            .await
            .map(|view| view.clone())
            .map_err(|_| SyncError::Subscription(format!("conversation {} closed", self.chat_id)))
    }

    pub fn close(self) {}
}

impl Drop for ConversationHandle {
    fn drop(&mut self) {
        // Raised before the registration is cancelled, so a snapshot already
        // in flight sends no read receipts.
        self.closed.store(true, Ordering::Release);
    }
}

impl LiveSubscription for ConversationHandle {
    fn is_active(&self) -> bool {
        self.registration.is_active()
    }
}

/// Messages of one conversation, in timestamp order, with read receipts.
#[derive(Clone)]
pub struct ConversationSynchronizer {
    backend: Backend,
}

impl ConversationSynchronizer {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Open the live message list of `chat_id` for the viewer.
    ///
    /// Every snapshot replaces the whole list. Each snapshot that contains
    /// messages from the other participant that are not yet read triggers
    /// one batch write marking all of them read.
    pub async fn open(&self, session: &Session, chat_id: &str) -> SyncResult<ConversationHandle> {
        let (a, b) = participants_of(session, chat_id)?;

        // Lazily create the chat record the first time anyone opens it.
        let op = upsert_chat_op(chat_id, a, b, Utc::now(), None);
        self.backend.run(move |db| db.batch_write(vec![op])).await?;

        let (tx, rx) = watch::channel(ConversationView {
            chat_id: chat_id.to_string(),
            messages: Vec::new(),
            state: SyncState::Loading,
        });
        let tx = Arc::new(tx);
        let failed = tx.clone();

        let viewer = session.user_id;
        let backend = self.backend.clone();
        let cid = chat_id.to_string();
        let closed = Arc::new(AtomicBool::new(false));
        let closing = closed.clone();

        let registration = self.backend.db().listen(
            messages_query(chat_id),
            move |docs| {
                if closing.load(Ordering::Acquire) {
                    return;
                }

                let messages: Vec<Message> = decode_all(&docs);
                let unread: Vec<Uuid> = messages
                    .iter()
                    .filter(|m| m.is_unread_for(viewer))
                    .map(|m| m.id)
                    .collect();

                tx.send_replace(ConversationView {
                    chat_id: cid.clone(),
                    messages,
                    state: SyncState::Live,
                });

                if !unread.is_empty() {
                    let backend = backend.clone();
                    let cid = cid.clone();
                    let closing = closing.clone();
                    tokio::spawn(async move {
                        if closing.load(Ordering::Acquire) {
                            return;
                        }
                        let count = unread.len();
                        match backend.run(move |db| mark_read_batch(db, &cid, &unread)).await {
                            Ok(()) => debug!("Marked {} messages read for {}", count, viewer),
                            Err(e) => warn!("Read receipts for {} failed: {}", viewer, e),
                        }
                    });
                }
            },
            move |e| {
                failed.send_modify(|view| view.state = SyncState::ListenFailed(format!("{:#}", e)));
            },
        );

        info!("{} opened conversation {}", viewer, chat_id);
        Ok(ConversationHandle {
            chat_id: chat_id.to_string(),
            view: rx,
            registration,
            closed,
        })
    }

    /// Open the viewer's live chat list, most recent activity first.
    pub fn open_chat_list(&self, session: &Session) -> ChatListHandle {
        chat_list::open(&self.backend, session)
    }

    /// Append a message, then refresh the chat summary. The summary write
    /// failing does not undo or fail the send.
    pub async fn send_message(&self, session: &Session, chat_id: &str, text: &str) -> SyncResult<Message> {
        let (a, b) = participants_of(session, chat_id)?;

        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::validation("text", "must not be empty"));
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(SyncError::validation("text", "must be at most 4000 characters"));
        }

        let message = Message {
            id: Uuid::new_v4(),
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            sender_id: session.user_id,
            timestamp: Utc::now(),
            status: MessageStatus::Sent,
        };

        let stored = message.clone();
        self.backend
            .run(move |db| {
                db.set(
                    &paths::messages(&stored.chat_id),
                    &stored.id.to_string(),
                    serde_json::to_value(&stored)?,
                )
            })
            .await?;

        let summary = upsert_chat_op(chat_id, a, b, message.timestamp, Some(&message));
        if let Err(e) = self.backend.run(move |db| db.batch_write(vec![summary])).await {
            warn!("Message {} sent but chat {} summary is stale: {}", message.id, chat_id, e);
        }

        Ok(message)
    }

    /// One-shot ordered fetch.
    pub async fn messages(&self, session: &Session, chat_id: &str) -> SyncResult<Vec<Message>> {
        participants_of(session, chat_id)?;
        let query = messages_query(chat_id);
        let docs = self.backend.run(move |db| db.query(&query)).await?;
        Ok(decode_all(&docs))
    }

    /// One-shot read transition; returns how many messages changed.
    pub async fn mark_read(&self, session: &Session, chat_id: &str) -> SyncResult<usize> {
        let viewer = session.user_id;
        let unread: Vec<Uuid> = self
            .messages(session, chat_id)
            .await?
            .iter()
            .filter(|m| m.is_unread_for(viewer))
            .map(|m| m.id)
            .collect();

        let count = unread.len();
        if count > 0 {
            let cid = chat_id.to_string();
            self.backend
                .run(move |db| mark_read_batch(db, &cid, &unread))
                .await?;
        }
        Ok(count)
    }
}

/// Both participants of `chat_id`, provided the viewer is one of them.
fn participants_of(session: &Session, chat_id: &str) -> SyncResult<(Uuid, Uuid)> {
    let (a, b) = chat_participants(chat_id)
        .ok_or_else(|| SyncError::NotFound(format!("conversation {}", chat_id)))?;
    if session.user_id != a && session.user_id != b {
        return Err(SyncError::NotParticipant(chat_id.to_string()));
    }
    Ok((a, b))
}

pub(crate) fn messages_query(chat_id: &str) -> Query {
    Query::collection(paths::messages(chat_id)).order_by("timestamp", Direction::Asc)
}

/// Atomically flip the given messages to `read`. Re-marking is a no-op.
fn mark_read_batch(db: &Database, chat_id: &str, ids: &[Uuid]) -> anyhow::Result<()> {
    let collection = paths::messages(chat_id);
    let ops = ids
        .iter()
        .map(|id| WriteOp::Update {
            collection: collection.clone(),
            id: id.to_string(),
            patch: json!({ "status": MessageStatus::Read.as_str() }),
        })
        .collect();
    db.batch_write(ops)
}
