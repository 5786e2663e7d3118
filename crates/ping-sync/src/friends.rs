use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use ping_db::{Query, WriteOp};
use ping_types::models::{Chat, Message, UserChat, chat_id_for};
use ping_types::paths::{self, CHATS, USER_CHATS, USERS};

use crate::backend::{Backend, decode_all};
use crate::error::{SyncError, SyncResult};
use crate::session::Session;

/// Symmetric friendship links plus the conversation record they share.
#[derive(Clone)]
pub struct FriendshipLedger {
    backend: Backend,
}

impl FriendshipLedger {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Link the viewer and `target`, returning their shared chat id.
    ///
    /// Three independent upserts: one link per side and the chat record.
    /// Repeating the call only refreshes `updatedAt`. A failed write is not
    /// rolled back; calling again repairs it.
    pub async fn add_friend(&self, session: &Session, target: Uuid) -> SyncResult<String> {
        let me = session.user_id;
        if me == target {
            return Err(SyncError::CannotAddSelf);
        }

        let exists = self
            .backend
            .run(move |db| Ok(db.get(USERS, &target.to_string())?.is_some()))
            .await?;
        if !exists {
            return Err(SyncError::NotFound(format!("user {}", target)));
        }

        let chat_id = chat_id_for(me, target);
        let now = Utc::now();

        let writes = [
            link_op(me, target, &chat_id, now),
            link_op(target, me, &chat_id, now),
            upsert_chat_op(&chat_id, me, target, now, None),
        ];

        let [mine, theirs, chat] = writes.map(|op| {
            let backend = self.backend.clone();
            async move { backend.run(move |db| db.batch_write(vec![op])).await }
        });
        let results = tokio::join!(mine, theirs, chat);

        let mut first_error = None;
        for (what, result) in [("own link", results.0), ("friend link", results.1), ("chat", results.2)] {
            if let Err(e) = result {
                warn!("add_friend {} -> {}: {} write failed: {}", me, target, what, e);
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        info!("{} and {} are friends in chat {}", me, target, chat_id);
        Ok(chat_id)
    }

    /// The user's friendship links, oldest first.
    pub async fn list_friends(&self, user_id: Uuid) -> SyncResult<Vec<UserChat>> {
        let docs = self
            .backend
            .run(move |db| db.query(&links_query(user_id)))
            .await?;

        let mut links: Vec<UserChat> = decode_all(&docs);
        links.sort_by_key(|l| l.created_at);
        Ok(links)
    }

    pub async fn friend_ids(&self, user_id: Uuid) -> SyncResult<BTreeSet<Uuid>> {
        Ok(self
            .list_friends(user_id)
            .await?
            .into_iter()
            .map(|l| l.friend_user_id)
            .collect())
    }
}

/// Live query over one user's friendship links.
pub(crate) fn links_query(owner: Uuid) -> Query {
    Query::collection(USER_CHATS).where_eq("ownerUserId", owner.to_string())
}

fn link_op(owner: Uuid, friend: Uuid, chat_id: &str, now: DateTime<Utc>) -> WriteOp {
    let link = UserChat {
        owner_user_id: owner,
        friend_user_id: friend,
        chat_id: chat_id.to_string(),
        created_at: now,
    };

    WriteOp::Upsert {
        collection: USER_CHATS.to_string(),
        id: paths::user_chat_key(owner, chat_id),
        on_create: serde_json::to_value(&link).unwrap_or_default(),
        on_update: json!({}),
    }
}

/// Create-or-refresh the chat record for a pair, optionally recording the
/// message that made it current.
pub(crate) fn upsert_chat_op(
    chat_id: &str,
    a: Uuid,
    b: Uuid,
    now: DateTime<Utc>,
    last: Option<&Message>,
) -> WriteOp {
    let mut participants = vec![a, b];
    participants.sort_by_key(|id| id.to_string());

    let chat = Chat {
        chat_id: chat_id.to_string(),
        participants: participants.clone(),
        created_at: now,
        updated_at: now,
        last_message: last.map(|m| m.text.clone()),
        last_message_time: last.map(|m| m.timestamp),
    };

    let mut on_update = json!({
        "participants": participants,
        "updatedAt": now.timestamp_micros(),
    });
    if let Some(m) = last {
        on_update["lastMessage"] = json!(m.text);
        on_update["lastMessageTime"] = json!(m.timestamp.timestamp_micros());
    }

    WriteOp::Upsert {
        collection: CHATS.to_string(),
        id: chat_id.to_string(),
        on_create: serde_json::to_value(&chat).unwrap_or_default(),
        on_update,
    }
}
