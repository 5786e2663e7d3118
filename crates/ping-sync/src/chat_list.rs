//! The viewer's conversations with their latest activity.
//!
//! One parent live query follows the viewer's friendship links. For every
//! chat it names, a nested live query follows that chat's newest message and
//! the number of messages the viewer has not read yet. Nested queries are
//! opened and closed as the parent snapshot changes and all of them close
//! with the handle.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use ping_db::{Database, Direction, DocumentChange, ListenerRegistration, Query};
use ping_types::events::ChatSummary;
use ping_types::models::{Message, MessageStatus, UserChat};
use ping_types::paths;

use crate::backend::{Backend, decode_all};
use crate::conversation::SyncState;
use crate::error::{SyncError, SyncResult};
use crate::friends::links_query;
use crate::session::Session;
use crate::subscriptions::{LiveSubscription, SubscriptionGroup};

#[derive(Debug, Clone, PartialEq)]
pub struct ChatListView {
    pub chats: Vec<ChatSummary>,
    pub state: SyncState,
}

/// An open chat list. Dropping it closes the parent and every nested query.
pub struct ChatListHandle {
    view: watch::Receiver<ChatListView>,
    group: SubscriptionGroup<String>,
}

impl ChatListHandle {
    pub fn view(&self) -> ChatListView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ChatListView> {
        self.view.clone()
    }

    /// Number of nested per-chat queries currently open.
    pub fn open_chats(&self) -> usize {
        self.group.children().len()
    }

    pub async fn wait_for<F>(&mut self, f: F) -> SyncResult<ChatListView>
    where
        F: FnMut(&ChatListView) -> bool,
    {
        self.view
            .wait_for(f)
            .await
            .map(|view| view.clone())
            .map_err(|_| SyncError::Subscription("chat list closed".into()))
    }

    pub fn close(self) {}
}

impl LiveSubscription for ChatListHandle {
    fn is_active(&self) -> bool {
        self.group.is_active()
    }
}

/// Latest message and unread count of one chat.
#[derive(Debug, Clone, Default)]
struct Activity {
    latest: Option<Message>,
    unread: usize,
}

#[derive(Default)]
struct ListState {
    loaded: bool,
    links: HashMap<String, UserChat>,
    activity: HashMap<String, Activity>,
    failed: Option<String>,
}

impl ListState {
    fn render(&self) -> ChatListView {
        let mut chats: Vec<ChatSummary> = self
            .links
            .values()
            .map(|link| {
                let activity = self.activity.get(&link.chat_id).cloned().unwrap_or_default();
                ChatSummary {
                    link: link.clone(),
                    last_message: activity.latest,
                    unread: activity.unread,
                }
            })
            .collect();

        // Latest message time, falling back to when the friendship started.
        chats.sort_by(|a, b| last_activity(b).cmp(&last_activity(a)));

        let state = match (&self.failed, self.loaded) {
            (Some(reason), _) => SyncState::ListenFailed(reason.clone()),
            (None, true) => SyncState::Live,
            (None, false) => SyncState::Loading,
        };
        ChatListView { chats, state }
    }
}

fn last_activity(summary: &ChatSummary) -> i64 {
    summary
        .last_message
        .as_ref()
        .map(|m| m.timestamp)
        .unwrap_or(summary.link.created_at)
        .timestamp_micros()
}

type Shared = Arc<(Mutex<ListState>, watch::Sender<ChatListView>)>;

fn publish(shared: &Shared, f: impl FnOnce(&mut ListState)) {
    let (state, tx) = shared.as_ref();
    let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut state);
    tx.send_replace(state.render());
}

pub(crate) fn open(backend: &Backend, session: &Session) -> ChatListHandle {
    let viewer = session.user_id;
    let (tx, rx) = watch::channel(ChatListView {
        chats: Vec::new(),
        state: SyncState::Loading,
    });
    let shared: Shared = Arc::new((Mutex::new(ListState::default()), tx));

    let mut group = SubscriptionGroup::new();
    let children = group.children();
    let db = backend.db().clone();
    let on_links = shared.clone();
    let on_failure = shared.clone();

    let parent = backend.db().listen(
        links_query(viewer),
        move |docs| {
            let links: HashMap<String, UserChat> = decode_all::<UserChat>(&docs)
                .into_iter()
                .map(|link| (link.chat_id.clone(), link))
                .collect();
            let keep: HashSet<String> = links.keys().cloned().collect();

            children.retain(&keep);
            publish(&on_links, |state| {
                state.loaded = true;
                state.activity.retain(|chat_id, _| keep.contains(chat_id));
                state.links = links;
            });

            for chat_id in keep {
                if !children.contains(&chat_id) {
                    debug!("Chat list of {} following {}", viewer, chat_id);
                    let child = follow_chat(&db, viewer, chat_id.clone(), on_links.clone());
                    children.insert(chat_id, child);
                }
            }
        },
        move |e| publish(&on_failure, |state| state.failed = Some(format!("{:#}", e))),
    );
    group.set_parent(parent);

    info!("{} opened the chat list", viewer);
    ChatListHandle { view: rx, group }
}

fn follow_chat(db: &Arc<Database>, viewer: Uuid, chat_id: String, shared: Shared) -> ListenerRegistration {
    let collection = paths::messages(&chat_id);
    let watched = collection.clone();
    let on_failure = shared.clone();
    let key = chat_id.clone();

    db.listen_with(
        move |change: &DocumentChange| change.collection == watched,
        move |db: &Database| load_activity(db, &collection, viewer),
        move |activity| {
            publish(&shared, |state| {
                // The parent may have dropped this chat while we were fetching.
                if state.links.contains_key(&key) {
                    state.activity.insert(key.clone(), activity);
                }
            })
        },
        move |e| {
            publish(&on_failure, |state| {
                state.failed = Some(format!("chat {}: {:#}", chat_id, e));
            })
        },
    )
}

fn load_activity(db: &Database, collection: &str, viewer: Uuid) -> anyhow::Result<Activity> {
    let latest = db.query(
        &Query::collection(collection)
            .order_by("timestamp", Direction::Desc)
            .limit(1),
    )?;
    let sent = db.query(&Query::collection(collection).where_eq("status", MessageStatus::Sent.as_str()))?;

    Ok(Activity {
        latest: decode_all::<Message>(&latest).into_iter().next(),
        unread: decode_all::<Message>(&sent)
            .iter()
            .filter(|m| m.is_unread_for(viewer))
            .count(),
    })
}
