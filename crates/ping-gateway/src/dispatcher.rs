use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use ping_sync::{
    ChatListView, ConversationView, FeedView, LiveSubscription, Services, Session, SubscriptionKey,
    SubscriptionManager, SyncState,
};
use ping_types::events::{GatewayCommand, GatewayEvent};

/// A live view that can be pushed to a client.
trait Snapshot: Clone + Send + Sync + 'static {
    fn state(&self) -> &SyncState;
    fn event(&self) -> GatewayEvent;
}

impl Snapshot for ConversationView {
    fn state(&self) -> &SyncState {
        &self.state
    }

    fn event(&self) -> GatewayEvent {
        GatewayEvent::ConversationSnapshot {
            chat_id: self.chat_id.clone(),
            messages: self.messages.clone(),
        }
    }
}

impl Snapshot for ChatListView {
    fn state(&self) -> &SyncState {
        &self.state
    }

    fn event(&self) -> GatewayEvent {
        GatewayEvent::ChatListSnapshot {
            chats: self.chats.clone(),
        }
    }
}

impl Snapshot for FeedView {
    fn state(&self) -> &SyncState {
        &self.state
    }

    fn event(&self) -> GatewayEvent {
        GatewayEvent::FeedSnapshot {
            posts: self.posts.clone(),
        }
    }
}

/// Shared by every connection: the sync services plus who is connected.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    services: Services,
    jwt_secret: String,
    feed_limit: usize,

    /// user_id -> number of open connections
    online: RwLock<HashMap<Uuid, usize>>,
}

impl Dispatcher {
    pub fn new(services: Services, jwt_secret: String, feed_limit: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                services,
                jwt_secret,
                feed_limit,
                online: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn jwt_secret(&self) -> &str {
        &self.inner.jwt_secret
    }

    /// Start a connection for an identified user.
    pub async fn connect(&self, session: Session) -> (Connection, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        *self.inner.online.write().await.entry(session.user_id).or_default() += 1;

        let conn = Connection {
            id: Uuid::new_v4(),
            session,
            subscriptions: SubscriptionManager::new(),
            events,
        };
        (conn, rx)
    }

    /// Close everything the connection had open.
    pub async fn disconnect(&self, conn: &Connection) {
        conn.subscriptions.close_all();

        let mut online = self.inner.online.write().await;
        if let Some(count) = online.get_mut(&conn.session.user_id) {
            *count -= 1;
            if *count == 0 {
                online.remove(&conn.session.user_id);
            }
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.online.read().await.contains_key(&user_id)
    }

    pub async fn handle_command(&self, conn: &Connection, cmd: GatewayCommand) {
        let services = &self.inner.services;
        let session = &conn.session;

        match cmd {
            GatewayCommand::Identify { .. } => conn.send(GatewayEvent::Error {
                message: "already identified".into(),
            }),

            GatewayCommand::OpenConversation { chat_id } => {
                match services.conversations.open(session, &chat_id).await {
                    Ok(handle) => {
                        let view = handle.watch();
                        conn.install(SubscriptionKey::Conversation(chat_id), handle, view);
                    }
                    Err(e) => {
                        warn!("{} could not open {}: {}", session.user_id, chat_id, e);
                        conn.send(GatewayEvent::Error { message: e.to_string() });
                    }
                }
            }

            GatewayCommand::CloseConversation { chat_id } => {
                conn.subscriptions.remove(&SubscriptionKey::Conversation(chat_id));
            }

            GatewayCommand::OpenChatList => {
                let handle = services.conversations.open_chat_list(session);
                let view = handle.watch();
                conn.install(SubscriptionKey::ChatList(session.user_id), handle, view);
            }

            GatewayCommand::CloseChatList => {
                conn.subscriptions.remove(&SubscriptionKey::ChatList(session.user_id));
            }

            GatewayCommand::OpenFeed { limit } => {
                let handle = services
                    .feed
                    .open_feed(session, Some(limit.unwrap_or(self.inner.feed_limit)));
                let view = handle.watch();
                conn.install(SubscriptionKey::Feed(session.user_id), handle, view);
            }

            GatewayCommand::CloseFeed => {
                conn.subscriptions.remove(&SubscriptionKey::Feed(session.user_id));
            }
        }
    }
}

/// One identified WebSocket connection and the live queries it holds open.
pub struct Connection {
    id: Uuid,
    session: Session,
    subscriptions: SubscriptionManager,
    events: mpsc::UnboundedSender<GatewayEvent>,
}

impl Connection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn send(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }

    /// Register `handle` under `key` (closing whatever held it before) and
    /// forward its snapshots to the client until it closes or fails.
    fn install<V: Snapshot>(
        &self,
        key: SubscriptionKey,
        handle: impl LiveSubscription + 'static,
        mut view: watch::Receiver<V>,
    ) {
        let id = self.subscriptions.replace(key.clone(), handle);
        let events = self.events.clone();
        let subscriptions = self.subscriptions.clone();
        debug!("Connection {} opened {}", self.id, key);

        tokio::spawn(async move {
            // Ends when the handle is dropped and its sender goes away.
            while view.changed().await.is_ok() {
                let current = view.borrow_and_update().clone();
                let event = match current.state() {
                    SyncState::Loading => continue,
                    SyncState::Live => current.event(),
                    SyncState::ListenFailed(reason) => {
                        let _ = events.send(GatewayEvent::ListenFailed {
                            subscription: key.to_string(),
                            reason: reason.clone(),
                        });
                        subscriptions.remove_if(&key, id);
                        break;
                    }
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        });
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.subscriptions.is_empty() {
            info!("Connection {} dropped with {} live queries", self.id, self.subscriptions.len());
            self.subscriptions.close_all();
        }
    }
}
