//! Ping synchronization core.
//!
//! Everything here talks to the document store through [`Backend`]: plain
//! reads and writes for user actions, live queries for anything a screen
//! keeps on display. Writers see their own results through the same live
//! queries as everybody else.

pub mod backend;
pub mod chat_list;
pub mod conversation;
pub mod error;
pub mod feed;
pub mod friends;
pub mod identity;
pub mod session;
pub mod subscriptions;

pub use backend::Backend;
pub use chat_list::{ChatListHandle, ChatListView};
pub use conversation::{ConversationHandle, ConversationSynchronizer, ConversationView, SyncState};
pub use error::{SyncError, SyncResult};
pub use feed::{FeedAggregator, FeedHandle, FeedView, LikeOutcome};
pub use friends::FriendshipLedger;
pub use identity::IdentityResolver;
pub use session::{AuthState, Session, SessionHolder};
pub use subscriptions::{LiveSubscription, SubscriptionGroup, SubscriptionKey, SubscriptionManager};

/// All services over one backend, as handed to the HTTP and WebSocket layers.
#[derive(Clone)]
pub struct Services {
    pub identity: IdentityResolver,
    pub friends: FriendshipLedger,
    pub conversations: ConversationSynchronizer,
    pub feed: FeedAggregator,
}

impl Services {
    pub fn new(backend: Backend) -> Self {
        Self {
            identity: IdentityResolver::new(backend.clone()),
            friends: FriendshipLedger::new(backend.clone()),
            conversations: ConversationSynchronizer::new(backend.clone()),
            feed: FeedAggregator::new(backend),
        }
    }
}
