//! Lifecycle of live queries owned by one screen or connection.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;
use uuid::Uuid;

use ping_db::ListenerRegistration;

/// Anything that keeps live queries open until it is dropped.
pub trait LiveSubscription: Send {
    fn is_active(&self) -> bool;
}

impl LiveSubscription for ListenerRegistration {
    fn is_active(&self) -> bool {
        ListenerRegistration::is_active(self)
    }
}

/// (entity type, key) of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    Conversation(String),
    ChatList(Uuid),
    Feed(Uuid),
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conversation(chat_id) => write!(f, "conversation:{}", chat_id),
            Self::ChatList(user_id) => write!(f, "chat-list:{}", user_id),
            Self::Feed(user_id) => write!(f, "feed:{}", user_id),
        }
    }
}

struct Entry {
    id: Uuid,
    subscription: Box<dyn LiveSubscription>,
}

/// At most one live subscription per key. Cloning shares the same set;
/// dropping the last clone closes everything in it.
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    entries: Arc<Mutex<HashMap<SubscriptionKey, Entry>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `subscription` under `key`, tearing down the previous holder
    /// of the key first. Returns an id usable with [`remove_if`].
    ///
    /// [`remove_if`]: SubscriptionManager::remove_if
    pub fn replace(&self, key: SubscriptionKey, subscription: impl LiveSubscription + 'static) -> Uuid {
        let id = Uuid::new_v4();
        let mut entries = self.lock();
        if let Some(previous) = entries.remove(&key) {
            debug!("Closing previous subscription {} ({})", key, previous.id);
            drop(previous);
        }
        entries.insert(
            key,
            Entry {
                id,
                subscription: Box::new(subscription),
            },
        );
        id
    }

    pub fn remove(&self, key: &SubscriptionKey) -> bool {
        // Drop outside the lock; teardown may log.
        let removed = self.lock().remove(key);
        removed.is_some()
    }

    /// Remove `key` only if it is still the subscription identified by `id`.
    pub fn remove_if(&self, key: &SubscriptionKey, id: Uuid) -> bool {
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|e| e.id == id) {
            entries.remove(key);
            return true;
        }
        false
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        self.lock().get(key).is_some_and(|e| e.subscription.is_active())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close_all(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        debug!("Closing {} subscriptions", drained.len());
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A parent live query plus the child queries it opened, closed together.
pub struct SubscriptionGroup<K: Eq + Hash> {
    parent: Option<ListenerRegistration>,
    children: ChildRegistrations<K>,
}

impl<K: Eq + Hash + Clone + Send + 'static> SubscriptionGroup<K> {
    pub fn new() -> Self {
        Self {
            parent: None,
            children: ChildRegistrations::new(),
        }
    }

    /// Shared view of the children for use inside the parent's callbacks.
    pub fn children(&self) -> ChildRegistrations<K> {
        self.children.clone()
    }

    pub fn set_parent(&mut self, parent: ListenerRegistration) {
        self.parent = Some(parent);
    }

    pub fn close(self) {}
}

impl<K: Eq + Hash + Clone + Send + 'static> Default for SubscriptionGroup<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> Drop for SubscriptionGroup<K> {
    fn drop(&mut self) {
        self.parent.take();
        self.children.close();
    }
}

impl<K: Eq + Hash + Send> LiveSubscription for SubscriptionGroup<K> {
    fn is_active(&self) -> bool {
        self.parent.as_ref().is_some_and(|p| p.is_active())
    }
}

/// Child registrations keyed by `K`. Once closed, anything inserted is torn
/// down immediately, so a parent callback racing with close cannot leak.
pub struct ChildRegistrations<K: Eq + Hash> {
    inner: Arc<ChildInner<K>>,
}

struct ChildInner<K> {
    closed: AtomicBool,
    map: Mutex<HashMap<K, ListenerRegistration>>,
}

impl<K: Eq + Hash> Clone for ChildRegistrations<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: Eq + Hash> ChildRegistrations<K> {
    fn new() -> Self {
        Self {
            inner: Arc::new(ChildInner {
                closed: AtomicBool::new(false),
                map: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, ListenerRegistration>> {
        self.inner.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    pub fn insert(&self, key: K, registration: ListenerRegistration) {
        let mut map = self.lock();
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        map.insert(key, registration);
    }

    /// Close every child whose key is not in `keep`.
    pub fn retain(&self, keep: &HashSet<K>) {
        self.lock().retain(|k, _| keep.contains(k));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Tear down every child and refuse further inserts.
    pub fn close(&self) {
        let mut map = self.lock();
        self.inner.closed.store(true, Ordering::Release);
        map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ping_db::{Database, Query};

    fn listener(db: &Arc<Database>) -> ListenerRegistration {
        db.listen(Query::collection("posts"), |_| {}, |_| {})
    }

    #[tokio::test]
    async fn replace_tears_down_previous() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let manager = SubscriptionManager::new();
        let key = SubscriptionKey::Feed(Uuid::new_v4());

        let first_id = manager.replace(key.clone(), listener(&db));
        let second_id = manager.replace(key.clone(), listener(&db));

        assert_ne!(first_id, second_id);
        assert_eq!(manager.len(), 1);

        // a stale id cannot remove the newer subscription
        assert!(!manager.remove_if(&key, first_id));
        assert!(manager.is_active(&key));
        assert!(manager.remove_if(&key, second_id));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn closing_a_group_closes_children() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut group: SubscriptionGroup<String> = SubscriptionGroup::new();
        group.set_parent(listener(&db));

        let children = group.children();
        children.insert("a".into(), listener(&db));
        children.insert("b".into(), listener(&db));
        assert_eq!(children.len(), 2);

        children.retain(&HashSet::from(["b".to_string()]));
        assert!(!children.contains(&"a".to_string()));
        assert!(group.is_active());

        group.close();
        assert!(children.is_closed());
        assert!(children.is_empty());

        // late inserts from a parent callback are dropped on the spot
        children.insert("c".into(), listener(&db));
        assert!(children.is_empty());
    }
}
