//! Posts from the viewer and their friends, newest first.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ping_db::{Database, Direction, DocumentChange, ListenerRegistration, Query, WriteOp};
use ping_types::api::PostView;
use ping_types::models::{Comment, Like, Post, User, UserChat};
use ping_types::paths::{self, POSTS, USERS};

use crate::backend::{Backend, decode_all};
use crate::conversation::SyncState;
use crate::error::{SyncError, SyncResult};
use crate::friends::links_query;
use crate::session::Session;
use crate::subscriptions::{LiveSubscription, SubscriptionGroup};

pub const DEFAULT_FEED_LIMIT: usize = 20;
pub const MAX_FEED_LIMIT: usize = 100;
pub const MAX_POST_LEN: usize = 2000;
pub const MAX_COMMENT_LEN: usize = 1000;

/// Requested page size, defaulted and capped.
pub fn feed_limit(requested: Option<usize>) -> usize {
    requested
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_FEED_LIMIT)
        .min(MAX_FEED_LIMIT)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedView {
    pub posts: Vec<PostView>,
    pub state: SyncState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeOutcome {
    pub liked: bool,
    pub like_count: usize,
}

/// An open feed. The audience query and the current feed query close with it.
pub struct FeedHandle {
    view: watch::Receiver<FeedView>,
    group: SubscriptionGroup<()>,
}

impl FeedHandle {
    pub fn view(&self) -> FeedView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<FeedView> {
        self.view.clone()
    }

    pub async fn wait_for<F>(&mut self, f: F) -> SyncResult<FeedView>
    where
        F: FnMut(&FeedView) -> bool,
    {
        self.view
            .wait_for(f)
            .await
            .map(|view| view.clone())
            .map_err(|_| SyncError::Subscription("feed closed".into()))
    }

    pub fn close(self) {}
}

impl LiveSubscription for FeedHandle {
    fn is_active(&self) -> bool {
        self.group.is_active()
    }
}

#[derive(Clone)]
pub struct FeedAggregator {
    backend: Backend,
}

impl FeedAggregator {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// The viewer plus everyone they are friends with.
    pub async fn compute_audience(&self, user_id: Uuid) -> SyncResult<BTreeSet<Uuid>> {
        let docs = self
            .backend
            .run(move |db| db.query(&links_query(user_id)))
            .await?;
        Ok(audience_of(user_id, &decode_all::<UserChat>(&docs)))
    }

    /// One-shot feed for a fixed audience.
    pub async fn fetch_feed(
        &self,
        session: &Session,
        audience: &BTreeSet<Uuid>,
        limit: Option<usize>,
    ) -> SyncResult<Vec<PostView>> {
        let viewer = session.user_id;
        let audience = audience.clone();
        let limit = feed_limit(limit);
        self.backend
            .run(move |db| load_feed(db, viewer, &audience, limit))
            .await
    }

    /// Live feed. A companion query over the viewer's friendship links
    /// replaces the feed query whenever the audience changes.
    pub fn open_feed(&self, session: &Session, limit: Option<usize>) -> FeedHandle {
        let viewer = session.user_id;
        let limit = feed_limit(limit);

        let (tx, rx) = watch::channel(FeedView {
            posts: Vec::new(),
            state: SyncState::Loading,
        });
        let tx = Arc::new(tx);
        let on_audience_error = tx.clone();

        let mut group = SubscriptionGroup::new();
        let slot = group.children();
        let failed_slot = group.children();
        let db = self.backend.db().clone();
        let mut current: Option<BTreeSet<Uuid>> = None;

        let audience_listener = self.backend.db().listen(
            links_query(viewer),
            move |docs| {
                let audience = audience_of(viewer, &decode_all::<UserChat>(&docs));
                if current.as_ref() == Some(&audience) {
                    return;
                }
                debug!("Feed of {} now covers {} authors", viewer, audience.len());
                current = Some(audience.clone());

                // Inserting under the same key drops the previous feed query.
                slot.insert((), follow_feed(&db, viewer, audience, limit, tx.clone()));
            },
            move |e| {
                on_audience_error.send_modify(|view| view.state = SyncState::ListenFailed(format!("{:#}", e)));
                // Nothing will re-target the feed query any more; stop it too.
                failed_slot.close();
            },
        );
        group.set_parent(audience_listener);

        info!("{} opened the feed (limit {})", viewer, limit);
        FeedHandle { view: rx, group }
    }

    /// Flip the viewer's like on a post.
    ///
    /// Reads the like list and writes it back whole; two concurrent toggles
    /// on the same post can lose one of the updates.
    pub async fn toggle_like(&self, session: &Session, post_id: Uuid) -> SyncResult<LikeOutcome> {
        let viewer = session.user_id;
        let outcome = self
            .backend
            .run(move |db| {
                let Some(doc) = db.get(POSTS, &post_id.to_string())? else {
                    return Ok(None);
                };
                let mut post: Post = doc.decode()?;

                let liked = if post.is_liked_by(viewer) {
                    post.likes.retain(|l| l.user_id != viewer);
                    false
                } else {
                    post.likes.push(Like {
                        user_id: viewer,
                        timestamp: Utc::now(),
                    });
                    true
                };

                db.update(POSTS, &post_id.to_string(), json!({ "likes": post.likes }))?;
                Ok(Some(LikeOutcome {
                    liked,
                    like_count: post.like_count(),
                }))
            })
            .await?;

        outcome.ok_or_else(|| SyncError::NotFound(format!("post {}", post_id)))
    }

    pub async fn create_post(&self, session: &Session, text: &str) -> SyncResult<Post> {
        let text = checked_text(text, MAX_POST_LEN)?;
        let post = Post {
            id: Uuid::new_v4(),
            author_id: session.user_id,
            text,
            timestamp: Utc::now(),
            likes: Vec::new(),
            comment_count: 0,
        };

        let stored = post.clone();
        self.backend
            .run(move |db| db.set(POSTS, &stored.id.to_string(), serde_json::to_value(&stored)?))
            .await?;

        info!("{} posted {}", post.author_id, post.id);
        Ok(post)
    }

    /// Delete a post and its comments in one batch. Author only.
    pub async fn delete_post(&self, session: &Session, post_id: Uuid) -> SyncResult<()> {
        let post = self.get_post(post_id).await?;
        if post.author_id != session.user_id {
            return Err(SyncError::NotAuthor(post_id));
        }

        let ops = vec![
            WriteOp::DeleteCollection {
                collection: paths::comments(post_id),
            },
            WriteOp::Delete {
                collection: POSTS.to_string(),
                id: post_id.to_string(),
            },
        ];
        self.backend.run(move |db| db.batch_write(ops)).await?;

        info!("{} deleted post {}", session.user_id, post_id);
        Ok(())
    }

    /// Append a comment and refresh the post's cached comment count.
    pub async fn add_comment(&self, session: &Session, post_id: Uuid, text: &str) -> SyncResult<Comment> {
        let text = checked_text(text, MAX_COMMENT_LEN)?;
        self.get_post(post_id).await?;

        let comment = Comment {
            id: Uuid::new_v4(),
            post_id,
            author_id: session.user_id,
            text,
            timestamp: Utc::now(),
        };

        let stored = comment.clone();
        self.backend
            .run(move |db| {
                db.set(
                    &paths::comments(post_id),
                    &stored.id.to_string(),
                    serde_json::to_value(&stored)?,
                )
            })
            .await?;

        // The cache is advisory; feeds recount on every fetch.
        let recount = self
            .backend
            .run(move |db| {
                let count = db.count(&paths::comments(post_id))?;
                db.update(POSTS, &post_id.to_string(), json!({ "commentCount": count }))
            })
            .await;
        if let Err(e) = recount {
            warn!("Comment {} added but post {} count is stale: {}", comment.id, post_id, e);
        }

        Ok(comment)
    }

    /// Comments on a post, oldest first.
    pub async fn comments(&self, post_id: Uuid) -> SyncResult<Vec<Comment>> {
        let docs = self
            .backend
            .run(move |db| {
                db.query(&Query::collection(paths::comments(post_id)).order_by("timestamp", Direction::Asc))
            })
            .await?;
        Ok(decode_all(&docs))
    }

    /// One author's posts, newest first.
    pub async fn posts_by(&self, author_id: Uuid, limit: Option<usize>) -> SyncResult<Vec<Post>> {
        let limit = feed_limit(limit);
        let docs = self
            .backend
            .run(move |db| {
                db.query(
                    &Query::collection(POSTS)
                        .where_eq("authorId", author_id.to_string())
                        .order_by("timestamp", Direction::Desc)
                        .limit(limit),
                )
            })
            .await?;
        Ok(decode_all(&docs))
    }

    async fn get_post(&self, post_id: Uuid) -> SyncResult<Post> {
        let doc = self
            .backend
            .run(move |db| db.get(POSTS, &post_id.to_string()))
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("post {}", post_id)))?;
        Ok(doc.decode()?)
    }
}

fn audience_of(viewer: Uuid, links: &[UserChat]) -> BTreeSet<Uuid> {
    links
        .iter()
        .map(|l| l.friend_user_id)
        .chain(std::iter::once(viewer))
        .collect()
}

fn checked_text(text: &str, max: usize) -> SyncResult<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SyncError::validation("text", "must not be empty"));
    }
    if text.chars().count() > max {
        return Err(SyncError::validation("text", "is too long"));
    }
    Ok(text.to_string())
}

fn follow_feed(
    db: &Arc<Database>,
    viewer: Uuid,
    audience: BTreeSet<Uuid>,
    limit: usize,
    tx: Arc<watch::Sender<FeedView>>,
) -> ListenerRegistration {
    let failed = tx.clone();
    db.listen_with(
        |change: &DocumentChange| {
            change.collection == POSTS || change.collection == USERS || paths::is_comments(&change.collection)
        },
        move |db: &Database| load_feed(db, viewer, &audience, limit),
        move |posts| {
            // A failed view stays failed.
            tx.send_if_modified(|view| {
                if matches!(view.state, SyncState::ListenFailed(_)) {
                    return false;
                }
                *view = FeedView {
                    posts,
                    state: SyncState::Live,
                };
                true
            });
        },
        move |e| {
            failed.send_modify(|view| view.state = SyncState::ListenFailed(format!("{:#}", e)));
        },
    )
}

/// Posts by the audience, newest first, each with its live comment count and
/// its author's display name.
fn load_feed(db: &Database, viewer: Uuid, audience: &BTreeSet<Uuid>, limit: usize) -> anyhow::Result<Vec<PostView>> {
    let authors: Vec<String> = audience.iter().map(Uuid::to_string).collect();
    let docs = db.query(
        &Query::collection(POSTS)
            .where_in("authorId", authors.clone())
            .order_by("timestamp", Direction::Desc)
            .limit(limit),
    )?;
    let posts: Vec<Post> = decode_all(&docs);

    let names: HashMap<Uuid, String> = decode_all::<User>(&db.query(&Query::collection(USERS).where_in("id", authors))?)
        .into_iter()
        .map(|u| (u.id, u.display_name))
        .collect();

    posts
        .into_iter()
        .map(|post| {
            let comment_count = db.count(&paths::comments(post.id))?;
            Ok(PostView {
                author_name: names.get(&post.author_id).cloned(),
                like_count: post.like_count(),
                is_liked_by_me: post.is_liked_by(viewer),
                comment_count,
                post,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_caps() {
        assert_eq!(feed_limit(None), DEFAULT_FEED_LIMIT);
        assert_eq!(feed_limit(Some(0)), DEFAULT_FEED_LIMIT);
        assert_eq!(feed_limit(Some(5)), 5);
        assert_eq!(feed_limit(Some(10_000)), MAX_FEED_LIMIT);
    }

    #[test]
    fn audience_includes_self() {
        let me = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let link = UserChat {
            owner_user_id: me,
            friend_user_id: friend,
            chat_id: ping_types::models::chat_id_for(me, friend),
            created_at: Utc::now(),
        };

        assert_eq!(audience_of(me, &[]), BTreeSet::from([me]));
        assert_eq!(audience_of(me, &[link]), BTreeSet::from([me, friend]));
    }

    #[test]
    fn post_text_is_trimmed_and_bounded() {
        assert_eq!(checked_text("  hi  ", 10).unwrap(), "hi");
        assert!(matches!(checked_text("   ", 10), Err(SyncError::Validation { .. })));
        assert!(checked_text(&"x".repeat(11), 10).is_err());
    }
}
