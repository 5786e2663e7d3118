//! Collection addresses in the document store.
//!
//! Top-level collections are plain names; child collections are addressed as
//! `{parent}/{parent_id}/{child}`.

use uuid::Uuid;

pub const USERS: &str = "users";
pub const USER_CHATS: &str = "userChats";
pub const CHATS: &str = "chats";
pub const POSTS: &str = "posts";

pub fn messages(chat_id: &str) -> String {
    format!("{}/{}/messages", CHATS, chat_id)
}

pub fn comments(post_id: Uuid) -> String {
    format!("{}/{}/comments", POSTS, post_id)
}

/// Key of a friendship link document: `{owner}_{chat_id}`.
pub fn user_chat_key(owner: Uuid, chat_id: &str) -> String {
    format!("{}_{}", owner, chat_id)
}

pub fn is_messages(collection: &str) -> bool {
    child_of(collection, CHATS, "messages")
}

pub fn is_comments(collection: &str) -> bool {
    child_of(collection, POSTS, "comments")
}

fn child_of(collection: &str, parent: &str, child: &str) -> bool {
    collection
        .strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.strip_suffix(child))
        .is_some_and(|id| id.ends_with('/') && id.len() > 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_collections_are_recognised() {
        let post = Uuid::new_v4();
        assert!(is_comments(&comments(post)));
        assert!(!is_comments(POSTS));
        assert!(!is_comments("posts//comments"));
        assert!(is_messages(&messages("a_b")));
        assert!(!is_messages(&comments(post)));
    }
}
