//! Documents are stored with camelCase field names and timestamps as integer
//! microseconds, so the document store can order them numerically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub ping_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    pub email: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

/// One side of a friendship. Each pair is stored twice, once per owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChat {
    pub owner_user_id: Uuid,
    pub friend_user_id: Uuid,
    pub chat_id: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub chat_id: String,
    pub participants: Vec<Uuid>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_microseconds_option"
    )]
    pub last_message_time: Option<DateTime<Utc>>,
}

/// Delivery state of a message. Only ever moves from `Sent` to `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Read => "read",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat_id: String,
    pub text: String,
    pub sender_id: Uuid,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
}

impl Message {
    /// True when `viewer` still has to see this message.
    pub fn is_unread_for(&self, viewer: Uuid) -> bool {
        self.sender_id != viewer && self.status != MessageStatus::Read
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub user_id: Uuid,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub text: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub likes: Vec<Like>,
    #[serde(default)]
    pub comment_count: u64,
}

impl Post {
    pub fn like_count(&self) -> usize {
        self.likes.len()
    }

    pub fn is_liked_by(&self, user_id: Uuid) -> bool {
        self.likes.iter().any(|l| l.user_id == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub text: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Derive the conversation id shared by two users.
///
/// Both ids are rendered as canonical UUID strings, sorted and joined with
/// `_`, so either participant computes the same value without a lookup.
pub fn chat_id_for(a: Uuid, b: Uuid) -> String {
    let (a, b) = (a.to_string(), b.to_string());
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

/// Split a chat id back into its two participants.
pub fn chat_participants(chat_id: &str) -> Option<(Uuid, Uuid)> {
    let (a, b) = chat_id.split_once('_')?;
    let a: Uuid = a.parse().ok()?;
    let b: Uuid = b.parse().ok()?;
    if a == b || chat_id_for(a, b) != chat_id {
        return None;
    }
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_is_order_independent() {
        for _ in 0..32 {
            let a = Uuid::new_v4();
            let b = Uuid::new_v4();
            assert_eq!(chat_id_for(a, b), chat_id_for(b, a));
        }
    }

    #[test]
    fn chat_participants_roundtrip() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (x, y) = chat_participants(&chat_id_for(a, b)).unwrap();
        let mut expected = [a, b];
        expected.sort_by_key(|u| u.to_string());
        assert_eq!([x, y], expected);
    }

    #[test]
    fn chat_participants_rejects_non_canonical() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (lo, hi) = if a.to_string() < b.to_string() { (a, b) } else { (b, a) };

        // reversed order is not a chat id anyone derives
        assert!(chat_participants(&format!("{}_{}", hi, lo)).is_none());
        assert!(chat_participants(&format!("{}_{}", a, a)).is_none());
        assert!(chat_participants("not-a-chat").is_none());
    }

    #[test]
    fn message_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(MessageStatus::Read).unwrap(), "read");
        let status: MessageStatus = serde_json::from_value("sent".into()).unwrap();
        assert_eq!(status, MessageStatus::Sent);
    }

    #[test]
    fn post_like_helpers() {
        let me = Uuid::new_v4();
        let post = Post {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            text: "hello".into(),
            timestamp: Utc::now(),
            likes: vec![Like { user_id: me, timestamp: Utc::now() }],
            comment_count: 0,
        };
        assert_eq!(post.like_count(), 1);
        assert!(post.is_liked_by(me));
        assert!(!post.is_liked_by(Uuid::new_v4()));
    }
}
