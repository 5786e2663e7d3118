use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::PostView;
use crate::models::{Message, UserChat};

/// One row of the chat list: a friendship link plus its latest activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub link: UserChat,
    pub last_message: Option<Message>,
    pub unread: usize,
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// Full, ordered message list of an open conversation
    ConversationSnapshot {
        chat_id: String,
        messages: Vec<Message>,
    },

    /// The viewer's conversations, most recent activity first
    ChatListSnapshot { chats: Vec<ChatSummary> },

    /// The viewer's feed, newest post first
    FeedSnapshot { posts: Vec<PostView> },

    /// A live query stopped for good; the client has to reopen it
    ListenFailed { subscription: String, reason: String },

    /// A command could not be carried out
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    OpenConversation { chat_id: String },
    CloseConversation { chat_id: String },

    OpenChatList,
    CloseChatList,

    OpenFeed { limit: Option<usize> },
    CloseFeed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_tagged_layout() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"OpenConversation","data":{"chat_id":"a_b"}}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::OpenConversation { chat_id } if chat_id == "a_b"));

        let cmd: GatewayCommand = serde_json::from_str(r#"{"type":"CloseFeed"}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::CloseFeed));
    }
}
