use serde::{Deserialize, Serialize};

use crate::model::{ChatMessage, HistoryInfo};

/// Default number of messages per history page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// Kind of media carried by a `send-media` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    File,
}

/// Events sent by the client. Every event except `connect` and `join-group`
/// requires a prior successful join for the group it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "connect")]
    Connect {
        #[serde(default)]
        token: Option<String>,
    },
    #[serde(rename = "join-group")]
    JoinGroup { group_id: String },
    #[serde(rename = "leave-group")]
    LeaveGroup { group_id: String },
    #[serde(rename = "send-message")]
    SendMessage {
        group_id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        /// Client-generated correlation id, echoed verbatim in the
        /// resulting `new-message` broadcast.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_tag: Option<String>,
    },
    #[serde(rename = "send-media")]
    SendMedia {
        group_id: String,
        media_type: MediaKind,
        media_name: String,
        /// Data-URI payload for inline media; a server-side path otherwise.
        media_data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_size: Option<u64>,
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_tag: Option<String>,
    },
    #[serde(rename = "typing")]
    Typing { group_id: String, is_typing: bool },
    #[serde(rename = "mark-read")]
    MarkRead {
        group_id: String,
        message_ids: Vec<String>,
    },
    #[serde(rename = "delete-message")]
    DeleteMessage {
        group_id: String,
        message_id: String,
    },
    #[serde(rename = "edit-message")]
    EditMessage {
        group_id: String,
        message_id: String,
        message: String,
    },
    #[serde(rename = "fetch-history")]
    FetchHistory {
        group_id: String,
        #[serde(default = "default_page")]
        page: u32,
        #[serde(default = "default_page_size")]
        page_size: u32,
    },
}

/// Events sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Authentication succeeded; carries the resolved identity.
    #[serde(rename = "connected")]
    Connected { user_id: String, user_name: String },
    /// Broadcast to every room member, the sender included (the sender's
    /// optimistic record is reconciled against this echo).
    #[serde(rename = "new-message")]
    NewMessage {
        message: ChatMessage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_tag: Option<String>,
    },
    #[serde(rename = "user-joined")]
    UserJoined { user_id: String, user_name: String },
    #[serde(rename = "user-left")]
    UserLeft { user_id: String, user_name: String },
    #[serde(rename = "user-typing")]
    UserTyping {
        user_id: String,
        user_name: String,
        is_typing: bool,
    },
    #[serde(rename = "messages-read")]
    MessagesRead {
        user_id: String,
        user_name: String,
        message_ids: Vec<String>,
    },
    #[serde(rename = "message-deleted")]
    MessageDeleted {
        message_id: String,
        group_id: String,
    },
    #[serde(rename = "message-edited")]
    MessageEdited { message: ChatMessage },
    /// Private reply to a `fetch-history` request; messages are ordered
    /// oldest to newest within the page.
    #[serde(rename = "history")]
    History {
        group_id: String,
        messages: Vec<ChatMessage>,
        #[serde(flatten)]
        info: HistoryInfo,
    },
    /// Private to the requester only.
    #[serde(rename = "error")]
    Error { message: String },
}
