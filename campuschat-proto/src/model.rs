use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user identity resolved at connection time. Immutable for the lifetime
/// of a connection; the display name is a snapshot, not a live join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

/// Reference to a media payload carried by an image or file message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum MediaRef {
    /// Self-contained encoded blob (data-URI style payload).
    Inline(String),
    /// Path to a file held by the server.
    Stored(String),
}

impl MediaRef {
    pub fn stored_path(&self) -> Option<&str> {
        match self {
            MediaRef::Stored(path) => Some(path),
            MediaRef::Inline(_) => None,
        }
    }
}

/// Message payload. Exactly one kind per message; the payload shape is
/// enforced per variant at construction time rather than validated ad hoc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "lowercase")]
pub enum MessageBody {
    Text {
        message: String,
    },
    Image {
        #[serde(default)]
        message: String,
        media: MediaRef,
        media_name: String,
    },
    File {
        #[serde(default)]
        message: String,
        media: MediaRef,
        media_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_size: Option<u64>,
    },
}

impl MessageBody {
    /// The text content: the message itself for text, the caption for media.
    pub fn text(&self) -> &str {
        match self {
            MessageBody::Text { message }
            | MessageBody::Image { message, .. }
            | MessageBody::File { message, .. } => message,
        }
    }

    pub fn media(&self) -> Option<&MediaRef> {
        match self {
            MessageBody::Text { .. } => None,
            MessageBody::Image { media, .. } | MessageBody::File { media, .. } => Some(media),
        }
    }
}

/// One entry in a message's read set. A user appears at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

/// Denormalized snapshot of a replied-to message, captured at append time
/// so the client can render the quote without a second lookup. A reply id
/// that no longer resolves leaves the preview fields empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub message_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A chat message as stored and as broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub sender_name: String,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }
}

/// Pagination metadata returned alongside a history page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryInfo {
    pub page: u32,
    pub page_size: u32,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message() -> ChatMessage {
        ChatMessage {
            id: "m1".to_string(),
            group_id: "g1".to_string(),
            sender_id: "u1".to_string(),
            sender_name: "Alice Doe".to_string(),
            body: MessageBody::Text {
                message: "hello".to_string(),
            },
            reply_to: None,
            is_edited: false,
            edited_at: None,
            read_by: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_text_message_serializes_flat() {
        let json = serde_json::to_string(&text_message()).unwrap();
        assert!(json.contains("\"message_type\":\"text\""));
        assert!(json.contains("\"message\":\"hello\""));
        // skipped optionals should not appear
        assert!(!json.contains("reply_to"));
        assert!(!json.contains("edited_at"));

        let parsed: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.body.text(), "hello");
        assert!(parsed.body.media().is_none());
    }

    #[test]
    fn test_image_message_round_trip() {
        let mut msg = text_message();
        msg.body = MessageBody::Image {
            message: String::new(),
            media: MediaRef::Inline("data:image/png;base64,AAAA".to_string()),
            media_name: "photo.png".to_string(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"message_type\":\"image\""));
        assert!(json.contains("\"kind\":\"inline\""));

        let parsed: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.body.media(), msg.body.media());
    }

    #[test]
    fn test_stored_file_exposes_path() {
        let media = MediaRef::Stored("uploads/chat/doc.pdf".to_string());
        assert_eq!(media.stored_path(), Some("uploads/chat/doc.pdf"));
        assert_eq!(
            MediaRef::Inline("data:...".to_string()).stored_path(),
            None
        );
    }

    #[test]
    fn test_read_by_membership() {
        let mut msg = text_message();
        assert!(!msg.is_read_by("u2"));
        msg.read_by.push(ReadReceipt {
            user_id: "u2".to_string(),
            read_at: Utc::now(),
        });
        assert!(msg.is_read_by("u2"));
    }

    #[test]
    fn test_dangling_reply_preview_deserializes() {
        // A preview with only the id is what the store produces when the
        // replied-to message has been deleted.
        let json = r#"{"message_id":"gone"}"#;
        let preview: ReplyPreview = serde_json::from_str(json).unwrap();
        assert_eq!(preview.message_id, "gone");
        assert!(preview.message.is_empty());
        assert!(preview.created_at.is_none());
    }
}
