//! Message store: a durable, time-ordered, append-only log of chat messages
//! per group.
//!
//! Each operation against one group's log runs under that group's map entry,
//! so a single message's read-set update or deletion never interleaves with
//! another caller's update to the same message. Different groups are mutated
//! without coordination.

use campuschat_proto::{
    ChatMessage, HistoryInfo, Identity, MessageBody, ReadReceipt, ReplyPreview, DEFAULT_PAGE_SIZE,
};
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    /// Message missing or not owned by the caller; the two are
    /// indistinguishable on purpose.
    #[error("message not found")]
    NotFound,
    /// Backing store unreachable. The in-memory log never raises this, but
    /// the surface keeps the variant so callers treat it as retryable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Input to [`MessageStore::append`]; the store assigns identity and
/// timestamps and resolves the reply preview.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub group_id: String,
    pub sender: Identity,
    pub body: MessageBody,
    pub reply_to: Option<String>,
}

#[derive(Default)]
pub struct MessageStore {
    logs: DashMap<String, Vec<ChatMessage>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message, returning the canonical stored form with the
    /// server-assigned id and timestamps.
    ///
    /// Ids are UUIDv7, so identity order within a group is creation order.
    pub fn append(&self, new: NewMessage) -> Result<ChatMessage, StoreError> {
        validate_body(&new.body)?;

        let now = Utc::now();
        let mut log = self.logs.entry(new.group_id.clone()).or_default();

        // Denormalized snapshot; a reply id that does not resolve (deleted
        // or foreign) yields an empty preview rather than an error.
        let reply_to = new.reply_to.map(|id| {
            log.iter()
                .rev()
                .find(|m| m.id == id)
                .map(|m| ReplyPreview {
                    message_id: m.id.clone(),
                    message: m.body.text().to_string(),
                    sender_name: m.sender_name.clone(),
                    created_at: Some(m.created_at),
                })
                .unwrap_or(ReplyPreview {
                    message_id: id,
                    message: String::new(),
                    sender_name: String::new(),
                    created_at: None,
                })
        });

        let message = ChatMessage {
            id: Uuid::now_v7().to_string(),
            group_id: new.group_id,
            sender_id: new.sender.user_id,
            sender_name: new.sender.display_name,
            body: new.body,
            reply_to,
            is_edited: false,
            edited_at: None,
            read_by: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        log.push(message.clone());
        Ok(message)
    }

    /// One page of a group's history, oldest to newest within the page.
    ///
    /// Pages are taken newest-first internally (page 1 is the newest slice
    /// of the log) and reversed before return, so the caller always sees
    /// chronological order.
    pub fn list_by_group(
        &self,
        group_id: &str,
        page: u32,
        page_size: u32,
    ) -> (Vec<ChatMessage>, HistoryInfo) {
        let page = page.max(1);
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };

        let log = self.logs.get(group_id);
        let total = log.as_ref().map(|l| l.len()).unwrap_or(0);
        let info = HistoryInfo {
            page,
            page_size,
            total,
        };

        let skip = (page as usize - 1) * page_size as usize;
        if skip >= total {
            return (Vec::new(), info);
        }
        let end = total - skip;
        let start = end.saturating_sub(page_size as usize);
        // The log is already chronological, so the slice needs no reversal.
        let messages = log
            .map(|l| l[start..end].to_vec())
            .unwrap_or_default();
        (messages, info)
    }

    /// Idempotently appends `(user_id, now)` to the read set of every listed
    /// message in the group that the user has not read yet. Ids not in the
    /// group are silently skipped. Returns the ids actually newly marked.
    pub fn mark_read(&self, group_id: &str, message_ids: &[String], user_id: &str) -> Vec<String> {
        let mut newly_read = Vec::new();
        let Some(mut log) = self.logs.get_mut(group_id) else {
            return newly_read;
        };
        let now = Utc::now();
        for message in log.iter_mut() {
            if message_ids.contains(&message.id) && !message.is_read_by(user_id) {
                message.read_by.push(ReadReceipt {
                    user_id: user_id.to_string(),
                    read_at: now,
                });
                newly_read.push(message.id.clone());
            }
        }
        newly_read
    }

    /// Deletes a message if and only if `user_id` is its sender and removes
    /// any stored media blob it owned. Replies pointing at the deleted
    /// message keep their denormalized preview (dangling references are
    /// tolerated on read).
    pub fn delete_owned(
        &self,
        group_id: &str,
        message_id: &str,
        user_id: &str,
    ) -> Result<ChatMessage, StoreError> {
        let message = {
            let mut log = self.logs.get_mut(group_id).ok_or(StoreError::NotFound)?;
            let pos = log
                .iter()
                .position(|m| m.id == message_id && m.sender_id == user_id)
                .ok_or(StoreError::NotFound)?;
            log.remove(pos)
        };

        if let Some(path) = message.body.media().and_then(|m| m.stored_path()) {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path, "removed media blob for deleted message"),
                Err(e) => warn!(path, error = %e, "failed to remove media blob"),
            }
        }
        Ok(message)
    }

    /// Edits the text of a message, owner-only with the same not-found
    /// semantics as deletion. For media messages this edits the caption.
    pub fn edit_owned(
        &self,
        group_id: &str,
        message_id: &str,
        user_id: &str,
        new_text: &str,
    ) -> Result<ChatMessage, StoreError> {
        let mut log = self.logs.get_mut(group_id).ok_or(StoreError::NotFound)?;
        let message = log
            .iter_mut()
            .find(|m| m.id == message_id && m.sender_id == user_id)
            .ok_or(StoreError::NotFound)?;

        if matches!(message.body, MessageBody::Text { .. }) && new_text.trim().is_empty() {
            return Err(StoreError::Validation(
                "text message cannot be empty".to_string(),
            ));
        }

        match &mut message.body {
            MessageBody::Text { message }
            | MessageBody::Image { message, .. }
            | MessageBody::File { message, .. } => *message = new_text.to_string(),
        }
        let now = Utc::now();
        message.is_edited = true;
        message.edited_at = Some(now);
        message.updated_at = now;
        Ok(message.clone())
    }
}

fn validate_body(body: &MessageBody) -> Result<(), StoreError> {
    match body {
        MessageBody::Text { message } => {
            if message.trim().is_empty() {
                return Err(StoreError::Validation(
                    "text message cannot be empty".to_string(),
                ));
            }
        }
        MessageBody::Image { media, .. } | MessageBody::File { media, .. } => {
            let empty = match media {
                campuschat_proto::MediaRef::Inline(data) => data.is_empty(),
                campuschat_proto::MediaRef::Stored(path) => path.is_empty(),
            };
            if empty {
                return Err(StoreError::Validation(
                    "media message requires a media payload".to_string(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use campuschat_proto::MediaRef;

    fn sender(id: &str, name: &str) -> Identity {
        Identity {
            user_id: id.to_string(),
            display_name: name.to_string(),
        }
    }

    fn text(store: &MessageStore, group: &str, user: &str, body: &str) -> ChatMessage {
        store
            .append(NewMessage {
                group_id: group.to_string(),
                sender: sender(user, "Someone"),
                body: MessageBody::Text {
                    message: body.to_string(),
                },
                reply_to: None,
            })
            .unwrap()
    }

    #[test]
    fn test_append_assigns_ordered_ids() {
        let store = MessageStore::new();
        let a = text(&store, "g1", "u1", "first");
        let b = text(&store, "g1", "u1", "second");

        assert_ne!(a.id, b.id);
        // UUIDv7 ids sort in creation order
        assert!(a.id < b.id);
        assert!(a.created_at <= b.created_at);
        assert!(a.read_by.is_empty());
        assert!(!a.is_edited);
    }

    #[test]
    fn test_append_rejects_empty_text() {
        let store = MessageStore::new();
        let err = store
            .append(NewMessage {
                group_id: "g1".to_string(),
                sender: sender("u1", "A"),
                body: MessageBody::Text {
                    message: "   ".to_string(),
                },
                reply_to: None,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.list_by_group("g1", 1, 50).1.total, 0);
    }

    #[test]
    fn test_append_rejects_missing_media() {
        let store = MessageStore::new();
        let err = store
            .append(NewMessage {
                group_id: "g1".to_string(),
                sender: sender("u1", "A"),
                body: MessageBody::Image {
                    message: String::new(),
                    media: MediaRef::Inline(String::new()),
                    media_name: "x.png".to_string(),
                },
                reply_to: None,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_reply_preview_resolved_and_dangling() {
        let store = MessageStore::new();
        let first = text(&store, "g1", "u1", "original");

        let reply = store
            .append(NewMessage {
                group_id: "g1".to_string(),
                sender: sender("u2", "Bob Ray"),
                body: MessageBody::Text {
                    message: "replying".to_string(),
                },
                reply_to: Some(first.id.clone()),
            })
            .unwrap();
        let preview = reply.reply_to.unwrap();
        assert_eq!(preview.message_id, first.id);
        assert_eq!(preview.message, "original");
        assert_eq!(preview.sender_name, "Someone");
        assert!(preview.created_at.is_some());

        // Reply to a message that is gone: dangling reference tolerated.
        store.delete_owned("g1", &first.id, "u1").unwrap();
        let dangling = store
            .append(NewMessage {
                group_id: "g1".to_string(),
                sender: sender("u2", "Bob Ray"),
                body: MessageBody::Text {
                    message: "late reply".to_string(),
                },
                reply_to: Some(first.id.clone()),
            })
            .unwrap();
        let preview = dangling.reply_to.unwrap();
        assert_eq!(preview.message_id, first.id);
        assert!(preview.message.is_empty());
        assert!(preview.created_at.is_none());
    }

    #[test]
    fn test_mark_read_idempotent() {
        let store = MessageStore::new();
        let a = text(&store, "g1", "u1", "hello");
        let ids = vec![a.id.clone()];

        let first = store.mark_read("g1", &ids, "u2");
        assert_eq!(first, ids);
        let second = store.mark_read("g1", &ids, "u2");
        assert!(second.is_empty());

        let (messages, _) = store.list_by_group("g1", 1, 50);
        assert_eq!(messages[0].read_by.len(), 1);
        assert_eq!(messages[0].read_by[0].user_id, "u2");
    }

    #[test]
    fn test_mark_read_skips_foreign_ids() {
        let store = MessageStore::new();
        let a = text(&store, "g1", "u1", "hello");
        text(&store, "g2", "u1", "elsewhere");

        // an id from another group and a bogus id are silently ignored
        let ids = vec![a.id.clone(), "not-a-message".to_string()];
        let newly = store.mark_read("g1", &ids, "u2");
        assert_eq!(newly, vec![a.id.clone()]);

        let (other, _) = store.list_by_group("g2", 1, 50);
        assert!(other[0].read_by.is_empty());
    }

    #[test]
    fn test_delete_requires_ownership() {
        let store = MessageStore::new();
        let a = text(&store, "g1", "u1", "mine");

        // non-owner and nonexistent are the same error
        assert_eq!(
            store.delete_owned("g1", &a.id, "u2").unwrap_err(),
            StoreError::NotFound
        );
        assert_eq!(
            store.delete_owned("g1", "ghost", "u2").unwrap_err(),
            StoreError::NotFound
        );

        let deleted = store.delete_owned("g1", &a.id, "u1").unwrap();
        assert_eq!(deleted.id, a.id);
        assert_eq!(store.list_by_group("g1", 1, 50).1.total, 0);
    }

    #[test]
    fn test_delete_removes_stored_media_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        std::fs::write(&path, b"blob").unwrap();

        let store = MessageStore::new();
        let msg = store
            .append(NewMessage {
                group_id: "g1".to_string(),
                sender: sender("u1", "A"),
                body: MessageBody::File {
                    message: String::new(),
                    media: MediaRef::Stored(path.to_string_lossy().into_owned()),
                    media_name: "upload.bin".to_string(),
                    media_size: Some(4),
                },
                reply_to: None,
            })
            .unwrap();

        store.delete_owned("g1", &msg.id, "u1").unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_pagination_round_trip() {
        let store = MessageStore::new();
        let appended: Vec<String> = (0..23)
            .map(|i| text(&store, "g1", "u1", &format!("msg {i}")).id)
            .collect();

        // page 1 is the newest slice; walking pages oldest-first and
        // concatenating reconstructs the append order exactly
        let (_, info) = store.list_by_group("g1", 1, 5);
        assert_eq!(info.total, 23);
        let pages = info.total.div_ceil(5) as u32;

        let mut collected = Vec::new();
        for page in (1..=pages).rev() {
            let (messages, _) = store.list_by_group("g1", page, 5);
            // within a page, oldest to newest
            for pair in messages.windows(2) {
                assert!(pair[0].created_at <= pair[1].created_at);
            }
            collected.extend(messages.into_iter().map(|m| m.id));
        }
        assert_eq!(collected, appended);

        // past the end: empty page, same metadata
        let (messages, info) = store.list_by_group("g1", pages + 1, 5);
        assert!(messages.is_empty());
        assert_eq!(info.total, 23);
    }

    #[test]
    fn test_pagination_unknown_group() {
        let store = MessageStore::new();
        let (messages, info) = store.list_by_group("nope", 1, 50);
        assert!(messages.is_empty());
        assert_eq!(info.total, 0);
    }

    #[test]
    fn test_edit_owned_sets_edit_state() {
        let store = MessageStore::new();
        let a = text(&store, "g1", "u1", "typo");

        assert_eq!(
            store.edit_owned("g1", &a.id, "u2", "hijack").unwrap_err(),
            StoreError::NotFound
        );

        let edited = store.edit_owned("g1", &a.id, "u1", "fixed").unwrap();
        assert_eq!(edited.body.text(), "fixed");
        assert!(edited.is_edited);
        assert!(edited.edited_at.is_some());

        let err = store.edit_owned("g1", &a.id, "u1", "  ").unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
