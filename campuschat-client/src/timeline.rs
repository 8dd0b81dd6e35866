//! Optimistic message timeline.
//!
//! Outgoing messages are shown immediately under a provisional id and later
//! reconciled against the server's echo of the same message, so the sender
//! never sees a duplicate. Reconciliation is pure state manipulation; the
//! transport feeds events in and the UI reads the entry list out.

use campuschat_proto::{ChatMessage, MessageBody, ReadReceipt, ReplyPreview};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// How far apart a provisional entry and a server echo may be and still be
/// considered the same message when no correlation tag is available.
const RECONCILE_WINDOW_SECS: i64 = 5;

/// One rendered row: a message plus whether it is still awaiting its echo.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub message: ChatMessage,
    /// Set while the entry is provisional. The `client_tag` inside a
    /// pending entry is the correlation id sent with the command.
    pub pending: bool,
    pub client_tag: Option<String>,
}

/// The message list for a single group, kept in chronological order.
pub struct Timeline {
    user_id: String,
    group_id: String,
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn new(user_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            group_id: group_id.into(),
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.pending).count()
    }

    /// Insert a provisional entry for a message about to be sent and return
    /// the correlation tag to attach to the outgoing command.
    ///
    /// The provisional id is never shown to the server; the echo's real id
    /// replaces it on reconciliation.
    pub fn push_optimistic(
        &mut self,
        sender_name: &str,
        body: MessageBody,
        reply_to: Option<ReplyPreview>,
    ) -> String {
        let tag = Uuid::new_v4().to_string();
        let now = Utc::now();
        let message = ChatMessage {
            id: format!("temp-{tag}"),
            group_id: self.group_id.clone(),
            sender_id: self.user_id.clone(),
            sender_name: sender_name.to_string(),
            body,
            reply_to,
            is_edited: false,
            edited_at: None,
            read_by: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.entries.push(TimelineEntry {
            message,
            pending: true,
            client_tag: Some(tag.clone()),
        });
        tag
    }

    /// Fold a broadcast `new-message` into the timeline.
    ///
    /// Returns `true` if the message replaced a provisional entry. An echo
    /// matches its provisional entry by correlation tag first; failing that,
    /// by sender, body text, and proximity in time. Messages whose id is
    /// already present are dropped so a redelivered broadcast cannot
    /// duplicate a row.
    pub fn apply_new_message(
        &mut self,
        message: ChatMessage,
        client_tag: Option<&str>,
    ) -> bool {
        if self.entries.iter().any(|e| e.message.id == message.id) {
            return false;
        }

        if let Some(index) = self.find_provisional(&message, client_tag) {
            self.entries[index] = TimelineEntry {
                message,
                pending: false,
                client_tag: None,
            };
            return true;
        }

        self.entries.push(TimelineEntry {
            message,
            pending: false,
            client_tag: None,
        });
        false
    }

    fn find_provisional(&self, message: &ChatMessage, client_tag: Option<&str>) -> Option<usize> {
        if let Some(tag) = client_tag {
            if let Some(index) = self
                .entries
                .iter()
                .position(|e| e.pending && e.client_tag.as_deref() == Some(tag))
            {
                return Some(index);
            }
        }
        if message.sender_id != self.user_id {
            return None;
        }
        let window = Duration::seconds(RECONCILE_WINDOW_SECS);
        self.entries.iter().position(|e| {
            e.pending
                && e.message.body.text() == message.body.text()
                && (message.created_at - e.message.created_at).abs() <= window
        })
    }

    /// Merge a history page. Page 1 resets the confirmed portion of the
    /// timeline, keeping any still-provisional entries at the tail; later
    /// pages carry older messages and are prepended.
    pub fn apply_history(&mut self, page: u32, messages: Vec<ChatMessage>) {
        if page <= 1 {
            let pending: Vec<TimelineEntry> =
                self.entries.drain(..).filter(|e| e.pending).collect();
            self.entries = messages
                .into_iter()
                .map(|message| TimelineEntry {
                    message,
                    pending: false,
                    client_tag: None,
                })
                .collect();
            self.entries.extend(pending);
        } else {
            let older: Vec<TimelineEntry> = messages
                .into_iter()
                .filter(|m| !self.entries.iter().any(|e| e.message.id == m.id))
                .map(|message| TimelineEntry {
                    message,
                    pending: false,
                    client_tag: None,
                })
                .collect();
            self.entries.splice(0..0, older);
        }
    }

    pub fn apply_deleted(&mut self, message_id: &str) {
        self.entries.retain(|e| e.message.id != message_id);
    }

    pub fn apply_edited(&mut self, message: ChatMessage) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.message.id == message.id)
        {
            entry.message = message;
        }
    }

    /// Record that `reader` has read the given messages. Already-recorded
    /// readers are left untouched, so replayed receipts are harmless.
    pub fn apply_read(&mut self, reader: &str, message_ids: &[String], read_at: DateTime<Utc>) {
        for entry in &mut self.entries {
            if message_ids.iter().any(|id| id == &entry.message.id)
                && !entry.message.is_read_by(reader)
            {
                entry.message.read_by.push(ReadReceipt {
                    user_id: reader.to_string(),
                    read_at,
                });
            }
        }
    }

    /// Confirmed messages from other senders that the local user has not
    /// read yet. These are what a visible chat screen marks as read.
    pub fn unread_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| {
                !e.pending
                    && e.message.sender_id != self.user_id
                    && !e.message.is_read_by(&self.user_id)
            })
            .map(|e| e.message.id.clone())
            .collect()
    }

    /// Drop provisional entries older than the reconciliation window and
    /// return their tags. A tag coming back here means the send was never
    /// confirmed and the user should be told.
    pub fn expire_pending(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let window = Duration::seconds(RECONCILE_WINDOW_SECS);
        let mut expired = Vec::new();
        self.entries.retain(|e| {
            if e.pending && now - e.message.created_at > window {
                if let Some(tag) = &e.client_tag {
                    expired.push(tag.clone());
                }
                false
            } else {
                true
            }
        });
        expired
    }
}
