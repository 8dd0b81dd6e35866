//! Per-room session: ties the timeline, scroll policy, and outbound screen
//! together into one state machine the UI can drive.
//!
//! The session is pure: server events go in through [`Session::handle_event`],
//! user actions come in through the command methods, and both return the
//! [`ClientEvent`]s the transport should send. Nothing here touches a
//! socket, which is what makes the reconciliation rules testable without a
//! server.

use std::collections::BTreeMap;

use campuschat_proto::{
    ClientEvent, Identity, MessageBody, ReplyPreview, ServerEvent, DEFAULT_PAGE_SIZE,
};
use chrono::Utc;
use tracing::debug;

use crate::policy::{BlockedTerm, Blocklist};
use crate::timeline::Timeline;
use crate::view::{ScrollAction, ViewState};

/// Where the session is in its lifecycle. Anything other than `Live` is
/// rendered as a connection-status banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Join requested, first history page not yet received.
    Joining,
    /// History loaded; the timeline is authoritative.
    Live,
}

/// What a server event did to the session: commands to send back, plus how
/// the viewport should react.
#[derive(Debug)]
pub struct Update {
    pub commands: Vec<ClientEvent>,
    pub scroll: ScrollAction,
}

impl Update {
    fn quiet() -> Self {
        Self {
            commands: Vec::new(),
            scroll: ScrollAction::Stay,
        }
    }
}

pub struct Session {
    identity: Identity,
    group_id: String,
    state: SessionState,
    timeline: Timeline,
    view: ViewState,
    blocklist: Blocklist,
    typing: BTreeMap<String, String>,
    visible: bool,
    pages_loaded: u32,
    total_messages: usize,
    last_error: Option<String>,
}

impl Session {
    /// Open a session for `group_id`. The returned commands perform the
    /// join and request the first history page.
    pub fn open(
        identity: Identity,
        group_id: impl Into<String>,
        blocklist: Blocklist,
    ) -> (Self, Vec<ClientEvent>) {
        let group_id = group_id.into();
        let session = Self {
            timeline: Timeline::new(identity.user_id.clone(), group_id.clone()),
            identity,
            group_id: group_id.clone(),
            state: SessionState::Joining,
            view: ViewState::new(),
            blocklist,
            typing: BTreeMap::new(),
            visible: true,
            pages_loaded: 0,
            total_messages: 0,
            last_error: None,
        };
        let commands = vec![
            ClientEvent::JoinGroup {
                group_id: group_id.clone(),
            },
            ClientEvent::FetchHistory {
                group_id,
                page: 1,
                page_size: DEFAULT_PAGE_SIZE,
            },
        ];
        (session, commands)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Users currently typing, as (user id, display name) pairs.
    pub fn typing_users(&self) -> impl Iterator<Item = (&str, &str)> {
        self.typing.iter().map(|(id, name)| (id.as_str(), name.as_str()))
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Fold one server event into the session.
    pub fn handle_event(&mut self, event: ServerEvent) -> Update {
        match event {
            ServerEvent::History {
                group_id,
                messages,
                info,
            } => {
                if group_id != self.group_id {
                    return Update::quiet();
                }
                debug!(page = info.page, count = messages.len(), "history page");
                self.timeline.apply_history(info.page, messages);
                self.total_messages = info.total;
                self.pages_loaded = self.pages_loaded.max(info.page);
                let scroll = if info.page <= 1 {
                    self.state = SessionState::Live;
                    self.view.on_history_loaded()
                } else {
                    ScrollAction::Stay
                };
                Update {
                    commands: self.read_marking(),
                    scroll,
                }
            }
            ServerEvent::NewMessage {
                message,
                client_tag,
            } => {
                if message.group_id != self.group_id {
                    return Update::quiet();
                }
                self.typing.remove(&message.sender_id);
                let own = message.sender_id == self.identity.user_id;
                self.timeline
                    .apply_new_message(message, client_tag.as_deref());
                Update {
                    commands: self.read_marking(),
                    scroll: self.view.on_message_arrived(own),
                }
            }
            ServerEvent::UserTyping {
                user_id,
                user_name,
                is_typing,
            } => {
                if is_typing {
                    self.typing.insert(user_id, user_name);
                } else {
                    self.typing.remove(&user_id);
                }
                Update::quiet()
            }
            ServerEvent::UserLeft { user_id, .. } => {
                self.typing.remove(&user_id);
                Update::quiet()
            }
            ServerEvent::MessagesRead {
                user_id,
                message_ids,
                ..
            } => {
                self.timeline.apply_read(&user_id, &message_ids, Utc::now());
                Update::quiet()
            }
            ServerEvent::MessageDeleted { message_id, group_id } => {
                if group_id == self.group_id {
                    self.timeline.apply_deleted(&message_id);
                }
                Update::quiet()
            }
            ServerEvent::MessageEdited { message } => {
                if message.group_id == self.group_id {
                    self.timeline.apply_edited(message);
                }
                Update::quiet()
            }
            ServerEvent::Error { message } => {
                self.last_error = Some(message);
                Update::quiet()
            }
            ServerEvent::Connected { .. } | ServerEvent::UserJoined { .. } => Update::quiet(),
        }
    }

    /// Screen and send a text message. On success the timeline gains a
    /// provisional entry and the returned command carries its correlation
    /// tag. A screened-out message produces no command at all.
    pub fn send_text(
        &mut self,
        text: &str,
        reply_to: Option<ReplyPreview>,
    ) -> Result<ClientEvent, BlockedTerm> {
        self.blocklist.screen(text)?;
        let reply_id = reply_to.as_ref().map(|r| r.message_id.clone());
        let tag = self.timeline.push_optimistic(
            &self.identity.display_name,
            MessageBody::Text {
                message: text.to_string(),
            },
            reply_to,
        );
        Ok(ClientEvent::SendMessage {
            group_id: self.group_id.clone(),
            message: text.to_string(),
            reply_to: reply_id,
            client_tag: Some(tag),
        })
    }

    /// The chat screen became visible or hidden. Becoming visible marks
    /// whatever is unread.
    pub fn set_visible(&mut self, visible: bool) -> Vec<ClientEvent> {
        self.visible = visible;
        if visible {
            self.read_marking()
        } else {
            Vec::new()
        }
    }

    /// The rendering layer reports the viewport position.
    pub fn set_near_bottom(&mut self, near_bottom: bool) {
        self.view.set_near_bottom(near_bottom);
    }

    /// Periodic housekeeping, driven by the embedder's UI tick. Provisional
    /// sends that never received their echo are dropped from the timeline
    /// and surfaced as an inline failure. Returns how many were dropped.
    pub fn on_tick(&mut self, now: chrono::DateTime<Utc>) -> usize {
        let expired = self.timeline.expire_pending(now);
        if !expired.is_empty() {
            self.last_error = Some(if expired.len() == 1 {
                "message could not be delivered".to_string()
            } else {
                format!("{} messages could not be delivered", expired.len())
            });
        }
        expired.len()
    }

    /// Request the next page of older history, if any remains.
    pub fn load_older(&mut self) -> Option<ClientEvent> {
        let loaded = (self.pages_loaded as usize) * (DEFAULT_PAGE_SIZE as usize);
        if self.pages_loaded == 0 || loaded >= self.total_messages {
            return None;
        }
        Some(ClientEvent::FetchHistory {
            group_id: self.group_id.clone(),
            page: self.pages_loaded + 1,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Compute the read-marking command for the current visible set. The
    /// marked ids are also applied locally so the same ids are not
    /// requested again on the next change.
    fn read_marking(&mut self) -> Vec<ClientEvent> {
        if !self.visible {
            return Vec::new();
        }
        let unread = self.timeline.unread_ids();
        if unread.is_empty() {
            return Vec::new();
        }
        self.timeline
            .apply_read(&self.identity.user_id, &unread, Utc::now());
        vec![ClientEvent::MarkRead {
            group_id: self.group_id.clone(),
            message_ids: unread,
        }]
    }
}
