//! Chat gateway: validates each inbound event against the membership
//! authority, drives the message store, and asks the room hub to broadcast.
//!
//! Dispatch is transport-free: the integration tests and the unit tests
//! below drive it with raw channels, no sockets involved.

use std::sync::Arc;

use campuschat_proto::{
    ClientEvent, Identity, MediaKind, MediaRef, MessageBody, ServerEvent,
};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

use crate::auth::Authenticator;
use crate::error::GatewayError;
use crate::groups::MembershipAuthority;
use crate::rooms::{ConnId, RoomHub};
use crate::store::{MessageStore, NewMessage};

pub struct Gateway {
    authenticator: Arc<dyn Authenticator>,
    groups: Arc<dyn MembershipAuthority>,
    store: Arc<MessageStore>,
    hub: Arc<RoomHub>,
    /// Append and broadcast of `new-message` happen under the group's send
    /// lock, so every member observes messages in store order.
    send_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Gateway {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        groups: Arc<dyn MembershipAuthority>,
        store: Arc<MessageStore>,
        hub: Arc<RoomHub>,
    ) -> Self {
        Self {
            authenticator,
            groups,
            store,
            hub,
            send_locks: DashMap::new(),
        }
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authenticator
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// Handles one inbound event from an authenticated connection. Any
    /// failure becomes a private `error` event to the requester; the
    /// connection stays open and no side effect is performed.
    pub async fn handle_event(&self, conn_id: ConnId, user: &Identity, event: ClientEvent) {
        let result = match event {
            // already authenticated; a repeated connect frame is ignored
            ClientEvent::Connect { .. } => Ok(()),
            ClientEvent::JoinGroup { group_id } => self.join(conn_id, user, &group_id),
            ClientEvent::LeaveGroup { group_id } => {
                // no membership check for leaving
                self.hub.dismiss(conn_id, &group_id);
                Ok(())
            }
            ClientEvent::SendMessage {
                group_id,
                message,
                reply_to,
                client_tag,
            } => {
                self.send(
                    user,
                    group_id,
                    MessageBody::Text { message },
                    reply_to,
                    client_tag,
                )
                .await
            }
            ClientEvent::SendMedia {
                group_id,
                media_type,
                media_name,
                media_data,
                media_size,
                message,
                reply_to,
                client_tag,
            } => {
                let media = if media_data.starts_with("data:") {
                    MediaRef::Inline(media_data)
                } else {
                    MediaRef::Stored(media_data)
                };
                let body = match media_type {
                    MediaKind::Image => MessageBody::Image {
                        message,
                        media,
                        media_name,
                    },
                    MediaKind::File => MessageBody::File {
                        message,
                        media,
                        media_name,
                        media_size,
                    },
                };
                self.send(user, group_id, body, reply_to, client_tag).await
            }
            ClientEvent::Typing {
                group_id,
                is_typing,
            } => self.typing(conn_id, user, &group_id, is_typing),
            ClientEvent::MarkRead {
                group_id,
                message_ids,
            } => self.mark_read(conn_id, user, &group_id, message_ids),
            ClientEvent::DeleteMessage {
                group_id,
                message_id,
            } => self.delete(user, &group_id, &message_id),
            ClientEvent::EditMessage {
                group_id,
                message_id,
                message,
            } => self.edit(user, &group_id, &message_id, &message),
            ClientEvent::FetchHistory {
                group_id,
                page,
                page_size,
            } => self.history(conn_id, user, &group_id, page, page_size),
        };

        if let Err(err) = result {
            warn!(user = %user.user_id, error = %err, "event rejected");
            self.hub.send_to(conn_id, &err.to_event());
        }
    }

    /// Opt-in staleness guard: re-validates membership of the connection's
    /// current room, dismissing it when the user is no longer a member.
    /// Without this policy, admission and per-event checks stay independent
    /// and a removed member keeps receiving broadcasts until they leave.
    pub fn revalidate_room(&self, conn_id: ConnId, user: &Identity) {
        let Some(room) = self.hub.room_of(conn_id) else {
            return;
        };
        if !self.groups.is_member(&room, &user.user_id) {
            warn!(user = %user.user_id, group = %room, "membership lost, dismissing from room");
            self.hub.dismiss(conn_id, &room);
            self.hub
                .send_to(conn_id, &GatewayError::NotAMember.to_event());
        }
    }

    fn require_member(&self, group_id: &str, user: &Identity) -> Result<(), GatewayError> {
        if self.groups.is_member(group_id, &user.user_id) {
            Ok(())
        } else {
            Err(GatewayError::NotAMember)
        }
    }

    fn join(&self, conn_id: ConnId, user: &Identity, group_id: &str) -> Result<(), GatewayError> {
        self.require_member(group_id, user)?;
        self.hub.admit(conn_id, group_id);
        Ok(())
    }

    async fn send(
        &self,
        user: &Identity,
        group_id: String,
        body: MessageBody,
        reply_to: Option<String>,
        client_tag: Option<String>,
    ) -> Result<(), GatewayError> {
        self.require_member(&group_id, user)?;

        let lock = self
            .send_locks
            .entry(group_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _ordered = lock.lock().await;

        let stored = self.store.append(NewMessage {
            group_id: group_id.clone(),
            sender: user.clone(),
            body,
            reply_to,
        })?;
        // the sender is NOT excluded: its optimistic record reconciles
        // against this authoritative echo
        self.hub.broadcast(
            &group_id,
            &ServerEvent::NewMessage {
                message: stored,
                client_tag,
            },
            None,
        );
        Ok(())
    }

    fn typing(
        &self,
        conn_id: ConnId,
        user: &Identity,
        group_id: &str,
        is_typing: bool,
    ) -> Result<(), GatewayError> {
        self.require_member(group_id, user)?;
        self.hub.set_typing(conn_id, group_id, is_typing);
        Ok(())
    }

    fn mark_read(
        &self,
        conn_id: ConnId,
        user: &Identity,
        group_id: &str,
        message_ids: Vec<String>,
    ) -> Result<(), GatewayError> {
        self.require_member(group_id, user)?;
        self.store.mark_read(group_id, &message_ids, &user.user_id);
        // the requester already knows
        self.hub.broadcast(
            group_id,
            &ServerEvent::MessagesRead {
                user_id: user.user_id.clone(),
                user_name: user.display_name.clone(),
                message_ids,
            },
            Some(conn_id),
        );
        Ok(())
    }

    fn delete(
        &self,
        user: &Identity,
        group_id: &str,
        message_id: &str,
    ) -> Result<(), GatewayError> {
        self.require_member(group_id, user)?;
        self.store
            .delete_owned(group_id, message_id, &user.user_id)?;
        // everyone, the requester included, for idempotent UI confirmation
        self.hub.broadcast(
            group_id,
            &ServerEvent::MessageDeleted {
                message_id: message_id.to_string(),
                group_id: group_id.to_string(),
            },
            None,
        );
        Ok(())
    }

    fn edit(
        &self,
        user: &Identity,
        group_id: &str,
        message_id: &str,
        new_text: &str,
    ) -> Result<(), GatewayError> {
        self.require_member(group_id, user)?;
        let edited = self
            .store
            .edit_owned(group_id, message_id, &user.user_id, new_text)?;
        self.hub.broadcast(
            group_id,
            &ServerEvent::MessageEdited { message: edited },
            None,
        );
        Ok(())
    }

    fn history(
        &self,
        conn_id: ConnId,
        user: &Identity,
        group_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(), GatewayError> {
        self.require_member(group_id, user)?;
        let (messages, info) = self.store.list_by_group(group_id, page, page_size);
        self.hub.send_to(
            conn_id,
            &ServerEvent::History {
                group_id: group_id.to_string(),
                messages,
                info,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenDirectory;
    use crate::groups::GroupDirectory;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Fixture {
        gateway: Gateway,
        groups: Arc<GroupDirectory>,
    }

    fn fixture() -> Fixture {
        let tokens = Arc::new(TokenDirectory::new());
        let groups = Arc::new(GroupDirectory::new());
        groups.create("g1", None);
        groups.add_member("g1", "u1").unwrap();
        groups.add_member("g1", "u2").unwrap();

        let gateway = Gateway::new(
            tokens,
            groups.clone() as Arc<dyn MembershipAuthority>,
            Arc::new(MessageStore::new()),
            Arc::new(RoomHub::new()),
        );
        Fixture { gateway, groups }
    }

    fn identity(id: &str, name: &str) -> Identity {
        Identity {
            user_id: id.to_string(),
            display_name: name.to_string(),
        }
    }

    fn attach(gateway: &Gateway, id: &str, name: &str) -> (ConnId, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = gateway.hub().register(identity(id, name), tx);
        (conn, rx)
    }

    fn recv(rx: &mut UnboundedReceiver<String>) -> ServerEvent {
        serde_json::from_str(&rx.try_recv().expect("expected an event")).unwrap()
    }

    async fn join(gateway: &Gateway, conn: ConnId, user: &Identity, group: &str) {
        gateway
            .handle_event(
                conn,
                user,
                ClientEvent::JoinGroup {
                    group_id: group.to_string(),
                },
            )
            .await;
    }

    #[tokio::test]
    async fn test_join_requires_membership() {
        let f = fixture();
        let outsider = identity("u9", "Mallory");
        let (conn, mut rx) = attach(&f.gateway, "u9", "Mallory");

        join(&f.gateway, conn, &outsider, "g1").await;

        match recv(&mut rx) {
            ServerEvent::Error { message } => assert!(message.contains("not a member")),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(f.gateway.hub().room_size("g1"), 0);
    }

    #[tokio::test]
    async fn test_send_broadcasts_to_all_members_with_tag_echo() {
        let f = fixture();
        let alice = identity("u1", "Alice");
        let bob = identity("u2", "Bob");
        let (conn_a, mut rx_a) = attach(&f.gateway, "u1", "Alice");
        let (conn_b, mut rx_b) = attach(&f.gateway, "u2", "Bob");
        join(&f.gateway, conn_a, &alice, "g1").await;
        join(&f.gateway, conn_b, &bob, "g1").await;
        let _ = rx_a.try_recv(); // Bob's user-joined

        f.gateway
            .handle_event(
                conn_a,
                &alice,
                ClientEvent::SendMessage {
                    group_id: "g1".to_string(),
                    message: "hello".to_string(),
                    reply_to: None,
                    client_tag: Some("tag-1".to_string()),
                },
            )
            .await;

        // sender receives the echo too, tag intact
        for rx in [&mut rx_a, &mut rx_b] {
            match recv(rx) {
                ServerEvent::NewMessage {
                    message,
                    client_tag,
                } => {
                    assert_eq!(message.sender_id, "u1");
                    assert_eq!(message.body.text(), "hello");
                    assert_eq!(client_tag.as_deref(), Some("tag-1"));
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_send_media_builds_inline_and_stored_bodies() {
        let f = fixture();
        let alice = identity("u1", "Alice");
        let bob = identity("u2", "Bob");
        let (conn_a, mut rx_a) = attach(&f.gateway, "u1", "Alice");
        let (conn_b, mut rx_b) = attach(&f.gateway, "u2", "Bob");
        join(&f.gateway, conn_a, &alice, "g1").await;
        join(&f.gateway, conn_b, &bob, "g1").await;
        let _ = rx_a.try_recv();

        // data-URI payload becomes an inline image
        f.gateway
            .handle_event(
                conn_a,
                &alice,
                ClientEvent::SendMedia {
                    group_id: "g1".to_string(),
                    media_type: MediaKind::Image,
                    media_name: "photo.png".to_string(),
                    media_data: "data:image/png;base64,AAAA".to_string(),
                    media_size: None,
                    message: "campus fair".to_string(),
                    reply_to: None,
                    client_tag: None,
                },
            )
            .await;
        match recv(&mut rx_b) {
            ServerEvent::NewMessage { message, .. } => match message.body {
                MessageBody::Image {
                    message,
                    media: MediaRef::Inline(data),
                    media_name,
                } => {
                    assert_eq!(message, "campus fair");
                    assert_eq!(media_name, "photo.png");
                    assert!(data.starts_with("data:image/png"));
                }
                other => panic!("unexpected body: {other:?}"),
            },
            other => panic!("unexpected event: {other:?}"),
        }
        let _ = rx_a.try_recv();

        // a server-side path becomes a stored file
        f.gateway
            .handle_event(
                conn_a,
                &alice,
                ClientEvent::SendMedia {
                    group_id: "g1".to_string(),
                    media_type: MediaKind::File,
                    media_name: "syllabus.pdf".to_string(),
                    media_data: "uploads/chat/syllabus.pdf".to_string(),
                    media_size: Some(2048),
                    message: String::new(),
                    reply_to: None,
                    client_tag: None,
                },
            )
            .await;
        match recv(&mut rx_b) {
            ServerEvent::NewMessage { message, .. } => match message.body {
                MessageBody::File {
                    media,
                    media_name,
                    media_size,
                    ..
                } => {
                    assert_eq!(media.stored_path(), Some("uploads/chat/syllabus.pdf"));
                    assert_eq!(media_name, "syllabus.pdf");
                    assert_eq!(media_size, Some(2048));
                }
                other => panic!("unexpected body: {other:?}"),
            },
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(f.gateway.store().list_by_group("g1", 1, 50).1.total, 2);
    }

    #[tokio::test]
    async fn test_non_member_send_is_private_error_without_broadcast() {
        let f = fixture();
        let alice = identity("u1", "Alice");
        let mallory = identity("u9", "Mallory");
        let (conn_a, mut rx_a) = attach(&f.gateway, "u1", "Alice");
        let (conn_m, mut rx_m) = attach(&f.gateway, "u9", "Mallory");
        join(&f.gateway, conn_a, &alice, "g1").await;

        f.gateway
            .handle_event(
                conn_m,
                &mallory,
                ClientEvent::SendMessage {
                    group_id: "g1".to_string(),
                    message: "let me in".to_string(),
                    reply_to: None,
                    client_tag: None,
                },
            )
            .await;

        assert!(matches!(recv(&mut rx_m), ServerEvent::Error { .. }));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(f.gateway.store().list_by_group("g1", 1, 50).1.total, 0);
    }

    #[tokio::test]
    async fn test_empty_send_is_validation_error() {
        let f = fixture();
        let alice = identity("u1", "Alice");
        let (conn_a, mut rx_a) = attach(&f.gateway, "u1", "Alice");
        join(&f.gateway, conn_a, &alice, "g1").await;

        f.gateway
            .handle_event(
                conn_a,
                &alice,
                ClientEvent::SendMessage {
                    group_id: "g1".to_string(),
                    message: "  ".to_string(),
                    reply_to: None,
                    client_tag: None,
                },
            )
            .await;

        match recv(&mut rx_a) {
            ServerEvent::Error { message } => assert!(message.contains("invalid message")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mark_read_notifies_others_not_requester() {
        let f = fixture();
        let alice = identity("u1", "Alice");
        let bob = identity("u2", "Bob");
        let (conn_a, mut rx_a) = attach(&f.gateway, "u1", "Alice");
        let (conn_b, mut rx_b) = attach(&f.gateway, "u2", "Bob");
        join(&f.gateway, conn_a, &alice, "g1").await;
        join(&f.gateway, conn_b, &bob, "g1").await;
        let _ = rx_a.try_recv();

        f.gateway
            .handle_event(
                conn_a,
                &alice,
                ClientEvent::SendMessage {
                    group_id: "g1".to_string(),
                    message: "hello".to_string(),
                    reply_to: None,
                    client_tag: None,
                },
            )
            .await;
        let msg_id = match recv(&mut rx_b) {
            ServerEvent::NewMessage { message, .. } => message.id,
            other => panic!("unexpected event: {other:?}"),
        };
        let _ = rx_a.try_recv(); // Alice's own echo

        f.gateway
            .handle_event(
                conn_b,
                &bob,
                ClientEvent::MarkRead {
                    group_id: "g1".to_string(),
                    message_ids: vec![msg_id.clone()],
                },
            )
            .await;

        match recv(&mut rx_a) {
            ServerEvent::MessagesRead {
                user_id,
                message_ids,
                ..
            } => {
                assert_eq!(user_id, "u2");
                assert_eq!(message_ids, vec![msg_id.clone()]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx_b.try_recv().is_err());

        // idempotent: a second call adds no read entry
        f.gateway
            .handle_event(
                conn_b,
                &bob,
                ClientEvent::MarkRead {
                    group_id: "g1".to_string(),
                    message_ids: vec![msg_id],
                },
            )
            .await;
        let (messages, _) = f.gateway.store().list_by_group("g1", 1, 50);
        assert_eq!(messages[0].read_by.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_owned_notifies_everyone_foreign_delete_fails() {
        let f = fixture();
        let alice = identity("u1", "Alice");
        let bob = identity("u2", "Bob");
        let (conn_a, mut rx_a) = attach(&f.gateway, "u1", "Alice");
        let (conn_b, mut rx_b) = attach(&f.gateway, "u2", "Bob");
        join(&f.gateway, conn_a, &alice, "g1").await;
        join(&f.gateway, conn_b, &bob, "g1").await;
        let _ = rx_a.try_recv();

        f.gateway
            .handle_event(
                conn_a,
                &alice,
                ClientEvent::SendMessage {
                    group_id: "g1".to_string(),
                    message: "oops".to_string(),
                    reply_to: None,
                    client_tag: None,
                },
            )
            .await;
        let msg_id = match recv(&mut rx_a) {
            ServerEvent::NewMessage { message, .. } => message.id,
            other => panic!("unexpected event: {other:?}"),
        };
        let _ = rx_b.try_recv();

        // Bob cannot delete Alice's message
        f.gateway
            .handle_event(
                conn_b,
                &bob,
                ClientEvent::DeleteMessage {
                    group_id: "g1".to_string(),
                    message_id: msg_id.clone(),
                },
            )
            .await;
        assert!(matches!(recv(&mut rx_b), ServerEvent::Error { .. }));
        assert!(rx_a.try_recv().is_err());

        // Alice deletes her own; both see it, Alice included
        f.gateway
            .handle_event(
                conn_a,
                &alice,
                ClientEvent::DeleteMessage {
                    group_id: "g1".to_string(),
                    message_id: msg_id.clone(),
                },
            )
            .await;
        for rx in [&mut rx_a, &mut rx_b] {
            match recv(rx) {
                ServerEvent::MessageDeleted { message_id, .. } => {
                    assert_eq!(message_id, msg_id);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(f.gateway.store().list_by_group("g1", 1, 50).1.total, 0);
    }

    #[tokio::test]
    async fn test_edit_broadcasts_updated_message() {
        let f = fixture();
        let alice = identity("u1", "Alice");
        let (conn_a, mut rx_a) = attach(&f.gateway, "u1", "Alice");
        join(&f.gateway, conn_a, &alice, "g1").await;

        f.gateway
            .handle_event(
                conn_a,
                &alice,
                ClientEvent::SendMessage {
                    group_id: "g1".to_string(),
                    message: "typo".to_string(),
                    reply_to: None,
                    client_tag: None,
                },
            )
            .await;
        let msg_id = match recv(&mut rx_a) {
            ServerEvent::NewMessage { message, .. } => message.id,
            other => panic!("unexpected event: {other:?}"),
        };

        f.gateway
            .handle_event(
                conn_a,
                &alice,
                ClientEvent::EditMessage {
                    group_id: "g1".to_string(),
                    message_id: msg_id,
                    message: "fixed".to_string(),
                },
            )
            .await;

        match recv(&mut rx_a) {
            ServerEvent::MessageEdited { message } => {
                assert_eq!(message.body.text(), "fixed");
                assert!(message.is_edited);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_history_is_private_to_requester() {
        let f = fixture();
        let alice = identity("u1", "Alice");
        let bob = identity("u2", "Bob");
        let (conn_a, mut rx_a) = attach(&f.gateway, "u1", "Alice");
        let (conn_b, mut rx_b) = attach(&f.gateway, "u2", "Bob");
        join(&f.gateway, conn_a, &alice, "g1").await;
        join(&f.gateway, conn_b, &bob, "g1").await;
        let _ = rx_a.try_recv();

        f.gateway
            .handle_event(
                conn_a,
                &alice,
                ClientEvent::SendMessage {
                    group_id: "g1".to_string(),
                    message: "one".to_string(),
                    reply_to: None,
                    client_tag: None,
                },
            )
            .await;
        let _ = rx_a.try_recv();
        let _ = rx_b.try_recv();

        f.gateway
            .handle_event(
                conn_b,
                &bob,
                ClientEvent::FetchHistory {
                    group_id: "g1".to_string(),
                    page: 1,
                    page_size: 50,
                },
            )
            .await;

        match recv(&mut rx_b) {
            ServerEvent::History {
                messages, info, ..
            } => {
                assert_eq!(messages.len(), 1);
                assert_eq!(info.total, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_revalidate_dismisses_removed_member() {
        let f = fixture();
        let bob = identity("u2", "Bob");
        let (conn_b, mut rx_b) = attach(&f.gateway, "u2", "Bob");
        join(&f.gateway, conn_b, &bob, "g1").await;
        assert_eq!(f.gateway.hub().room_size("g1"), 1);

        // membership unchanged: recheck is a no-op
        f.gateway.revalidate_room(conn_b, &bob);
        assert_eq!(f.gateway.hub().room_size("g1"), 1);

        f.groups.remove_member("g1", "u2").unwrap();
        f.gateway.revalidate_room(conn_b, &bob);
        assert_eq!(f.gateway.hub().room_size("g1"), 0);
        assert!(matches!(recv(&mut rx_b), ServerEvent::Error { .. }));
    }
}
