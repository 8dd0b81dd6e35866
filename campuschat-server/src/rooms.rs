//! Room multiplexer / presence hub.
//!
//! Maps group rooms to the live connections admitted to them, fans events
//! out to room members, and holds the ephemeral per-room typing state.
//! Constructed once at server start and shared by handle; tests build as
//! many isolated instances as they like.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use campuschat_proto::{Identity, ServerEvent};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, error};

pub type ConnId = u64;

struct Connection {
    identity: Identity,
    tx: mpsc::UnboundedSender<String>,
    /// A connection belongs to at most one room at a time (single active
    /// chat screen on the client).
    room: Option<String>,
}

#[derive(Default)]
struct Room {
    members: Vec<ConnId>,
    /// user_id -> display name of users currently typing. Never expired
    /// server-side; clients send the stop signal, and dismissal clears it.
    typing: HashMap<String, String>,
}

#[derive(Default)]
pub struct RoomHub {
    connections: DashMap<ConnId, Connection>,
    rooms: DashMap<String, Room>,
    next_conn_id: AtomicU64,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an authenticated connection and returns its handle.
    /// Serialized events sent on `tx` are the connection's outbound stream.
    pub fn register(&self, identity: Identity, tx: mpsc::UnboundedSender<String>) -> ConnId {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(
            conn_id,
            Connection {
                identity,
                tx,
                room: None,
            },
        );
        conn_id
    }

    pub fn identity(&self, conn_id: ConnId) -> Option<Identity> {
        self.connections.get(&conn_id).map(|c| c.identity.clone())
    }

    pub fn room_of(&self, conn_id: ConnId) -> Option<String> {
        self.connections.get(&conn_id).and_then(|c| c.room.clone())
    }

    /// Admits the connection to a room, first removing it from any room it
    /// was in. Emits `user-joined` to the room's other members.
    pub fn admit(&self, conn_id: ConnId, group_id: &str) {
        let Some((identity, previous)) = ({
            self.connections.get_mut(&conn_id).map(|mut conn| {
                let previous = conn.room.replace(group_id.to_string());
                (conn.identity.clone(), previous)
            })
        }) else {
            return;
        };

        if previous.as_deref() == Some(group_id) {
            // re-joining the current room is a no-op
            return;
        }
        if let Some(previous) = previous {
            self.remove_from_room(&previous, conn_id, &identity);
        }

        self.rooms
            .entry(group_id.to_string())
            .or_default()
            .members
            .push(conn_id);
        debug!(user = %identity.user_id, group = group_id, "admitted to room");

        self.broadcast(
            group_id,
            &ServerEvent::UserJoined {
                user_id: identity.user_id,
                user_name: identity.display_name,
            },
            Some(conn_id),
        );
    }

    /// Removes the connection from the named room if it is currently in it.
    /// Emits `user-left` to the remaining members.
    pub fn dismiss(&self, conn_id: ConnId, group_id: &str) {
        let Some(identity) = ({
            self.connections.get_mut(&conn_id).and_then(|mut conn| {
                if conn.room.as_deref() == Some(group_id) {
                    conn.room = None;
                    Some(conn.identity.clone())
                } else {
                    None
                }
            })
        }) else {
            return;
        };
        self.remove_from_room(group_id, conn_id, &identity);
    }

    /// Transport-level disconnect: implicit dismissal from whatever room the
    /// connection was in, then deregistration. Room membership never retains
    /// dead connections.
    pub fn drop_connection(&self, conn_id: ConnId) {
        let Some((_, conn)) = self.connections.remove(&conn_id) else {
            return;
        };
        if let Some(room) = conn.room {
            self.remove_from_room(&room, conn_id, &conn.identity);
        }
    }

    fn remove_from_room(&self, group_id: &str, conn_id: ConnId, identity: &Identity) {
        {
            let Some(mut room) = self.rooms.get_mut(group_id) else {
                return;
            };
            room.members.retain(|c| *c != conn_id);
            room.typing.remove(&identity.user_id);
        }
        self.rooms.remove_if(group_id, |_, room| room.members.is_empty());
        debug!(user = %identity.user_id, group = group_id, "left room");

        self.broadcast(
            group_id,
            &ServerEvent::UserLeft {
                user_id: identity.user_id.clone(),
                user_name: identity.display_name.clone(),
            },
            None,
        );
    }

    /// Sends an event to every connection admitted to the room, except the
    /// optionally excluded one. The member list is snapshotted under the
    /// room entry so a broadcast never observes it mid-mutation.
    pub fn broadcast(&self, group_id: &str, event: &ServerEvent, exclude: Option<ConnId>) {
        let payload = match serde_json::to_string(event) {
            Ok(s) => s,
            Err(e) => {
                error!(group = group_id, error = %e, "failed to serialize event");
                return;
            }
        };
        let members: Vec<ConnId> = match self.rooms.get(group_id) {
            Some(room) => room.members.clone(),
            None => return,
        };
        for member in members {
            if Some(member) == exclude {
                continue;
            }
            if let Some(conn) = self.connections.get(&member) {
                let _ = conn.tx.send(payload.clone());
            }
        }
    }

    /// Private event to a single connection.
    pub fn send_to(&self, conn_id: ConnId, event: &ServerEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to serialize event");
                return;
            }
        };
        if let Some(conn) = self.connections.get(&conn_id) {
            let _ = conn.tx.send(payload);
        }
    }

    /// Updates the ephemeral typing set and immediately notifies the room's
    /// other members.
    pub fn set_typing(&self, conn_id: ConnId, group_id: &str, is_typing: bool) {
        let Some(identity) = self.identity(conn_id) else {
            return;
        };
        {
            let Some(mut room) = self.rooms.get_mut(group_id) else {
                return;
            };
            if is_typing {
                room.typing
                    .insert(identity.user_id.clone(), identity.display_name.clone());
            } else {
                room.typing.remove(&identity.user_id);
            }
        }
        self.broadcast(
            group_id,
            &ServerEvent::UserTyping {
                user_id: identity.user_id,
                user_name: identity.display_name,
                is_typing,
            },
            Some(conn_id),
        );
    }

    /// Users currently marked as typing in the room.
    pub fn typing_users(&self, group_id: &str) -> Vec<(String, String)> {
        self.rooms
            .get(group_id)
            .map(|room| {
                room.typing
                    .iter()
                    .map(|(id, name)| (id.clone(), name.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn room_size(&self, group_id: &str) -> usize {
        self.rooms
            .get(group_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }
}
