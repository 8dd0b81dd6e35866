//! CampusChat group chat server
//!
//! Membership-gated real-time chat for study groups: room broadcast,
//! typing indicators, read receipts, owner-only deletion and editing, and
//! paginated history, over a WebSocket wire protocol shared with the
//! client crate through `campuschat-proto`.

mod auth;
mod config;
mod connection;
mod error;
mod gateway;
mod groups;
mod rooms;
mod store;

pub use auth::{AuthError, Authenticator, TokenDirectory};
pub use config::{Seed, SeedError, ServerConfig};
pub use connection::{handle_connection, ConnectionOptions};
pub use error::GatewayError;
pub use gateway::Gateway;
pub use groups::{GroupDirectory, GroupError, MembershipAuthority};
pub use rooms::{ConnId, RoomHub};
pub use store::{MessageStore, NewMessage, StoreError};
