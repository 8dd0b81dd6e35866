//! CampusChat client library.
//!
//! Splits into a thin typed transport ([`client::ChatClient`]) and pure
//! state kept deliberately free of I/O so it can be tested without a
//! server: the optimistic message timeline ([`timeline::Timeline`]), the
//! per-room session state machine ([`session::Session`]), the scroll
//! policy ([`view`]), and the outbound blocklist ([`policy`]).

pub mod client;
pub mod policy;
pub mod session;
pub mod timeline;
pub mod view;

pub use client::{ChatClient, ClientError};
pub use policy::{BlockedTerm, Blocklist};
pub use session::{Session, SessionState, Update};
pub use timeline::{Timeline, TimelineEntry};
pub use view::{ScrollAction, ViewState};
