//! Shared data model and wire protocol for CampusChat
//!
//! Both the server and the client crate speak the message types defined
//! here; the JSON shapes on the wire are stable.

mod events;
mod model;

pub use events::{ClientEvent, MediaKind, ServerEvent, DEFAULT_PAGE_SIZE};
pub use model::{
    ChatMessage, HistoryInfo, Identity, MediaRef, MessageBody, ReadReceipt, ReplyPreview,
};
