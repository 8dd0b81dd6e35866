use campuschat_proto::ServerEvent;
use thiserror::Error;

use crate::store::StoreError;

/// Failure while handling a single client event.
///
/// Every variant is recovered at the gateway boundary and reported to the
/// requester as a private `error` event; none of them closes the connection
/// or touches other connections' room state.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The membership check failed for a room operation. A user may simply
    /// have left the group mid-session, so this is informed, not punished.
    #[error("not authorized: you are not a member of this group")]
    NotAMember,
    /// Malformed send payload (empty text, missing media, and so on).
    #[error("invalid message: {0}")]
    Validation(String),
    /// Delete or edit targeting a message that does not exist or is not
    /// owned by the requester. The two cases are deliberately
    /// indistinguishable so the existence of another user's message is
    /// never leaked.
    #[error("message not found or not yours to modify")]
    NotFound,
    /// Backing store unreachable; the client may retry the same action.
    #[error("message store unavailable: {0}")]
    Store(String),
}

impl GatewayError {
    /// Wire form: a private `error` event for the requester.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            message: self.to_string(),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => GatewayError::Validation(msg),
            StoreError::NotFound => GatewayError::NotFound,
            StoreError::Unavailable(msg) => GatewayError::Store(msg),
        }
    }
}
