//! Typed WebSocket transport for the CampusChat server.
//!
//! [`ChatClient::connect`] performs the authentication handshake and hands
//! back a stream of decoded server events; the client itself only knows how
//! to encode commands and keep track of which room it is in. Everything
//! stateful about the conversation lives in [`crate::session`] and
//! [`crate::timeline`].

use std::sync::Mutex as StdMutex;

use campuschat_proto::{ClientEvent, Identity, MediaKind, ServerEvent, DEFAULT_PAGE_SIZE};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("server refused the connection: {0}")]
    Refused(String),
    #[error("connection closed before handshake completed")]
    Closed,
    #[error("failed to encode event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("not connected")]
    NotConnected,
}

enum WriteMessage {
    Data(String),
    Close,
}

/// A connected, authenticated client. Commands are fire-and-forget; all
/// server responses, including errors, arrive on the event receiver
/// returned by [`ChatClient::connect`].
#[derive(Debug)]
pub struct ChatClient {
    identity: Identity,
    write_tx: mpsc::UnboundedSender<WriteMessage>,
    current_room: StdMutex<Option<String>>,
}

impl ChatClient {
    /// Connect to `url`, present `token`, and wait for the server's
    /// `connected` acknowledgement.
    ///
    /// Returns the client and a receiver carrying every subsequent
    /// server event in arrival order. The receiver closing means the
    /// connection is gone.
    pub async fn connect(
        url: &str,
        token: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>), ClientError> {
        info!(url = %url, "connecting");
        let (ws_stream, _) = connect_async(url).await?;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let connect = ClientEvent::Connect {
            token: Some(token.to_string()),
        };
        ws_write
            .send(Message::Text(serde_json::to_string(&connect)?.into()))
            .await?;

        // The first decodable event settles the handshake either way.
        let identity = loop {
            match ws_read.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(ServerEvent::Connected { user_id, user_name }) => {
                        info!(user = %user_id, "authenticated");
                        break Identity {
                            user_id,
                            display_name: user_name,
                        };
                    }
                    Ok(ServerEvent::Error { message }) => {
                        return Err(ClientError::Refused(message));
                    }
                    Ok(other) => {
                        warn!(event = ?other, "unexpected event during handshake");
                    }
                    Err(e) => {
                        warn!(error = %e, "undecodable frame during handshake");
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Err(ClientError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ClientError::Transport(e)),
            }
        };

        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WriteMessage>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = write_rx.recv() => {
                        match outgoing {
                            Some(WriteMessage::Data(data)) => {
                                if ws_write.send(Message::Text(data.into())).await.is_err() {
                                    error!("failed to send to server");
                                    break;
                                }
                            }
                            Some(WriteMessage::Close) | None => {
                                if let Err(e) = ws_write.send(Message::Close(None)).await {
                                    warn!(error = %e, "failed to send close frame");
                                }
                                break;
                            }
                        }
                    }
                    incoming = ws_read.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if event_tx.send(event).is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        warn!(error = %e, "undecodable server event");
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!("server closed the connection");
                                break;
                            }
                            Some(Err(e)) => {
                                error!(error = %e, "websocket error");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok((
            Self {
                identity,
                write_tx,
                current_room: StdMutex::new(None),
            },
            event_rx,
        ))
    }

    /// The identity the server acknowledged at connect time.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn current_room(&self) -> Option<String> {
        self.current_room.lock().unwrap().clone()
    }

    /// Join a group room. A connection occupies one room at a time, so a
    /// prior room is left explicitly first.
    pub fn join_group(&self, group_id: &str) -> Result<(), ClientError> {
        let previous = {
            let mut guard = self.current_room.lock().unwrap();
            guard.replace(group_id.to_string())
        };
        if let Some(prev) = previous {
            if prev != group_id {
                self.send(&ClientEvent::LeaveGroup { group_id: prev })?;
            }
        }
        self.send(&ClientEvent::JoinGroup {
            group_id: group_id.to_string(),
        })
    }

    pub fn leave_group(&self, group_id: &str) -> Result<(), ClientError> {
        let mut guard = self.current_room.lock().unwrap();
        if guard.as_deref() == Some(group_id) {
            guard.take();
        }
        drop(guard);
        self.send(&ClientEvent::LeaveGroup {
            group_id: group_id.to_string(),
        })
    }

    pub fn send_message(
        &self,
        group_id: &str,
        message: &str,
        reply_to: Option<String>,
        client_tag: Option<String>,
    ) -> Result<(), ClientError> {
        self.send(&ClientEvent::SendMessage {
            group_id: group_id.to_string(),
            message: message.to_string(),
            reply_to,
            client_tag,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_media(
        &self,
        group_id: &str,
        media_type: MediaKind,
        media_name: &str,
        media_data: &str,
        media_size: Option<u64>,
        caption: &str,
        client_tag: Option<String>,
    ) -> Result<(), ClientError> {
        self.send(&ClientEvent::SendMedia {
            group_id: group_id.to_string(),
            media_type,
            media_name: media_name.to_string(),
            media_data: media_data.to_string(),
            media_size,
            message: caption.to_string(),
            reply_to: None,
            client_tag,
        })
    }

    pub fn set_typing(&self, group_id: &str, is_typing: bool) -> Result<(), ClientError> {
        self.send(&ClientEvent::Typing {
            group_id: group_id.to_string(),
            is_typing,
        })
    }

    pub fn mark_read(&self, group_id: &str, message_ids: Vec<String>) -> Result<(), ClientError> {
        self.send(&ClientEvent::MarkRead {
            group_id: group_id.to_string(),
            message_ids,
        })
    }

    pub fn delete_message(&self, group_id: &str, message_id: &str) -> Result<(), ClientError> {
        self.send(&ClientEvent::DeleteMessage {
            group_id: group_id.to_string(),
            message_id: message_id.to_string(),
        })
    }

    pub fn edit_message(
        &self,
        group_id: &str,
        message_id: &str,
        message: &str,
    ) -> Result<(), ClientError> {
        self.send(&ClientEvent::EditMessage {
            group_id: group_id.to_string(),
            message_id: message_id.to_string(),
            message: message.to_string(),
        })
    }

    pub fn fetch_history(&self, group_id: &str, page: u32) -> Result<(), ClientError> {
        self.send(&ClientEvent::FetchHistory {
            group_id: group_id.to_string(),
            page,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Leave the current room, then close the socket so the server sees an
    /// orderly departure rather than a dropped transport.
    pub fn disconnect(&self) {
        info!("disconnecting");
        if let Some(room) = self.current_room.lock().unwrap().take() {
            let _ = self.send(&ClientEvent::LeaveGroup { group_id: room });
        }
        let _ = self.write_tx.send(WriteMessage::Close);
    }

    /// Encode and send any client event. The typed methods above are
    /// wrappers over this; session-produced commands go through it
    /// directly.
    pub fn send_event(&self, event: &ClientEvent) -> Result<(), ClientError> {
        self.send(event)
    }

    fn send(&self, event: &ClientEvent) -> Result<(), ClientError> {
        let json = serde_json::to_string(event)?;
        debug!(preview = %frame_preview(&json), "sending");
        self.write_tx
            .send(WriteMessage::Data(json))
            .map_err(|_| ClientError::NotConnected)
    }
}

/// First ~100 bytes of a frame for log output, cut back to a char boundary
/// so a multi-byte character straddling the limit never splits.
fn frame_preview(json: &str) -> &str {
    if json.len() <= 100 {
        return json;
    }
    let mut end = 100;
    while !json.is_char_boundary(end) {
        end -= 1;
    }
    &json[..end]
}

#[cfg(test)]
mod tests {
    use super::frame_preview;

    #[test]
    fn test_frame_preview_passes_short_frames_through() {
        assert_eq!(frame_preview("{\"type\":\"typing\"}"), "{\"type\":\"typing\"}");
    }

    #[test]
    fn test_frame_preview_truncates_long_ascii() {
        let frame = "x".repeat(250);
        assert_eq!(frame_preview(&frame).len(), 100);
    }

    #[test]
    fn test_frame_preview_backs_off_mid_character() {
        // emoji occupies bytes 98..102, straddling the cut point
        let frame = format!("{}😀 and plenty more text after it", "a".repeat(98));
        let preview = frame_preview(&frame);
        assert_eq!(preview, "a".repeat(98));
    }
}
