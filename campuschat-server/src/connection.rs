//! Per-connection transport: authentication handshake, the event pump, and
//! disconnect cleanup.

use std::sync::Arc;
use std::time::Duration;

use campuschat_proto::{ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{error, info, warn};

use crate::auth::AuthError;
use crate::gateway::Gateway;

/// Per-connection behavior knobs, derived from [`crate::ServerConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// How long a new connection gets to present its credential.
    pub auth_timeout: Duration,
    /// Opt-in periodic membership re-validation; `None` (the default)
    /// accepts stale membership for the lifetime of a room admission.
    pub membership_recheck: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(10),
            membership_recheck: None,
        }
    }
}

/// Handle a single WebSocket connection from handshake to cleanup.
pub async fn handle_connection(
    ws_stream: WebSocketStream<TcpStream>,
    gateway: Arc<Gateway>,
    options: ConnectionOptions,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Authentication runs exactly once, before any room operation.
    let identity = match wait_for_connect(&mut ws_receiver, &gateway, options.auth_timeout).await {
        Ok(identity) => identity,
        Err(err) => {
            warn!(reason = %err, "connection refused");
            let refusal = ServerEvent::Error {
                message: err.to_string(),
            };
            if let Ok(json) = serde_json::to_string(&refusal) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!(user = %identity.user_id, "user connected");

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn_id = gateway.hub().register(identity.clone(), tx);

    // Acknowledge before anything else can be delivered.
    let ack = ServerEvent::Connected {
        user_id: identity.user_id.clone(),
        user_name: identity.display_name.clone(),
    };
    match serde_json::to_string(&ack) {
        Ok(json) => {
            if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                error!(user = %identity.user_id, error = %e, "failed to send connected ack");
            }
        }
        Err(e) => error!(error = %e, "failed to serialize connected ack"),
    }

    // Forward events from the hub channel to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recheck = options.membership_recheck.map(|period| {
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            res = ws_receiver.next() => {
                match res {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => gateway.handle_event(conn_id, &identity, event).await,
                            Err(e) => {
                                warn!(user = %identity.user_id, error = %e, "unparseable event");
                                gateway.hub().send_to(conn_id, &ServerEvent::Error {
                                    message: "unrecognized event".to_string(),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(user = %identity.user_id, "close frame received");
                        break;
                    }
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Err(e)) => {
                        error!(user = %identity.user_id, error = %e, "websocket error");
                        break;
                    }
                    None => {
                        info!(user = %identity.user_id, "stream ended");
                        break;
                    }
                    _ => {}
                }
            }
            _ = async {
                match recheck.as_mut() {
                    Some(interval) => { interval.tick().await; }
                    None => std::future::pending().await,
                }
            } => {
                gateway.revalidate_room(conn_id, &identity);
            }
            _ = &mut send_task => {
                info!(user = %identity.user_id, "send task finished, connection lost");
                break;
            }
        }
    }

    // Implicit dismissal: room membership never retains dead connections.
    send_task.abort();
    gateway.hub().drop_connection(conn_id);
    info!(user = %identity.user_id, "user disconnected");
}

/// Waits for the `connect` frame and resolves its token, within the bounded
/// timeout. Frames that are not a `connect` event are skipped.
async fn wait_for_connect(
    receiver: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
    gateway: &Gateway,
    auth_timeout: Duration,
) -> Result<campuschat_proto::Identity, AuthError> {
    let handshake = tokio::time::timeout(auth_timeout, async {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Text(text)) = result {
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(ClientEvent::Connect { token }) => {
                        return gateway.authenticator().authenticate(token.as_deref());
                    }
                    Ok(_) => {
                        warn!("event received before authentication, ignoring");
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to parse connect frame");
                    }
                }
            }
        }
        Err(AuthError::MissingToken)
    });

    match handshake.await {
        Ok(result) => result,
        Err(_) => Err(AuthError::Timeout),
    }
}
