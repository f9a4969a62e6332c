//! Live-channel transport.
//!
//! The session loop talks to the server through the [`Connector`] seam: a
//! connect attempt yields a pair of mpsc halves carrying typed frames. The
//! production [`WsConnector`] bridges a tokio-tungstenite socket onto those
//! channels; tests plug in an in-memory connector instead.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, warn};

use tutorlink_shared::constants::HANDSHAKE_TIMEOUT_SECS;
use tutorlink_shared::protocol::{ClientAction, ServerEvent};
use tutorlink_shared::types::UserId;
use tutorlink_shared::ChatError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// A live connection: actions flow up, events flow down. Dropping either
/// half tears the connection down.
pub struct Connection {
    pub actions: mpsc::UnboundedSender<ClientAction>,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection for `user`.
    ///
    /// `Authentication` errors are terminal; `Transport` errors are
    /// retried by the session's backoff loop.
    async fn connect(&self, user: UserId) -> Result<Connection, ChatError>;
}

/// WebSocket connector against the server's `/ws` endpoint.
pub struct WsConnector {
    url: String,
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handshake_timeout: Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, user: UserId) -> Result<Connection, ChatError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChatError::Transport(format!("bad gateway url: {e}")))?;
        request.headers_mut().insert(
            USER_ID_HEADER,
            HeaderValue::from_str(&user.to_string())
                .map_err(|e| ChatError::Transport(e.to_string()))?,
        );

        let handshake = tokio_tungstenite::connect_async(request);
        let (socket, _) = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| ChatError::Transport("handshake timed out".into()))?
            .map_err(classify_handshake_error)?;

        let (mut sink, mut stream) = socket.split();
        let (action_tx, mut action_rx) = mpsc::unbounded_channel::<ClientAction>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();

        // Upstream: actions -> text frames.
        tokio::spawn(async move {
            while let Some(action) = action_rx.recv().await {
                let frame = match action.to_json() {
                    Ok(json) => WsMessage::Text(json),
                    Err(e) => {
                        warn!(error = %e, "failed to serialize client action");
                        continue;
                    }
                };
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Downstream: text frames -> events. Malformed frames are dropped.
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match ServerEvent::from_json(&text) {
                        Ok(event) => {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "malformed server frame dropped"),
                    },
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            debug!("gateway stream ended");
        });

        Ok(Connection {
            actions: action_tx,
            events: event_rx,
        })
    }
}

fn classify_handshake_error(error: WsError) -> ChatError {
    match error {
        WsError::Http(response) if response.status().as_u16() == 401 => {
            ChatError::Authentication("gateway rejected credentials".into())
        }
        other => ChatError::Transport(other.to_string()),
    }
}
