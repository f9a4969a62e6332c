//! Live-channel gateway.
//!
//! Each authenticated WebSocket connection gets one mpsc sink registered on
//! the delivery bus. The connection task relays bus events out as JSON text
//! frames and handles the two inbound client actions (subscribe /
//! unsubscribe). Malformed inbound frames are logged and dropped; they never
//! take the process down.

use std::collections::HashMap;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tutorlink_shared::protocol::{ClientAction, ServerEvent};
use tutorlink_shared::types::{ChannelId, UserId};

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::bus::SubscriptionHandle;

pub async fn ws_handler(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: UserId) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    info!(user = %user, "gateway connection opened");

    let mut subscriptions: HashMap<ChannelId, SubscriptionHandle> = HashMap::new();

    // The personal channel is always attached; the client additionally
    // subscribes to the groups it cares about.
    let personal = ChannelId::User(user);
    subscriptions.insert(personal, state.bus.subscribe(personal, tx.clone()).await);

    let mut presence_rx = state.bus.subscribe_presence();
    state.bus.publish_presence(ServerEvent::PresenceUpdated {
        user_id: user,
        online: true,
    });

    loop {
        tokio::select! {
            // Bus events for this connection's subscriptions.
            event = rx.recv() => {
                let Some(event) = event else { break };
                if forward(&mut sink, &event).await.is_err() {
                    break;
                }
            }

            // Presence transitions fan out to every live connection.
            presence = presence_rx.recv() => {
                match presence {
                    Ok(event) => {
                        if forward(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(user = %user, skipped, "presence receiver lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }

            // Inbound client actions.
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_action(&state, user, &tx, &mut subscriptions, &text).await;
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(WsMessage::Binary(_))) => {
                        warn!(user = %user, "ignoring unexpected binary frame");
                    }
                    Some(Err(e)) => {
                        debug!(user = %user, error = %e, "gateway socket error");
                        break;
                    }
                }
            }
        }
    }

    // Teardown: detach every subscription and announce offline.
    for handle in subscriptions.values() {
        state.bus.unsubscribe(handle).await;
    }
    state.bus.publish_presence(ServerEvent::PresenceUpdated {
        user_id: user,
        online: false,
    });

    info!(user = %user, "gateway connection closed");
}

async fn forward(
    sink: &mut (impl SinkExt<WsMessage> + Unpin),
    event: &ServerEvent,
) -> Result<(), ()> {
    let json = match event.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize outbound event");
            return Ok(());
        }
    };
    sink.send(WsMessage::Text(json)).await.map_err(|_| ())
}

async fn handle_action(
    state: &AppState,
    user: UserId,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    subscriptions: &mut HashMap<ChannelId, SubscriptionHandle>,
    text: &str,
) {
    let action = match ClientAction::from_json(text) {
        Ok(action) => action,
        Err(e) => {
            warn!(user = %user, error = %e, "malformed client frame dropped");
            return;
        }
    };

    match action {
        ClientAction::Subscribe { channel } => {
            if subscriptions.contains_key(&channel) {
                return;
            }
            if !may_subscribe(state, user, &channel) {
                warn!(user = %user, channel = %channel, "subscribe denied");
                return;
            }
            let handle = state.bus.subscribe(channel, tx.clone()).await;
            subscriptions.insert(channel, handle);
        }

        ClientAction::Unsubscribe { channel } => {
            if let Some(handle) = subscriptions.remove(&channel) {
                state.bus.unsubscribe(&handle).await;
            }
        }
    }
}

/// A connection may hold its own personal channel and the channels of
/// groups the user belongs to; everything else is denied.
fn may_subscribe(state: &AppState, user: UserId, channel: &ChannelId) -> bool {
    match channel {
        ChannelId::User(owner) => *owner == user,
        ChannelId::Group(group_id) => {
            let Ok(db) = state.db.lock() else { return false };
            db.is_member(*group_id, user).unwrap_or(false)
        }
    }
}
