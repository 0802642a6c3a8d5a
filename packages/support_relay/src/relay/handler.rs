//! WebSocket Handler
//!
//! Drives one browser link: a sender task drains the connection's outbox
//! onto the socket while the input loop feeds decoded events to the router
//! one at a time, so events from one connection are handled in order.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::auth::SessionToken;
use crate::metrics::RelayMetrics;

use super::protocol::{ClientEvent, ServerEvent};
use super::router::{ConnectionContext, EventRouter};

/// Pick the participant id for a new link: the token's stable id, unless
/// another live link (a second tab) already holds it.
pub async fn connection_id_for(router: &EventRouter, token: &SessionToken) -> String {
    let stable = token.participant_id();
    if router.registry().outbox_of(&stable).await.is_none() {
        return stable;
    }
    let fresh = uuid::Uuid::new_v4().simple().to_string();
    debug!(conn_id = %fresh, "Session already open elsewhere, using a fresh id");
    fresh
}

/// Handle a relay WebSocket connection until either side closes it.
pub async fn handle_relay_ws(
    socket: WebSocket,
    router: Arc<EventRouter>,
    metrics: Arc<RelayMetrics>,
    token: SessionToken,
) {
    let connection_id = connection_id_for(&router, &token).await;
    info!(conn_id = %connection_id, "New relay connection");
    metrics.connection_opened();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Outbox for this link; the registry holds a clone for fan-out
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(router.limits().send_channel_capacity);
    let ctx = ConnectionContext::new(connection_id.clone(), token, tx);

    let sender_task = async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize {}: {}", event.name(), e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    let input_task = async {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => router.process(&ctx, event).await,
                    Err(e) => debug!(conn_id = %ctx.connection_id, "Ignoring malformed event: {}", e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(conn_id = %ctx.connection_id, "WebSocket error: {}", e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!("Sender task ended"),
        _ = input_task => debug!("Input task ended"),
    }

    router.disconnect(&ctx).await;
    metrics.connection_closed();
    info!(conn_id = %connection_id, "Relay connection closed");
}
