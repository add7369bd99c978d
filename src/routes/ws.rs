//! `GET /sensors/ws`: live reading and anomaly frames over a WebSocket.
//!
//! Each connection gets its own hub cursor. A client that cannot keep up
//! skips the oldest frames instead of holding back the others.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::realtime::Hub;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/sensors/ws", get(upgrade))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Welcome {
    message: &'static str,
    client_id: Uuid,
}

#[derive(Serialize)]
struct ConnectionFrame {
    event: &'static str,
    data: Welcome,
    timestamp: DateTime<Utc>,
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| stream_events(socket, hub))
}

async fn stream_events(socket: WebSocket, hub: Hub) {
    // ---
    let client_id = Uuid::new_v4();
    // Subscribe before greeting so no event slips in between.
    let mut events = hub.subscribe();
    let (mut sender, mut receiver) = socket.split();
    info!(%client_id, subscribers = hub.subscriber_count(), "WebSocket client connected");

    let welcome = ConnectionFrame {
        event: "connection",
        data: Welcome {
            message: "Connected to sensor realtime feed",
            client_id,
        },
        timestamp: Utc::now(),
    };
    if let Ok(text) = serde_json::to_string(&welcome) {
        if sender.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(envelope) => {
                    let text = match serde_json::to_string(&envelope) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(%client_id, error = %e, "Failed to encode event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(%client_id, missed, "WebSocket client lagged; oldest events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => debug!(%client_id, "Ignoring client frame"),
            },
        }
    }

    info!(%client_id, "WebSocket client disconnected");
}
