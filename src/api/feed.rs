//! WebSocket change feed.
//!
//! Every connection first receives a `snapshot` of all like counts, then one
//! JSON `ContentEvent` per change. The feed is push-only; text sent by the
//! client is ignored.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::{collections::BTreeMap, sync::Arc};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};

use super::{AppState, ContentEvent};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_feed(socket, state))
}

async fn handle_feed(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let feed_id = uuid::Uuid::new_v4().to_string();

    // Subscribe before reading the snapshot so no change falls in between
    let events = BroadcastStream::new(state.subscribe());
    let mut shutdown = state.shutdown_receiver();

    let likes = match state.store.list_episodes() {
        Ok(episodes) => episodes.into_iter().map(|e| (e.id, e.likes)).collect(),
        Err(e) => {
            warn!("Failed to load like snapshot: {}", e);
            BTreeMap::new()
        }
    };
    let snapshot = ContentEvent::Snapshot {
        server_time: chrono::Utc::now().timestamp(),
        likes,
    };

    match serde_json::to_string(&snapshot) {
        Ok(text) => {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        Err(e) => warn!("Failed to encode snapshot: {}", e),
    }

    info!("Feed {} connected", feed_id);

    let feed_id_send = feed_id.clone();
    let feed_id_recv = feed_id.clone();

    // Task to forward change events to the socket
    let mut send_task = tokio::spawn(async move {
        let mut events = events;
        while let Some(item) = events.next().await {
            let event: ContentEvent = match item {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    debug!("Feed {} lagged, skipped {} events", feed_id_send, skipped);
                    continue;
                }
            };
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to encode event: {}", e);
                }
            }
        }
        let _ = ws_sender.close().await;
        debug!("Send task ended for feed {}", feed_id_send);
    });

    // Task to watch for the client going away
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
        debug!("Receive task ended for feed {}", feed_id_recv);
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
        _ = shutdown.recv() => {
            send_task.abort();
            recv_task.abort();
        }
    }

    info!("Feed {} disconnected", feed_id);
}
