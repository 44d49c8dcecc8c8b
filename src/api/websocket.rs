//! WebSocket bridge onto the broadcast hub
//!
//! Each socket is one hub client. Outbound frames are the hub's JSON
//! messages; inbound text frames are `subscribe` / `unsubscribe` actions.
//! A frame that does not parse is answered with an `error` message and the
//! current subscription is kept.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::state::ApiState;
use crate::hub::{ClientConnection, ClientMessage};

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: ApiState) {
    let client = Arc::new(state.hub.connect());
    info!(client_id = client.id(), "stream client connected");

    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(8);

    let outbound = client.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                message = outbound.recv() => match message {
                    Some(message) => match message.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to serialize hub message: {}", e);
                            continue;
                        }
                    },
                    None => {
                        debug!("hub closed the client");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                },
                Some(reply) = reply_rx.recv() => reply,
            };

            if sender.send(Message::Text(text)).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    let inbound = client.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let reply = handle_client_text(&inbound, &text);
                    if reply_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                // pongs are answered by axum
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!(
        client_id = client.id(),
        dropped = client.dropped(),
        "stream client disconnected"
    );
}

/// Apply one inbound action and build the reply frame
fn handle_client_text(client: &ClientConnection, text: &str) -> String {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => {
            client.handle(message);
            let filter = client.filter();
            debug!(client_id = client.id(), ?filter, "subscription changed");
            json!({
                "type": "subscribed",
                "collector_ids": filter.collector_ids,
                "metric_names": filter.metric_names,
            })
            .to_string()
        }
        Err(e) => json!({
            "type": "error",
            "message": format!("invalid client message: {e}"),
        })
        .to_string(),
    }
}
