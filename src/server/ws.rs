use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use super::AppState;
use crate::logging::{log, log_transport_failure, obj, v_num, Domain, Level};

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One subscriber per socket. Packets published before the upgrade are not
/// replayed; the client never needs to send anything.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut subscription = state.broadcaster.subscribe();
    let id = subscription.id();
    log(Level::Info, Domain::Server, "ws_connected", obj(&[("subscriber", v_num(id as f64))]));

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(packet) = subscription.recv().await {
            let text = match serde_json::to_string(&packet) {
                Ok(text) => text,
                Err(err) => {
                    log_transport_failure(id, &format!("serialize: {}", err));
                    continue;
                }
            };
            if let Err(err) = sender.send(Message::Text(text)).await {
                log_transport_failure(id, &err.to_string());
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    let mut shutdown = state.shutdown.clone();
    tokio::select! {
        _ = &mut send_task => {},
        _ = &mut recv_task => {},
        _ = shutdown.wait() => {},
    }
    send_task.abort();
    recv_task.abort();

    log(Level::Info, Domain::Server, "ws_disconnected", obj(&[("subscriber", v_num(id as f64))]));
}
