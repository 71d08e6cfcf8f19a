//! WebSocket transport for the signaling router.
//!
//! Each socket gets a writer task draining an unbounded queue, so the
//! router can enqueue from any connection's handler without awaiting.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::http::AppState;
use crate::protocol::Envelope;
use crate::router::SignalingRouter;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let router = state.router.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, router))
}

async fn handle_socket(socket: WebSocket, router: SignalingRouter) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let mut session = router.connect(tx);
    let conn = session.id().to_string();

    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, event = %envelope.event, "Failed to encode outbound event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => router.handle_envelope(&mut session, &envelope),
                Err(e) => debug!(conn = %conn, error = %e, "Ignoring malformed frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(conn = %conn, error = %e, "WebSocket read error");
                break;
            }
        }
    }

    // Dropping the router's sender ends the writer once the queue drains.
    router.disconnect(&mut session);
    let _ = writer.await;
}
