use crate::error::AppError;
use crate::rate_limit::WS_LIMIT;
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::time::Duration;

/// Transport keep-alive; pongs refresh the hub's liveness metadata.
const PING_INTERVAL: Duration = Duration::from_secs(30);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Result<Response, AppError> {
    state.rate_limiter.check("ws_connections", WS_LIMIT)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state)))
}

/// Register with the hub, then pump its queue to the socket until either
/// side goes away.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let hub = state.feed.hub().clone();
    let (id, mut outbound) = hub.register_channel();
    let (mut sender, mut receiver) = socket.split();

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            payload = outbound.recv() => {
                let Some(payload) = payload else {
                    // Hub dropped us: queue overflow or failed send.
                    tracing::debug!(subscriber_id = %id, "Outbound queue closed");
                    break;
                };
                if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
            frame = receiver.next() => match frame {
                Some(Ok(Message::Pong(_))) => hub.record_pong(id),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    hub.mark_closed(id);
    hub.deregister(id);
}
