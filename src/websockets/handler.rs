use axum::{
    extract::ws::rejection::WebSocketUpgradeRejection,
    extract::ws::{Message, WebSocket},
    extract::{Path, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use futures::stream::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::messages::{event_frame, subscribed_frame, ClientMessage};
use crate::event::RoomEvent;
use crate::shared::{AppError, AppState};

/// WebSocket endpoint for a room's event stream.
///
/// GET /ws/{code} — the subscription is rejected before upgrade when the
/// room does not currently exist; the room check takes precedence over a
/// malformed upgrade request.
pub async fn websocket_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    if !state.registry.room_exists(&code) {
        warn!(room_code = %code, "Rejecting subscription to unknown room");
        return Err(AppError::NotFound("Room not found".to_string()));
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    info!(room_code = %code, "WebSocket subscription accepted");
    Ok(ws.on_upgrade(move |socket| handle_connection(socket, code, state)))
}

/// Forwards the room's events to the client until the client disconnects,
/// unsubscribes, or the room dies.
async fn handle_connection(mut socket: WebSocket, code: String, state: AppState) {
    let mut events = state.event_bus.subscribe(&code).await;

    if socket
        .send(Message::Text(subscribed_frame(&code)))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let room_gone = matches!(event, RoomEvent::RoomDestroyed {});
                    if socket
                        .send(Message::Text(event_frame(&event)))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    if room_gone {
                        debug!(room_code = %code, "Room destroyed, closing subscriber");
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    // At-most-once delivery: slow subscribers just miss events
                    warn!(room_code = %code, missed, "Subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => {
                    debug!(room_code = %code, "Room channel closed");
                    break;
                }
            },

            incoming = socket.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if ClientMessage::parse(&text) == Some(ClientMessage::Unsubscribe) {
                        debug!(room_code = %code, "Client unsubscribed");
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // Ignore binary/ping/pong
                Some(Err(e)) => {
                    warn!(room_code = %code, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    info!(room_code = %code, "Subscriber disconnected");
}
