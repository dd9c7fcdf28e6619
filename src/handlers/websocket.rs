use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{debug, info, warn};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use super::GatewayState;
use crate::constants::{MSG_TYPE_JOIN, MSG_TYPE_LEAVE, MSG_TYPE_PING, MSG_TYPE_PONG};
use crate::core::connection::Connection;
use crate::core::message::{BizMessage, RoomRequest};
use crate::error::{Result, RustyPushError};

// Handle a WebSocket connection
pub async fn handle_ws_client(ws: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn a task to forward messages from our channel to the WebSocket
    tokio::task::spawn(async move {
        let mut rx = rx;
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_tx.send(message).await {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let conn = Arc::new(Connection::new(state.conn_ids.next_id(), tx));
    state.conn_mgr.add_conn(conn.clone());
    info!("Client connected: {}", conn.id);

    let mut joined_rooms = HashSet::new();

    loop {
        let frame = match tokio::time::timeout(state.heartbeat_timeout, ws_rx.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!("WebSocket error on client {}: {}", conn.id, e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                info!("Client {} missed its heartbeat, closing", conn.id);
                break;
            }
        };

        if frame.is_close() {
            break;
        }

        // Only text frames carry commands
        let Ok(text) = frame.to_str() else {
            continue;
        };

        if let Err(e) = process_command(text, &conn, &state, &mut joined_rooms) {
            warn!("Ignoring command from client {}: {}", conn.id, e);
        }
    }

    // Client disconnected
    for room_id in &joined_rooms {
        if let Err(e) = state.conn_mgr.leave_room(room_id, &conn) {
            warn!("Client {} failed to leave room {}: {}", conn.id, room_id, e);
        }
    }
    state.conn_mgr.del_conn(&conn);
    info!(
        "Client disconnected: {} after {:?}",
        conn.id,
        conn.connection_duration()
    );
}

// Process an incoming client command
fn process_command(
    text: &str,
    conn: &Arc<Connection>,
    state: &GatewayState,
    joined_rooms: &mut HashSet<String>,
) -> Result<()> {
    let command: BizMessage = serde_json::from_str(text)
        .map_err(|e| RustyPushError::MessageParseError(e.to_string()))?;

    match command.msg_type.as_str() {
        MSG_TYPE_JOIN => {
            let request: RoomRequest = serde_json::from_value(command.data)
                .map_err(|e| RustyPushError::MessageParseError(e.to_string()))?;
            state.conn_mgr.join_room(&request.room, conn)?;
            debug!("Client {} joined room {}", conn.id, request.room);
            joined_rooms.insert(request.room);
        }
        MSG_TYPE_LEAVE => {
            let request: RoomRequest = serde_json::from_value(command.data)
                .map_err(|e| RustyPushError::MessageParseError(e.to_string()))?;
            state.conn_mgr.leave_room(&request.room, conn)?;
            debug!("Client {} left room {}", conn.id, request.room);
            joined_rooms.remove(&request.room);
        }
        MSG_TYPE_PING => {
            let pong = BizMessage::new(MSG_TYPE_PONG, json!({}));
            conn.send(Message::text(serde_json::to_string(&pong)?))?;
        }
        other => {
            return Err(RustyPushError::MessageParseError(format!(
                "Unknown command type: {}",
                other
            )));
        }
    }

    Ok(())
}
