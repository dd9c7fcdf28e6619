//! WebSocket connection management
//! Handles the identity and outbound channel of client connections

use log::warn;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use warp::ws::Message;

use crate::core::message::WireMessage;
use crate::error::{Result, RustyPushError};

/// Outbound side of a single client connection
#[derive(Debug)]
pub struct Connection {
    pub id: u64,
    pub sender: mpsc::UnboundedSender<Message>,
    pub connected_at: Instant,
}

impl Connection {
    /// Create a connection with an id handed out by [`ConnectionIdGenerator`]
    pub fn new(id: u64, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id,
            sender,
            connected_at: Instant::now(),
        }
    }

    /// Enqueue a serialized push on this connection
    pub fn send_wire(&self, message: &WireMessage) -> Result<()> {
        self.send(message.to_ws_message())
    }

    /// Enqueue a raw websocket frame on this connection
    pub fn send(&self, message: Message) -> Result<()> {
        self.sender.send(message).map_err(|_| {
            warn!("Failed to send message to client {}", self.id);
            RustyPushError::ConnectionClosed
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Calculate the connection duration
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Hands out unique, monotonically increasing connection ids
#[derive(Debug)]
pub struct ConnectionIdGenerator {
    current: AtomicU64,
}

impl ConnectionIdGenerator {
    /// Seed with the current unix time so ids do not repeat across restarts
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::starting_at(seed)
    }

    pub fn starting_at(seed: u64) -> Self {
        Self {
            current: AtomicU64::new(seed),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.current.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for ConnectionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
