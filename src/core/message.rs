use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use warp::ws::Message as WsMessage;

use crate::constants::MSG_TYPE_PUSH;
use crate::error::Result;

/// Business message as produced by callers and exchanged with clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BizMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: Value,
}

impl BizMessage {
    pub fn new(msg_type: impl Into<String>, data: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
        }
    }

    /// Wrap one pushed item
    pub fn push(data: Value) -> Self {
        Self::new(MSG_TYPE_PUSH, data)
    }
}

/// Payload of JOIN / LEAVE client commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRequest {
    pub room: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

/// Serialized outbound message, shared by every bucket a job fans out to
#[derive(Debug, Clone)]
pub struct WireMessage {
    kind: MessageKind,
    payload: Arc<[u8]>,
}

impl WireMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            payload: Arc::from(text.into().into_bytes()),
        }
    }

    pub fn binary(data: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Binary,
            payload: Arc::from(data),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Build the websocket frame handed to a connection's writer
    pub fn to_ws_message(&self) -> WsMessage {
        match self.kind {
            MessageKind::Text => match std::str::from_utf8(&self.payload) {
                Ok(text) => WsMessage::text(text),
                Err(_) => WsMessage::binary(self.payload.to_vec()),
            },
            MessageKind::Binary => WsMessage::binary(self.payload.to_vec()),
        }
    }
}

/// Turns a business message into its wire form; must be deterministic and pure
pub trait MessageEncoder: Send + Sync {
    fn encode(&self, message: &BizMessage) -> Result<WireMessage>;
}

/// Default encoder: JSON text frames
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEncoder;

impl MessageEncoder for JsonEncoder {
    fn encode(&self, message: &BizMessage) -> Result<WireMessage> {
        Ok(WireMessage::text(serde_json::to_string(message)?))
    }
}

/// Delivery target of a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushType {
    All,
    Room(Arc<str>),
    RoomOne(Arc<str>),
}

impl fmt::Display for PushType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Room(room_id) => write!(f, "room({})", room_id),
            Self::RoomOne(room_id) => write!(f, "room_one({})", room_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_biz_message_wire_shape() {
        let msg = BizMessage::push(json!({"title": "hello"}));
        let wire = JsonEncoder.encode(&msg).unwrap();
        assert_eq!(wire.kind(), MessageKind::Text);

        let decoded: Value = serde_json::from_slice(wire.payload()).unwrap();
        assert_eq!(decoded, json!({"type": "PUSH", "data": {"title": "hello"}}));
    }

    #[test]
    fn test_client_command_without_data() {
        let msg: BizMessage = serde_json::from_str(r#"{"type":"PING"}"#).unwrap();
        assert_eq!(msg.msg_type, "PING");
        assert_eq!(msg.data, Value::Null);
    }

    #[test]
    fn test_wire_message_to_ws_frame() {
        let text = WireMessage::text("abc").to_ws_message();
        assert_eq!(text.to_str(), Ok("abc"));

        let binary = WireMessage::binary(vec![0xff, 0x00]).to_ws_message();
        assert!(binary.is_binary());
        assert_eq!(binary.as_bytes(), &[0xff, 0x00]);
    }

    #[test]
    fn test_push_type_display() {
        assert_eq!(PushType::All.to_string(), "all");
        assert_eq!(PushType::RoomOne(Arc::from("r1")).to_string(), "room_one(r1)");
    }
}
