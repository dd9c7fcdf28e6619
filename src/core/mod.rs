//! Core functionality for the push gateway

pub mod bucket;
pub mod conn_mgr;
pub mod connection;
pub mod message;
pub mod room;

// Re-export main components for convenience
pub use bucket::Bucket;
pub use conn_mgr::{ConnectionManager, PushJob};
pub use connection::{Connection, ConnectionIdGenerator};
pub use message::{BizMessage, JsonEncoder, MessageEncoder, PushType, WireMessage};
pub use room::{PushReport, Room};
