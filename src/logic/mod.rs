//! Logic tier: replicates pushes across every gateway instance

pub mod gate_conn;
pub mod gate_conn_mgr;

pub use gate_conn::{GatewayConnection, HttpGatewayConnection};
pub use gate_conn_mgr::{GatewayConnManager, LogicPushJob};
