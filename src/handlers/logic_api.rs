//! Logic tier push API consumed by business callers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

use super::{reply_result, with_state, MAX_PUSH_BODY_BYTES};
use crate::error::{Result, RustyPushError};
use crate::logic::GatewayConnManager;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    #[serde(default)]
    pub room: Option<String>,
    pub items: Vec<Value>,
}

impl PushRequest {
    fn require_room(&self) -> Result<&str> {
        match self.room.as_deref() {
            Some(room) if !room.is_empty() => Ok(room),
            _ => Err(RustyPushError::MessageParseError(
                "room is required".to_string(),
            )),
        }
    }
}

fn push_request() -> impl Filter<Extract = (PushRequest,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_PUSH_BODY_BYTES).and(warp::body::json())
}

pub fn logic_push_routes(
    gate_conn_mgr: Arc<GatewayConnManager>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let push_all = warp::path!("push" / "all")
        .and(warp::post())
        .and(with_state(gate_conn_mgr.clone()))
        .and(push_request())
        .map(|mgr: Arc<GatewayConnManager>, req: PushRequest| {
            reply_result(mgr.push_all(req.items))
        });

    let push_room = warp::path!("push" / "room")
        .and(warp::post())
        .and(with_state(gate_conn_mgr.clone()))
        .and(push_request())
        .map(|mgr: Arc<GatewayConnManager>, req: PushRequest| {
            let result = req
                .require_room()
                .map(str::to_string)
                .and_then(|room| mgr.push_room(&room, req.items));
            reply_result(result)
        });

    let push_room_one = warp::path!("push" / "room_one")
        .and(warp::post())
        .and(with_state(gate_conn_mgr))
        .and(push_request())
        .map(|mgr: Arc<GatewayConnManager>, req: PushRequest| {
            let result = req
                .require_room()
                .map(str::to_string)
                .and_then(|room| mgr.push_room_one(&room, req.items));
            reply_result(result)
        });

    push_all.or(push_room).or(push_room_one)
}
