//! Gateway push service: turns item batches from the logic tier into pushes

use log::debug;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

use super::{reply_result, with_state, MAX_PUSH_BODY_BYTES};
use crate::core::conn_mgr::ConnectionManager;
use crate::core::message::BizMessage;
use crate::error::Result;

#[derive(Debug, Deserialize)]
pub struct RoomQuery {
    pub room: String,
}

/// Submit a whole batch as one push so it is queued or rejected as a unit
fn push_batch<F>(items: Vec<Value>, push: F) -> Result<()>
where
    F: FnOnce(BizMessage) -> Result<()>,
{
    let count = items.len();
    push(BizMessage::push(Value::Array(items)))?;
    debug!("Accepted batch of {} pushed items", count);
    Ok(())
}

fn json_batch() -> impl Filter<Extract = (Vec<Value>,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_PUSH_BODY_BYTES).and(warp::body::json())
}

pub fn push_routes(
    conn_mgr: Arc<ConnectionManager>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let push_all = warp::path!("push" / "all")
        .and(warp::post())
        .and(with_state(conn_mgr.clone()))
        .and(json_batch())
        .map(|conn_mgr: Arc<ConnectionManager>, items: Vec<Value>| {
            reply_result(push_batch(items, |msg| conn_mgr.push_all(msg)))
        });

    let push_room = warp::path!("push" / "room")
        .and(warp::post())
        .and(warp::query::<RoomQuery>())
        .and(with_state(conn_mgr.clone()))
        .and(json_batch())
        .map(
            |query: RoomQuery, conn_mgr: Arc<ConnectionManager>, items: Vec<Value>| {
                reply_result(push_batch(items, |msg| conn_mgr.push_room(&query.room, msg)))
            },
        );

    let push_room_one = warp::path!("push" / "room_one")
        .and(warp::post())
        .and(warp::query::<RoomQuery>())
        .and(with_state(conn_mgr))
        .and(json_batch())
        .map(
            |query: RoomQuery, conn_mgr: Arc<ConnectionManager>, items: Vec<Value>| {
                reply_result(push_batch(items, |msg| {
                    conn_mgr.push_room_one(&query.room, msg)
                }))
            },
        );

    push_all.or(push_room).or(push_room_one)
}
