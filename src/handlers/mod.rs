//! Request handlers for the gateway and logic endpoints

pub mod logic_api;
pub mod push;
pub mod websocket;

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::constants::WS_PATH;
use crate::core::connection::ConnectionIdGenerator;
use crate::core::conn_mgr::ConnectionManager;
use crate::error::{Result, RustyPushError};
use crate::logic::GatewayConnManager;
use crate::metrics::{export_metrics, Metric};

// Re-export the websocket handler
pub use websocket::handle_ws_client;

/// Largest push body accepted over HTTP
const MAX_PUSH_BODY_BYTES: u64 = 4 * 1024 * 1024;

/// State shared by every websocket session of a gateway
pub struct GatewayState {
    pub conn_mgr: Arc<ConnectionManager>,
    pub conn_ids: ConnectionIdGenerator,
    pub heartbeat_timeout: Duration,
}

impl GatewayState {
    pub fn new(conn_mgr: Arc<ConnectionManager>, heartbeat_timeout: Duration) -> Self {
        Self {
            conn_mgr,
            conn_ids: ConnectionIdGenerator::new(),
            heartbeat_timeout,
        }
    }
}

/// Response envelope of the push endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub errno: i32,
    pub msg: String,
}

pub(crate) fn reply_result(result: Result<()>) -> warp::reply::WithStatus<warp::reply::Json> {
    match result {
        Ok(()) => warp::reply::with_status(
            warp::reply::json(&ApiResponse {
                errno: 0,
                msg: "success".to_string(),
            }),
            StatusCode::OK,
        ),
        Err(e) => {
            let status = match e {
                RustyPushError::DispatchChannelFull | RustyPushError::LogicDispatchChannelFull => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                RustyPushError::MessageParseError(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warp::reply::with_status(
                warp::reply::json(&ApiResponse {
                    errno: e.errno(),
                    msg: e.to_string(),
                }),
                status,
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatsQuery {
    format: Option<String>,
}

fn stats_reply(metrics: Vec<Metric>, json: String, query: StatsQuery) -> warp::reply::Response {
    match query.format.as_deref() {
        None | Some("json") => {
            warp::reply::with_header(json, "content-type", "application/json").into_response()
        }
        Some(format) => match export_metrics(&metrics, format) {
            Ok(body) => body.into_response(),
            Err(e) => {
                warp::reply::with_status(e.to_string(), StatusCode::BAD_REQUEST).into_response()
            }
        },
    }
}

fn health_route() -> impl Filter<Extract = (&'static str,), Error = Rejection> + Clone {
    warp::path("health").and(warp::get()).map(|| "OK")
}

fn with_state<T: Send + Sync + 'static>(
    state: Arc<T>,
) -> impl Filter<Extract = (Arc<T>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Client-facing websocket listener of a gateway
pub fn gateway_ws_routes(
    state: Arc<GatewayState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let ws_route = warp::path(WS_PATH)
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_state(state))
        .map(|ws: warp::ws::Ws, state: Arc<GatewayState>| {
            ws.on_upgrade(move |socket| handle_ws_client(socket, state))
        });

    ws_route.or(health_route())
}

/// Push service of a gateway, consumed by the logic tier
pub fn gateway_service_routes(
    conn_mgr: Arc<ConnectionManager>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let stats_route = warp::path("stats")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<StatsQuery>())
        .and(with_state(conn_mgr.clone()))
        .map(|query: StatsQuery, conn_mgr: Arc<ConnectionManager>| {
            let snapshot = conn_mgr.stats().snapshot();
            let json = serde_json::to_string(&snapshot).unwrap_or_default();
            stats_reply(snapshot.to_metrics(), json, query)
        });

    push::push_routes(conn_mgr)
        .or(stats_route)
        .or(health_route())
}

/// Push API of the logic tier, consumed by business callers
pub fn logic_routes(
    gate_conn_mgr: Arc<GatewayConnManager>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let stats_route = warp::path("stats")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<StatsQuery>())
        .and(with_state(gate_conn_mgr.clone()))
        .map(|query: StatsQuery, gate_conn_mgr: Arc<GatewayConnManager>| {
            let snapshot = gate_conn_mgr.snapshot();
            let json = serde_json::to_string(&snapshot).unwrap_or_default();
            stats_reply(snapshot.to_metrics(), json, query)
        });

    logic_api::logic_push_routes(gate_conn_mgr)
        .or(stats_route)
        .or(health_route())
}
