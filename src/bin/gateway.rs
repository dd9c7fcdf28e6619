use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

use rusty_push::config::GatewayConfig;
use rusty_push::core::ConnectionManager;
use rusty_push::handlers::{gateway_service_routes, gateway_ws_routes, GatewayState};

fn parse_addr(host: &str, port: u16) -> SocketAddr {
    match format!("{}:{}", host, port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize env
    let dotenv_result = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    match dotenv_result {
        Ok(_) => info!("Environment variables loaded from .env file"),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, ws_port={}, service_port={}, buckets={}",
        config.host, config.ws_port, config.service_port, config.bucket_count
    );

    let conn_mgr = match ConnectionManager::new(&config) {
        Ok(conn_mgr) => Arc::new(conn_mgr),
        Err(e) => {
            error!("Failed to create connection manager: {}", e);
            std::process::exit(1);
        }
    };
    conn_mgr.run_async();

    let state = Arc::new(GatewayState::new(conn_mgr.clone(), config.heartbeat_timeout));
    let ws_routes = gateway_ws_routes(state);
    let service_routes = gateway_service_routes(conn_mgr);

    let ws_addr = parse_addr(&config.host, config.ws_port);
    let service_addr = parse_addr(&config.host, config.service_port);

    info!("Starting push service on {}", service_addr);
    let service = tokio::spawn(warp::serve(service_routes).run(service_addr));

    match config.tls_paths() {
        Some((cert_path, key_path)) => {
            info!("Starting TLS websocket listener on {}", ws_addr);
            warp::serve(ws_routes)
                .tls()
                .cert_path(cert_path)
                .key_path(key_path)
                .run(ws_addr)
                .await;
        }
        None => {
            info!("Starting websocket listener on {}", ws_addr);
            warp::serve(ws_routes).run(ws_addr).await;
        }
    }

    service.abort();
}
