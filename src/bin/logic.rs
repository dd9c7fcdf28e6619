use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

use rusty_push::config::LogicConfig;
use rusty_push::handlers::logic_routes;
use rusty_push::logic::GatewayConnManager;

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

    let config = match LogicConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, gateways={}",
        config.host,
        config.port,
        config.gateways.len()
    );

    let gate_conn_mgr = match GatewayConnManager::new(&config) {
        Ok(mgr) => Arc::new(mgr),
        Err(e) => {
            error!("Failed to create gateway connection manager: {}", e);
            std::process::exit(1);
        }
    };
    gate_conn_mgr.run_async();

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting logic server on {}", addr);
    warp::serve(logic_routes(gate_conn_mgr)).run(addr).await;
}
