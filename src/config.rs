//! Server configuration module
//! Handles dynamic configuration parameters for the gateway and logic tiers

use crate::constants::{
    DEFAULT_BUCKET_COUNT, DEFAULT_BUCKET_JOB_CHANNEL_SIZE, DEFAULT_BUCKET_JOB_WORKER_COUNT,
    DEFAULT_DISPATCH_CHANNEL_SIZE, DEFAULT_DISPATCH_WORKER_COUNT, DEFAULT_GATEWAY_MAX_PENDING,
    DEFAULT_GATEWAY_PORT, DEFAULT_GATEWAY_SERVICE_PORT, DEFAULT_GATEWAY_TIMEOUT_MILLIS,
    DEFAULT_HEARTBEAT_TIMEOUT_SECS, DEFAULT_HOST, DEFAULT_LOGIC_DISPATCH_CHANNEL_SIZE,
    DEFAULT_LOGIC_DISPATCH_WORKER_COUNT, DEFAULT_LOGIC_PORT,
};
use crate::error::{Result, RustyPushError};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Semaphore;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(false)
}

fn require_positive(value: usize, name: &str) -> Result<()> {
    if value == 0 {
        return Err(RustyPushError::ConfigError(format!(
            "{} must be greater than zero",
            name
        )));
    }
    Ok(())
}

/// In-flight caps back a semaphore, which cannot hold more than its maximum permits
pub(crate) fn validate_max_pending(value: usize, name: &str) -> Result<()> {
    if value > Semaphore::MAX_PERMITS {
        return Err(RustyPushError::ConfigError(format!(
            "{} must be at most {}",
            name,
            Semaphore::MAX_PERMITS
        )));
    }
    Ok(())
}

/// Validate that TLS is either fully configured or disabled
fn validate_tls(cert: &Option<String>, key: &Option<String>) -> Result<()> {
    match (cert, key) {
        (None, None) => Ok(()),
        (Some(cert_path), Some(key_path)) => {
            if !std::path::Path::new(cert_path).exists() {
                return Err(RustyPushError::ConfigError(format!(
                    "TLS certificate file does not exist: {}",
                    cert_path
                )));
            }
            if !std::path::Path::new(key_path).exists() {
                return Err(RustyPushError::ConfigError(format!(
                    "TLS private key file does not exist: {}",
                    key_path
                )));
            }
            Ok(())
        }
        _ => Err(RustyPushError::ConfigError(
            "Both a TLS certificate and a TLS private key are required to enable TLS".to_string(),
        )),
    }
}

/// Gateway tier configuration parameters
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    /// Port of the websocket listener
    pub ws_port: u16,
    /// Port of the HTTP push service consumed by the logic tier
    pub service_port: u16,
    /// Number of connection shards, fixed for the process lifetime
    pub bucket_count: usize,
    pub dispatch_channel_size: usize,
    pub dispatch_worker_count: usize,
    pub bucket_job_channel_size: usize,
    pub bucket_job_worker_count: usize,
    /// Close a client that stays silent longer than this
    pub heartbeat_timeout: Duration,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            ws_port: DEFAULT_GATEWAY_PORT,
            service_port: DEFAULT_GATEWAY_SERVICE_PORT,
            bucket_count: DEFAULT_BUCKET_COUNT,
            dispatch_channel_size: DEFAULT_DISPATCH_CHANNEL_SIZE,
            dispatch_worker_count: DEFAULT_DISPATCH_WORKER_COUNT,
            bucket_job_channel_size: DEFAULT_BUCKET_JOB_CHANNEL_SIZE,
            bucket_job_worker_count: DEFAULT_BUCKET_JOB_WORKER_COUNT,
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            host: env::var("RUSTY_PUSH_HOST").unwrap_or(defaults.host),
            ws_port: env_or("RUSTY_PUSH_WS_PORT", defaults.ws_port),
            service_port: env_or("RUSTY_PUSH_SERVICE_PORT", defaults.service_port),
            bucket_count: env_or("RUSTY_PUSH_BUCKET_COUNT", defaults.bucket_count),
            dispatch_channel_size: env_or(
                "RUSTY_PUSH_DISPATCH_CHANNEL_SIZE",
                defaults.dispatch_channel_size,
            ),
            dispatch_worker_count: env_or(
                "RUSTY_PUSH_DISPATCH_WORKER_COUNT",
                defaults.dispatch_worker_count,
            ),
            bucket_job_channel_size: env_or(
                "RUSTY_PUSH_BUCKET_JOB_CHANNEL_SIZE",
                defaults.bucket_job_channel_size,
            ),
            bucket_job_worker_count: env_or(
                "RUSTY_PUSH_BUCKET_JOB_WORKER_COUNT",
                defaults.bucket_job_worker_count,
            ),
            heartbeat_timeout: Duration::from_secs(env_or(
                "RUSTY_PUSH_HEARTBEAT_TIMEOUT",
                DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            )),
            tls_cert_path: env::var("RUSTY_PUSH_TLS_CERT_PATH").ok(),
            tls_key_path: env::var("RUSTY_PUSH_TLS_KEY_PATH").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the connection manager cannot be built with
    pub fn validate(&self) -> Result<()> {
        require_positive(self.bucket_count, "bucket_count")?;
        require_positive(self.dispatch_channel_size, "dispatch_channel_size")?;
        require_positive(self.dispatch_worker_count, "dispatch_worker_count")?;
        require_positive(self.bucket_job_channel_size, "bucket_job_channel_size")?;
        require_positive(self.bucket_job_worker_count, "bucket_job_worker_count")?;
        validate_tls(&self.tls_cert_path, &self.tls_key_path)
    }

    /// Certificate and key paths, present only when both are configured
    pub fn tls_paths(&self) -> Option<(&str, &str)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert_path), Some(key_path)) => Some((cert_path, key_path)),
            _ => None,
        }
    }
}

/// One remote gateway the logic tier fans out to
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GatewayEndpoint {
    /// Base URL of the gateway push service, e.g. `http://10.0.0.1:7788`
    pub url: String,
    /// Maximum number of concurrent in-flight pushes to this gateway
    #[serde(default)]
    pub max_pending: Option<usize>,
}

/// Logic tier configuration parameters
#[derive(Debug, Clone)]
pub struct LogicConfig {
    pub host: String,
    pub port: u16,
    pub dispatch_channel_size: usize,
    pub dispatch_worker_count: usize,
    /// In-flight cap applied to gateways that do not set their own
    pub gateway_max_pending: usize,
    pub gateway_timeout: Duration,
    pub gateways: Vec<GatewayEndpoint>,
}

impl Default for LogicConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_LOGIC_PORT,
            dispatch_channel_size: DEFAULT_LOGIC_DISPATCH_CHANNEL_SIZE,
            dispatch_worker_count: DEFAULT_LOGIC_DISPATCH_WORKER_COUNT,
            gateway_max_pending: DEFAULT_GATEWAY_MAX_PENDING,
            gateway_timeout: Duration::from_millis(DEFAULT_GATEWAY_TIMEOUT_MILLIS),
            gateways: Vec::new(),
        }
    }
}

impl LogicConfig {
    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let gateways = match env::var("RUSTY_PUSH_LOGIC_GATEWAYS") {
            Ok(raw) => Self::parse_gateways(&raw)?,
            Err(_) => defaults.gateways,
        };

        let config = Self {
            host: env::var("RUSTY_PUSH_LOGIC_HOST").unwrap_or(defaults.host),
            port: env_or("RUSTY_PUSH_LOGIC_PORT", defaults.port),
            dispatch_channel_size: env_or(
                "RUSTY_PUSH_LOGIC_DISPATCH_CHANNEL_SIZE",
                defaults.dispatch_channel_size,
            ),
            dispatch_worker_count: env_or(
                "RUSTY_PUSH_LOGIC_DISPATCH_WORKER_COUNT",
                defaults.dispatch_worker_count,
            ),
            gateway_max_pending: env_or(
                "RUSTY_PUSH_LOGIC_GATEWAY_MAX_PENDING",
                defaults.gateway_max_pending,
            ),
            gateway_timeout: Duration::from_millis(env_or(
                "RUSTY_PUSH_LOGIC_GATEWAY_TIMEOUT",
                DEFAULT_GATEWAY_TIMEOUT_MILLIS,
            )),
            gateways,
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse the JSON gateway list, e.g. `[{"url":"http://127.0.0.1:7788","max_pending":16}]`
    pub fn parse_gateways(raw: &str) -> Result<Vec<GatewayEndpoint>> {
        serde_json::from_str(raw).map_err(|e| {
            RustyPushError::ConfigError(format!("Invalid RUSTY_PUSH_LOGIC_GATEWAYS: {}", e))
        })
    }

    pub fn validate(&self) -> Result<()> {
        require_positive(self.dispatch_channel_size, "logic dispatch_channel_size")?;
        require_positive(self.dispatch_worker_count, "logic dispatch_worker_count")?;
        if self.gateways.is_empty() {
            return Err(RustyPushError::ConfigError(
                "At least one gateway must be configured in RUSTY_PUSH_LOGIC_GATEWAYS".to_string(),
            ));
        }
        validate_max_pending(self.gateway_max_pending, "gateway_max_pending")?;
        for endpoint in &self.gateways {
            validate_max_pending(
                self.max_pending_for(endpoint),
                &format!("max_pending of gateway {}", endpoint.url),
            )?;
        }
        Ok(())
    }

    /// Effective in-flight cap for a gateway
    pub fn max_pending_for(&self, endpoint: &GatewayEndpoint) -> usize {
        endpoint.max_pending.unwrap_or(self.gateway_max_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_gateway_config_is_valid() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_bucket_count_rejected() {
        let config = GatewayConfig {
            bucket_count: 0,
            ..GatewayConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bucket_count"));
    }

    #[test]
    fn test_partial_tls_rejected() {
        let config = GatewayConfig {
            tls_cert_path: Some("/tmp/cert.pem".to_string()),
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(config.tls_paths().is_none());
    }

    #[test]
    fn test_parse_gateways() {
        let gateways = LogicConfig::parse_gateways(
            r#"[{"url":"http://a:7788","max_pending":4},{"url":"http://b:7788"}]"#,
        )
        .unwrap();
        assert_eq!(gateways.len(), 2);
        assert_eq!(gateways[0].max_pending, Some(4));
        assert_eq!(gateways[1].max_pending, None);

        let config = LogicConfig {
            gateway_max_pending: 9,
            gateways: gateways.clone(),
            ..LogicConfig::default()
        };
        assert_eq!(config.max_pending_for(&gateways[0]), 4);
        assert_eq!(config.max_pending_for(&gateways[1]), 9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tls_paths_require_both_files() {
        let config = GatewayConfig {
            tls_cert_path: Some("cert.pem".to_string()),
            tls_key_path: Some("key.pem".to_string()),
            ..GatewayConfig::default()
        };
        assert_eq!(config.tls_paths(), Some(("cert.pem", "key.pem")));
        assert!(GatewayConfig::default().tls_paths().is_none());
    }

    #[test]
    fn test_oversized_max_pending_rejected() {
        let gateways = vec![GatewayEndpoint {
            url: "http://a:7788".to_string(),
            max_pending: Some(usize::MAX),
        }];
        let config = LogicConfig {
            gateways,
            ..LogicConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_pending"));

        let config = LogicConfig {
            gateway_max_pending: Semaphore::MAX_PERMITS + 1,
            gateways: vec![GatewayEndpoint {
                url: "http://a:7788".to_string(),
                max_pending: Some(8),
            }],
            ..LogicConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_logic_config_requires_gateways() {
        assert!(LogicConfig::default().validate().is_err());
        assert!(LogicConfig::parse_gateways("not json").is_err());
    }
}
