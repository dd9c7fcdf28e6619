use std::error::Error;
use std::fmt;
use std::sync::PoisonError;

#[derive(Debug)]
pub enum RustyPushError {
    // Submission errors
    DispatchChannelFull,
    LogicDispatchChannelFull,

    // Connections errors
    ConnectionNotInBucket(u64),
    ConnectionClosed,

    // Messages errors
    SerializationError(String),
    MessageParseError(String),

    // Logic tier errors
    GatewayError(String),

    // System errors
    SystemError(String),

    // Configuration errors
    ConfigError(String),
}

impl fmt::Display for RustyPushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DispatchChannelFull => write!(f, "Dispatch channel is full"),
            Self::LogicDispatchChannelFull => write!(f, "Logic dispatch channel is full"),
            Self::ConnectionNotInBucket(id) => {
                write!(f, "Connection {} does not belong to this bucket", id)
            }
            Self::ConnectionClosed => write!(f, "Connection closed unexpectedly"),
            Self::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Self::MessageParseError(msg) => write!(f, "Message parse error: {}", msg),
            Self::GatewayError(msg) => write!(f, "Gateway error: {}", msg),
            Self::SystemError(msg) => write!(f, "System error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RustyPushError {}

// Converting from PoisonError to facilitate poisoned lock handling
impl<T> From<PoisonError<T>> for RustyPushError {
    fn from(err: PoisonError<T>) -> Self {
        RustyPushError::SystemError(format!("Lock poisoned: {}", err))
    }
}

impl From<serde_json::Error> for RustyPushError {
    fn from(err: serde_json::Error) -> Self {
        RustyPushError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for RustyPushError {
    fn from(err: reqwest::Error) -> Self {
        RustyPushError::GatewayError(err.to_string())
    }
}

impl RustyPushError {
    /// Numeric code reported in the HTTP response envelope
    pub fn errno(&self) -> i32 {
        match self {
            Self::DispatchChannelFull => 1001,
            Self::LogicDispatchChannelFull => 1002,
            Self::ConnectionNotInBucket(_) => 1003,
            Self::ConnectionClosed => 1004,
            Self::SerializationError(_) => 1005,
            Self::MessageParseError(_) => 1006,
            Self::GatewayError(_) => 1007,
            Self::SystemError(_) => 1008,
            Self::ConfigError(_) => 1009,
        }
    }
}

// Generic result type for RustyPush
pub type Result<T> = std::result::Result<T, RustyPushError>;
