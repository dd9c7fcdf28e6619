// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_GATEWAY_PORT: u16 = 7777;
pub const DEFAULT_GATEWAY_SERVICE_PORT: u16 = 7788;
pub const DEFAULT_LOGIC_PORT: u16 = 7799;
pub const WS_PATH: &str = "connect";

// Connection manager configuration constants
pub const DEFAULT_BUCKET_COUNT: usize = 512;
pub const DEFAULT_DISPATCH_CHANNEL_SIZE: usize = 100_000;
pub const DEFAULT_DISPATCH_WORKER_COUNT: usize = 32;
pub const DEFAULT_BUCKET_JOB_CHANNEL_SIZE: usize = 1000;
pub const DEFAULT_BUCKET_JOB_WORKER_COUNT: usize = 32;

// Websocket session constants
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 60;

// Logic tier configuration constants
pub const DEFAULT_LOGIC_DISPATCH_CHANNEL_SIZE: usize = 100_000;
pub const DEFAULT_LOGIC_DISPATCH_WORKER_COUNT: usize = 32;
pub const DEFAULT_GATEWAY_MAX_PENDING: usize = 64;
pub const DEFAULT_GATEWAY_TIMEOUT_MILLIS: u64 = 3000;

// Client command and push message types
pub const MSG_TYPE_PUSH: &str = "PUSH";
pub const MSG_TYPE_JOIN: &str = "JOIN";
pub const MSG_TYPE_LEAVE: &str = "LEAVE";
pub const MSG_TYPE_PING: &str = "PING";
pub const MSG_TYPE_PONG: &str = "PONG";
