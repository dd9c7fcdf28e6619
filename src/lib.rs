//! Rusty Push - A sharded WebSocket push gateway implemented in Rust
//!
//! This library provides the gateway tier, which holds client connections in
//! buckets and delivers pushes to everyone, a room, or one room member, and
//! the logic tier, which replicates pushes across every gateway instance.

pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod logic;
pub mod metrics;

// Re-export main components
pub use config::*;
pub use constants::*;
