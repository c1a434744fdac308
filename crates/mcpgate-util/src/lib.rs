//! Shared utilities for mcpgate.
//!
//! This crate provides common utilities used across the mcpgate workspace:
//! - Logging setup with tracing
//! - Wildcard pattern matching for redirect URI allow-lists
//! - An injectable clock so expiry logic can be tested without sleeping

pub mod clock;
pub mod log;
pub mod wildcard;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use log::{LogConfig, LogLevel};
