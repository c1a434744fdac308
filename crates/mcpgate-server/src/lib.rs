//! HTTP server for mcpgate.
//!
//! Serves the OAuth facade (discovery, registration, authorization, upstream
//! callback, token, revocation) and mounts the MCP endpoint behind a bearer
//! guard that validates facade-issued tokens.

pub mod error;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use error::ApiError;
pub use routes::{bearer_guard, create_router};
pub use state::AppState;
pub use sweeper::{spawn_sweeper, SWEEP_INTERVAL};
