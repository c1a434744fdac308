//! MCP client error types.

use thiserror::Error;

/// Result type for MCP client operations.
pub type McpResult<T> = Result<T, McpError>;

/// Errors that can occur while talking to a remote MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The server answered with a JSON-RPC error.
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Tool execution failed.
    #[error("Tool execution failed: {0}")]
    ToolError(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server timeout.
    #[error("Server timeout")]
    Timeout,

    /// The server refused the request with a bearer challenge.
    #[error("Authentication required")]
    AuthRequired {
        /// Raw `WWW-Authenticate` header, if the server sent one.
        challenge: Option<String>,
    },

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),
}

impl McpError {
    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a protocol error.
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::ProtocolError(message.into())
    }

    /// Create an authentication failure.
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed(message.into())
    }

    /// Whether the server asked for (new) credentials.
    pub fn is_auth_required(&self) -> bool {
        matches!(self, Self::AuthRequired { .. })
    }
}
