//! Model Context Protocol (MCP) support for mcpgate.
//!
//! The server side has JSON-RPC protocol types, a tool registry and a
//! stateless streamable HTTP router. Authentication is not handled there: the
//! protected server mounts [`create_mcp_router`] behind the bearer guard in
//! `mcpgate-server`, which passes the caller on as an
//! [`mcpgate_auth::Principal`].
//!
//! The client side ([`McpHttpClient`]) talks to a protected server and runs
//! the OAuth login it asks for: discovery, dynamic registration and a PKCE
//! authorization through a loopback redirect.

pub mod callback;
pub mod client;
pub mod error;
pub mod http_serve;
pub mod oauth;
pub mod protocol;
pub mod serve;
pub mod tools;

pub use callback::{CallbackServer, PendingCallback};
pub use client::McpHttpClient;
pub use error::{McpError, McpResult};
pub use http_serve::{create_mcp_router, McpHttpState, MAX_BODY_BYTES};
pub use oauth::{BearerChallenge, LoginOptions, OAuthClient, OAuthSession, OAuthTokens};
pub use protocol::{
    CallToolParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, McpTool, RequestId, ToolCallResult, ToolContent, PROTOCOL_VERSION,
};
pub use serve::{ClosureExecutor, McpServerTool, McpServerToolBuilder, McpToolContext, McpToolExecutor};
pub use tools::{arithmetic_tools, protected_tools};
