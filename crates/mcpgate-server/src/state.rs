//! Server state.

use mcpgate_auth::OAuthFacade;
use mcpgate_mcp::McpHttpState;

/// State shared by the facade endpoints and the bearer guard.
#[derive(Clone, Debug)]
pub struct AppState {
    /// OAuth facade.
    pub facade: OAuthFacade,
    /// Protected MCP server mounted at the configured path.
    pub mcp: McpHttpState,
}

impl AppState {
    pub fn new(facade: OAuthFacade, mcp: McpHttpState) -> Self {
        Self { facade, mcp }
    }
}
