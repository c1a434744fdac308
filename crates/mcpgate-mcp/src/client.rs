//! Client for remote MCP servers over streamable HTTP.
//!
//! Requests are POSTed as JSON-RPC; replies may come back as plain JSON or as
//! a single-event SSE body. A `401` with a bearer challenge starts the OAuth
//! login in [`crate::oauth`], and an expired session is refreshed once before
//! giving up.

use crate::error::{McpError, McpResult};
use crate::oauth::{BearerChallenge, LoginOptions, OAuthClient, OAuthSession};
use crate::protocol::{
    CallToolParams, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpTool,
    ToolCallResult, PROTOCOL_VERSION,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Header carrying the session id some servers assign.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header carrying the negotiated protocol version.
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// An MCP client bound to one server URL.
pub struct McpHttpClient {
    url: String,
    http: Client,
    oauth: OAuthClient,
    session: RwLock<Option<OAuthSession>>,
    session_id: RwLock<Option<String>>,
    next_id: AtomicI64,
}

impl McpHttpClient {
    pub fn new(url: impl Into<String>) -> McpResult<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| McpError::connection_failed(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            oauth: OAuthClient::new()?,
            session: RwLock::new(None),
            session_id: RwLock::new(None),
            next_id: AtomicI64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The current OAuth session, if logged in.
    pub async fn oauth_session(&self) -> Option<OAuthSession> {
        self.session.read().await.clone()
    }

    /// Use an existing OAuth session.
    pub async fn set_oauth_session(&self, session: OAuthSession) {
        *self.session.write().await = Some(session);
    }

    /// Initialize, logging in first if the server demands it.
    pub async fn connect(&self, options: &LoginOptions) -> McpResult<InitializeResult> {
        match self.initialize().await {
            Err(McpError::AuthRequired { challenge }) => {
                let challenge = challenge.as_deref().and_then(BearerChallenge::parse);
                info!(url = %self.url, "Server requires authorization, starting OAuth login");
                let session = self.oauth.login(&self.url, challenge.as_ref(), options).await?;
                self.set_oauth_session(session).await;
                self.initialize().await
            }
            other => other,
        }
    }

    /// Run the `initialize` handshake.
    pub async fn initialize(&self) -> McpResult<InitializeResult> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mcpgate",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let result: InitializeResult = self.request("initialize", Some(params)).await?;
        info!(
            server = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "Connected to MCP server"
        );
        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    pub async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        let result: ListToolsResult = self.request("tools/list", None).await?;
        Ok(result.tools)
    }

    /// Call a tool. A result flagged as an error becomes [`McpError::ToolError`].
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> McpResult<ToolCallResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result: ToolCallResult = self
            .request("tools/call", Some(serde_json::to_value(params)?))
            .await?;
        if result.is_error {
            return Err(McpError::ToolError(result.text()));
        }
        Ok(result)
    }

    /// Send a request and decode its result.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        let response = match self.send(&request).await {
            Err(McpError::AuthRequired { challenge }) => {
                if !self.can_refresh().await {
                    return Err(McpError::AuthRequired { challenge });
                }
                debug!(method = %method, "Access token rejected, refreshing");
                self.refresh_session().await?;
                self.send(&request).await.map_err(|e| match e {
                    McpError::AuthRequired { .. } => McpError::AuthRequired { challenge },
                    e => e,
                })?
            }
            other => other?,
        };

        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = response
            .result
            .ok_or_else(|| McpError::protocol_error("Response has neither result nor error"))?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        let notification = JsonRpcRequest::notification(method, params);
        debug!(method = %method, "Sending notification");

        let response = self.post(&notification).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(McpError::AuthRequired {
                challenge: challenge_header(&response),
            });
        }
        if !response.status().is_success() {
            warn!(status = %response.status(), "Notification returned non-success status");
        }
        Ok(())
    }

    async fn can_refresh(&self) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .is_some_and(OAuthSession::can_refresh)
    }

    async fn refresh_session(&self) -> McpResult<()> {
        let mut guard = self.session.write().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| McpError::auth_failed("Not logged in"))?;
        self.oauth.refresh(session).await?;
        info!(resource = %session.resource, "Refreshed OAuth tokens");
        Ok(())
    }

    async fn send(&self, request: &JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        debug!(id = ?request.id, method = %request.method, "Sending request");
        let response = self.post(request).await?;
        read_response(response).await
    }

    async fn post(&self, message: &JsonRpcRequest) -> McpResult<reqwest::Response> {
        let mut req = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .json(message);

        if let Some(session) = self.session.read().await.as_ref() {
            req = req.bearer_auth(session.access_token());
        }
        if let Some(id) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_ID_HEADER, id);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                McpError::Timeout
            } else if e.is_connect() {
                McpError::connection_failed(format!("{}: {e}", self.url))
            } else {
                McpError::protocol_error(format!("Request failed: {e}"))
            }
        })?;

        if let Some(id) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write().await = Some(id.to_string());
        }

        Ok(response)
    }
}

impl std::fmt::Debug for McpHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpHttpClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

fn challenge_header(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Decode a JSON-RPC reply from a JSON or SSE body.
async fn read_response(response: reqwest::Response) -> McpResult<JsonRpcResponse> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(McpError::AuthRequired {
            challenge: challenge_header(&response),
        });
    }

    let is_sse = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"));
    let text = response
        .text()
        .await
        .map_err(|e| McpError::protocol_error(format!("Failed to read response: {e}")))?;

    let parsed = if is_sse {
        parse_sse_body(&text)
    } else {
        serde_json::from_str::<JsonRpcResponse>(&text)
            .map_err(|e| McpError::protocol_error(format!("Invalid JSON response: {e}")))
    };

    match parsed {
        // Error statuses still carry a JSON-RPC error worth reporting.
        Ok(reply) if status.is_success() || reply.error.is_some() => Ok(reply),
        _ if !status.is_success() => Err(McpError::protocol_error(format!(
            "Server returned {status}: {text}"
        ))),
        other => other,
    }
}

/// Find the first `data:` line holding a JSON-RPC reply.
fn parse_sse_body(body: &str) -> McpResult<JsonRpcResponse> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(data.trim()).ok())
        .find(|reply| reply.result.is_some() || reply.error.is_some())
        .ok_or_else(|| McpError::protocol_error("SSE stream ended without response"))
}
