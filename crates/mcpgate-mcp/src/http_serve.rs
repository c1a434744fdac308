//! Stateless streamable HTTP transport for the MCP server.
//!
//! Every JSON-RPC request arrives as its own `POST` and is answered inline
//! with `application/json`; there are no sessions and no SSE stream.
//!
//! ```text
//! Client                             Server
//!   │── POST /mcp  {request} ─────────►│
//!   │◄── 200 application/json ─────────│
//!   │── POST /mcp  {notification} ────►│
//!   │◄── 202 Accepted ─────────────────│
//! ```
//!
//! When the router sits behind the bearer guard, the guard leaves a
//! [`Principal`] in the request extensions and tools see it through
//! [`McpToolContext`].

use crate::protocol::{
    error_codes, CallToolParams, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, McpTool, RequestId, ServerCapabilities, ServerInfo,
    ToolCallResult, ToolContent, ToolsCapability, PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::serve::{McpServerTool, McpToolContext};
use axum::{
    body::to_bytes,
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use mcpgate_auth::Principal;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

/// Largest JSON-RPC body accepted.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// State for the MCP HTTP server.
#[derive(Clone)]
pub struct McpHttpState {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
    /// Usage hint returned from `initialize`.
    pub instructions: Option<String>,
    /// Registered tools, keyed by name so listings are stable.
    pub tools: Arc<BTreeMap<String, McpServerTool>>,
}

impl std::fmt::Debug for McpHttpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpHttpState")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl McpHttpState {
    /// Create a new MCP HTTP state.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        tools: impl IntoIterator<Item = McpServerTool>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            instructions: None,
            tools: Arc::new(
                tools
                    .into_iter()
                    .map(|tool| (tool.name.clone(), tool))
                    .collect(),
            ),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Handle a JSON-RPC request.
    ///
    /// Returns `None` for notifications.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        ctx: &McpToolContext,
    ) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, id = ?request.id, "Handling MCP request");

        // Notifications (no id) don't expect a response
        let Some(id) = request.id else {
            match request.method.as_str() {
                "notifications/initialized" => debug!("Received initialized notification"),
                _ => debug!(method = %request.method, "Received unknown notification"),
            }
            return None;
        };

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                Some(id),
                error_codes::INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"",
            ));
        }

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params),
            "ping" => JsonRpcResponse::success(Some(id), serde_json::json!({})),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => self.handle_call_tool(id, request.params, ctx).await,
            _ => JsonRpcResponse::error(
                Some(id),
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        };
        Some(response)
    }

    /// Handle the initialize request.
    ///
    /// The client's protocol version is echoed back when supported.
    fn handle_initialize(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let params: InitializeParams = params
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();

        let protocol_version = params
            .protocol_version
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(&v.as_str()))
            .unwrap_or_else(|| PROTOCOL_VERSION.to_string());

        info!(
            name = %self.name,
            client = ?params.client_info.as_ref().map(|c| c.name.as_str()),
            protocol_version = %protocol_version,
            "Initializing MCP session"
        );

        let result = InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: self.name.clone(),
                version: Some(self.version.clone()),
            },
            instructions: self.instructions.clone(),
        };

        to_response(id, &result)
    }

    /// Handle the tools/list request.
    fn handle_list_tools(&self, id: RequestId) -> JsonRpcResponse {
        debug!(count = self.tools.len(), "Listing MCP tools");

        let tools: Vec<McpTool> = self
            .tools
            .values()
            .map(|tool| McpTool {
                name: tool.name.clone(),
                title: tool.title.clone(),
                description: Some(tool.description.clone()),
                input_schema: tool.parameters.clone(),
            })
            .collect();

        to_response(id, &ListToolsResult { tools })
    }

    /// Handle the tools/call request.
    async fn handle_call_tool(
        &self,
        id: RequestId,
        params: Option<Value>,
        ctx: &McpToolContext,
    ) -> JsonRpcResponse {
        let params: CallToolParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        Some(id),
                        error_codes::INVALID_PARAMS,
                        format!("Invalid params: {e}"),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(
                    Some(id),
                    error_codes::INVALID_PARAMS,
                    "Missing params",
                );
            }
        };

        let Some(tool) = self.tools.get(&params.name) else {
            return JsonRpcResponse::error(
                Some(id),
                error_codes::INVALID_PARAMS,
                format!("Unknown tool: {}", params.name),
            );
        };

        debug!(tool = %params.name, "Calling MCP tool");

        let args = params
            .arguments
            .unwrap_or(Value::Object(serde_json::Map::new()));

        let tool_result = match tool.executor.execute(args, ctx).await {
            Ok(output) => {
                debug!(tool = %params.name, "Tool completed successfully");
                success_result(output)
            }
            Err(e) => {
                warn!(tool = %params.name, error = %e, "Tool failed");
                ToolCallResult {
                    content: vec![ToolContent::Text { text: e }],
                    structured_content: None,
                    is_error: true,
                }
            }
        };

        to_response(id, &tool_result)
    }
}

/// Wrap a tool's output. Objects are also returned as structured content.
fn success_result(output: Value) -> ToolCallResult {
    let text = match &output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let structured_content = output.is_object().then_some(output);
    ToolCallResult {
        content: vec![ToolContent::Text { text }],
        structured_content,
        is_error: false,
    }
}

fn to_response<T: serde::Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(Some(id), value),
        Err(e) => JsonRpcResponse::error(
            Some(id),
            error_codes::INTERNAL_ERROR,
            format!("Internal error: {e}"),
        ),
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the MCP HTTP router serving `path`.
pub fn create_mcp_router(state: McpHttpState, path: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::WWW_AUTHENTICATE]);

    Router::new()
        .route(
            path,
            post(mcp_post)
                .get(method_not_allowed)
                .delete(method_not_allowed),
        )
        .layer(cors)
        .with_state(state)
}

/// Stateless servers have no stream to open and no session to end.
async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        Json(serde_json::json!({ "error": "Method not allowed" })),
    )
        .into_response()
}

/// JSON-RPC message handler.
async fn mcp_post(State(state): State<McpHttpState>, request: Request) -> Response {
    let ctx = McpToolContext {
        principal: request.extensions().get::<Principal>().cloned(),
    };

    let body = match to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Failed to read MCP request body");
            return rpc_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                error_codes::INVALID_REQUEST,
                "Request body too large",
            );
        }
    };

    let message: Value = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "Malformed MCP request");
            return rpc_error(
                StatusCode::BAD_REQUEST,
                error_codes::PARSE_ERROR,
                "Parse error",
            );
        }
    };

    let Some(object) = message.as_object() else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_REQUEST,
            "Invalid Request: expected a single JSON-RPC object",
        );
    };

    // Responses to server-initiated requests carry no method.
    if !object.contains_key("method")
        && (object.contains_key("result") || object.contains_key("error"))
    {
        return StatusCode::ACCEPTED.into_response();
    }

    let id = object
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

    // Only a missing id makes a notification; `null` or any other non-id
    // value is an invalid request.
    if object.contains_key("id") && id.is_none() {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_REQUEST,
            "Invalid Request: id must be a string or an integer",
        );
    }

    let request: JsonRpcRequest = match serde_json::from_value(message) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Invalid JSON-RPC request");
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_REQUEST,
                    "Invalid Request",
                )),
            )
                .into_response();
        }
    };

    match state.handle_request(request, &ctx).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn rpc_error(status: StatusCode, code: i64, message: &str) -> Response {
    (status, Json(JsonRpcResponse::error(None, code, message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serve::{ClosureExecutor, McpServerToolBuilder};
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    fn create_test_state() -> McpHttpState {
        let echo = McpServerToolBuilder::new("echo")
            .title("Echo")
            .description("Echo the input")
            .parameters(serde_json::json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                }
            }))
            .build(ClosureExecutor::new(|args, _ctx| {
                let msg = args
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("no message");
                Ok(Value::String(msg.to_string()))
            }));
        let whoami = McpServerToolBuilder::new("whoami")
            .description("Report the caller")
            .build(ClosureExecutor::new(|_, ctx| {
                ctx.principal
                    .as_ref()
                    .map(|p| serde_json::json!({ "client_id": p.client_id }))
                    .ok_or_else(|| "not authenticated".to_string())
            }));

        McpHttpState::new("test-server", "1.0.0", [echo, whoami])
            .with_instructions("Test instructions")
    }

    async fn post_json(router: Router, body: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_handle_initialize() {
        let state = create_test_state();
        let response = state
            .handle_request(
                JsonRpcRequest::new(1, "initialize", None),
                &McpToolContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(response.id, Some(RequestId::Number(1)));
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "test-server");
        assert_eq!(result["serverInfo"]["version"], "1.0.0");
        assert_eq!(result["instructions"], "Test instructions");
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_initialize_echoes_supported_version() {
        let state = create_test_state();
        let ctx = McpToolContext::default();

        let response = state
            .handle_request(
                JsonRpcRequest::new(
                    1,
                    "initialize",
                    Some(serde_json::json!({"protocolVersion": "2024-11-05"})),
                ),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(response.result.unwrap()["protocolVersion"], "2024-11-05");

        let response = state
            .handle_request(
                JsonRpcRequest::new(
                    2,
                    "initialize",
                    Some(serde_json::json!({"protocolVersion": "1999-01-01"})),
                ),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(response.result.unwrap()["protocolVersion"], PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_handle_list_tools() {
        let state = create_test_state();
        let response = state
            .handle_request(
                JsonRpcRequest::new("list", "tools/list", None),
                &McpToolContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(response.id, Some(RequestId::String("list".to_string())));
        let tools = response.result.unwrap()["tools"].clone();
        let tools = tools.as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["name"], "echo");
        assert_eq!(tools[0]["title"], "Echo");
        assert_eq!(tools[0]["inputSchema"]["type"], "object");
        assert_eq!(tools[1]["name"], "whoami");
        assert!(tools[1].get("title").is_none());
    }

    #[tokio::test]
    async fn test_handle_call_tool() {
        let state = create_test_state();
        let response = state
            .handle_request(
                JsonRpcRequest::new(
                    3,
                    "tools/call",
                    Some(serde_json::json!({
                        "name": "echo",
                        "arguments": { "message": "Hello, World!" }
                    })),
                ),
                &McpToolContext::default(),
            )
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "Hello, World!");
        assert!(result.get("structuredContent").is_none());
    }

    #[tokio::test]
    async fn test_call_tool_error_result() {
        let state = create_test_state();
        let response = state
            .handle_request(
                JsonRpcRequest::new(
                    4,
                    "tools/call",
                    Some(serde_json::json!({ "name": "whoami" })),
                ),
                &McpToolContext::default(),
            )
            .await
            .unwrap();

        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "not authenticated");
    }

    #[tokio::test]
    async fn test_handle_unknown_method() {
        let state = create_test_state();
        let response = state
            .handle_request(
                JsonRpcRequest::new(5, "unknown/method", None),
                &McpToolContext::default(),
            )
            .await
            .unwrap();

        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_call_unknown_tool_and_missing_params() {
        let state = create_test_state();
        let ctx = McpToolContext::default();

        let response = state
            .handle_request(
                JsonRpcRequest::new(
                    6,
                    "tools/call",
                    Some(serde_json::json!({ "name": "missing" })),
                ),
                &ctx,
            )
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::INVALID_PARAMS);
        assert!(error.message.contains("missing"));

        let response = state
            .handle_request(JsonRpcRequest::new(7, "tools/call", None), &ctx)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_notification_returns_none() {
        let state = create_test_state();
        let response = state
            .handle_request(
                JsonRpcRequest::notification("notifications/initialized", None),
                &McpToolContext::default(),
            )
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_router_request_and_ping() {
        let router = create_mcp_router(create_test_state(), "/mcp");
        let (status, body) =
            post_json(router, r#"{"jsonrpc":"2.0","id":"p-1","method":"ping"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "p-1");
        assert_eq!(body["result"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_router_parse_error() {
        let router = create_mcp_router(create_test_state(), "/mcp");
        let (status, body) = post_json(router, "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["id"].is_null());
        assert_eq!(body["error"]["code"], error_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_router_invalid_request() {
        let router = create_mcp_router(create_test_state(), "/mcp");
        let (status, body) = post_json(router, r#"{"jsonrpc":"2.0","id":9,"method":42}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["id"], 9);
        assert_eq!(body["error"]["code"], error_codes::INVALID_REQUEST);

        let router = create_mcp_router(create_test_state(), "/mcp");
        let (status, body) = post_json(router, "[]").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_router_notification_and_client_response_accepted() {
        let router = create_mcp_router(create_test_state(), "/mcp");
        let (status, body) = post_json(
            router,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body.is_null());

        let router = create_mcp_router(create_test_state(), "/mcp");
        let (status, _) = post_json(router, r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_router_null_id_is_invalid_request() {
        for body in [
            r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#,
            r#"{"jsonrpc":"2.0","id":true,"method":"ping"}"#,
            r#"{"jsonrpc":"2.0","id":{"n":1},"method":"tools/list"}"#,
        ] {
            let router = create_mcp_router(create_test_state(), "/mcp");
            let (status, response) = post_json(router, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(response["error"]["code"], error_codes::INVALID_REQUEST);
            assert!(response["id"].is_null());
        }
    }

    #[tokio::test]
    async fn test_router_get_and_delete_not_allowed() {
        for method in ["GET", "DELETE"] {
            let router = create_mcp_router(create_test_state(), "/mcp");
            let response = router
                .oneshot(
                    HttpRequest::builder()
                        .method(method)
                        .uri("/mcp")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        }
    }

    #[tokio::test]
    async fn test_router_passes_principal_to_tools() {
        use chrono::Utc;
        use mcpgate_auth::UserClaims;

        let router = create_mcp_router(create_test_state(), "/mcp");
        let mut request = HttpRequest::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"whoami"}}"#,
            ))
            .unwrap();
        request.extensions_mut().insert(Principal {
            client_id: "client-7".to_string(),
            scopes: vec!["openid".to_string()],
            resource: "http://host/mcp".to_string(),
            claims: UserClaims::default(),
            expires_at: Utc::now(),
        });

        let response = router.oneshot(request).await.unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["result"]["isError"], false);
        assert_eq!(body["result"]["structuredContent"]["client_id"], "client-7");
    }

    #[test]
    fn test_success_result_text_forms() {
        let result = success_result(Value::String("plain".to_string()));
        assert_eq!(result.text(), "plain");
        assert!(result.structured_content.is_none());

        let result = success_result(serde_json::json!({"result": 6.0}));
        assert_eq!(result.text(), r#"{"result":6.0}"#);
        assert!(result.structured_content.is_some());
        assert_eq!(result.json(), Some(serde_json::json!({"result": 6.0})));
    }
}
