//! Tool registry types for the MCP server.
//!
//! The HTTP transport lives in `http_serve.rs`; the tools themselves in
//! `tools.rs`.

use mcpgate_auth::Principal;
use serde_json::Value;
use std::sync::Arc;

/// Tool definition for the MCP server.
#[derive(Clone)]
pub struct McpServerTool {
    /// Tool name/ID.
    pub name: String,
    /// Optional display title.
    pub title: Option<String>,
    /// Tool description.
    pub description: String,
    /// JSON Schema for parameters.
    pub parameters: Value,
    /// Tool executor.
    pub executor: Arc<dyn McpToolExecutor>,
}

impl std::fmt::Debug for McpServerTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServerTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Trait for tool execution.
///
/// Object results are also surfaced as structured content.
#[async_trait::async_trait]
pub trait McpToolExecutor: Send + Sync {
    /// Execute the tool with given arguments.
    async fn execute(&self, args: Value, ctx: &McpToolContext) -> Result<Value, String>;
}

/// Context provided to tools during execution.
#[derive(Debug, Clone, Default)]
pub struct McpToolContext {
    /// Caller authenticated by the bearer guard, if the endpoint is protected.
    pub principal: Option<Principal>,
}

impl McpToolContext {
    pub fn authenticated(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
        }
    }
}

/// Builder for McpServerTool.
pub struct McpServerToolBuilder {
    name: String,
    title: Option<String>,
    description: String,
    parameters: Value,
}

impl McpServerToolBuilder {
    /// Create a new tool builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: String::new(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the tool description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the parameters schema.
    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Build the tool with an executor.
    pub fn build(self, executor: impl McpToolExecutor + 'static) -> McpServerTool {
        McpServerTool {
            name: self.name,
            title: self.title,
            description: self.description,
            parameters: self.parameters,
            executor: Arc::new(executor),
        }
    }
}

/// Simple executor that wraps a closure.
pub struct ClosureExecutor<F>
where
    F: Fn(Value, &McpToolContext) -> Result<Value, String> + Send + Sync,
{
    f: F,
}

impl<F> ClosureExecutor<F>
where
    F: Fn(Value, &McpToolContext) -> Result<Value, String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait::async_trait]
impl<F> McpToolExecutor for ClosureExecutor<F>
where
    F: Fn(Value, &McpToolContext) -> Result<Value, String> + Send + Sync,
{
    async fn execute(&self, args: Value, ctx: &McpToolContext) -> Result<Value, String> {
        (self.f)(args, ctx)
    }
}
