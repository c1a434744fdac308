//! Built-in tools.
//!
//! The protected server exposes [`protected_tools`]; the stateless server
//! exposes [`arithmetic_tools`].

use crate::serve::{ClosureExecutor, McpServerTool, McpServerToolBuilder, McpToolContext};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

/// Tools served behind the bearer guard.
pub fn protected_tools() -> Vec<McpServerTool> {
    vec![
        McpServerToolBuilder::new("get_time")
            .description("Return current server time. Requires a valid Google access token.")
            .build(ClosureExecutor::new(|_, _| Ok(time_info(Utc::now())))),
        McpServerToolBuilder::new("get_user_info")
            .description("Return information about the authenticated Google user.")
            .build(ClosureExecutor::new(|_, ctx| user_info(ctx))),
    ]
}

/// Tools served by the unauthenticated stateless server.
pub fn arithmetic_tools() -> Vec<McpServerTool> {
    vec![
        McpServerToolBuilder::new("multiply_numbers")
            .title("Multiply Numbers")
            .description("Multiply two numbers")
            .parameters(arithmetic_schema())
            .build(ClosureExecutor::new(|args, _| multiply(args))),
        McpServerToolBuilder::new("divide_numbers")
            .title("Divide Numbers")
            .description("Divide a by b")
            .parameters(arithmetic_schema())
            .build(ClosureExecutor::new(|args, _| divide(args))),
    ]
}

fn time_info(now: DateTime<Utc>) -> Value {
    json!({
        "current_time": now.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
        "timestamp": now.timestamp_micros() as f64 / 1_000_000.0,
        "timezone": "UTC",
    })
}

fn user_info(ctx: &McpToolContext) -> Result<Value, String> {
    let principal = ctx
        .principal
        .as_ref()
        .ok_or_else(|| "No authenticated user for this request".to_string())?;
    let claims = &principal.claims;
    Ok(json!({
        "google_id": claims.sub,
        "email": claims.email,
        "name": claims.name,
        "picture": claims.picture,
        "locale": claims.locale,
    }))
}

#[derive(Debug, Deserialize)]
struct ArithmeticInput {
    a: f64,
    b: f64,
}

/// Accepts `{a, b}` or the same pair wrapped in `params`.
fn arithmetic_input(args: Value) -> Result<ArithmeticInput, String> {
    let args = match args {
        Value::Object(mut map) if map.contains_key("params") && !map.contains_key("a") => {
            map.remove("params").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {e}"))
}

fn arithmetic_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "a": { "type": "number", "description": "First number" },
            "b": { "type": "number", "description": "Second number" }
        },
        "required": ["a", "b"]
    })
}

fn multiply(args: Value) -> Result<Value, String> {
    let ArithmeticInput { a, b } = arithmetic_input(args)?;
    Ok(json!({
        "result": a * b,
        "expression": format!("{} * {}", format_float(a), format_float(b)),
    }))
}

fn divide(args: Value) -> Result<Value, String> {
    let ArithmeticInput { a, b } = arithmetic_input(args)?;
    if b == 0.0 {
        return Err("Division by zero is not allowed.".to_string());
    }
    Ok(json!({
        "result": a / b,
        "expression": format!("{} / {}", format_float(a), format_float(b)),
    }))
}

/// Render a float with a trailing `.0` for whole numbers (`2.0`, not `2`).
fn format_float(value: f64) -> String {
    format!("{value:?}")
}
