//! Loopback listener for OAuth redirects.
//!
//! Binds an ephemeral port on the loopback host, hands out the matching
//! redirect URI and delivers the authorization code to whoever is waiting
//! on the `state` it was issued for.

use crate::error::{McpError, McpResult};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

/// Path of the redirect URI.
pub const CALLBACK_PATH: &str = "/callback";

/// HTML response for successful authorization.
const HTML_SUCCESS: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>mcpgate - Authorization Successful</title>
  <style>
    body { font-family: system-ui, -apple-system, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; }
    .container { text-align: center; padding: 2rem; }
    h1 { color: #15803d; margin-bottom: 1rem; }
  </style>
</head>
<body>
  <div class="container">
    <h1>Authorization Successful</h1>
    <p>You can close this window and return to the terminal.</p>
  </div>
  <script>setTimeout(() => window.close(), 2000);</script>
</body>
</html>"#;

/// HTML response for failed authorization.
fn html_error(error: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>mcpgate - Authorization Failed</title>
  <style>
    body {{ font-family: system-ui, -apple-system, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; }}
    .container {{ text-align: center; padding: 2rem; }}
    h1 {{ color: #b91c1c; margin-bottom: 1rem; }}
    .error {{ font-family: monospace; margin-top: 1rem; }}
  </style>
</head>
<body>
  <div class="container">
    <h1>Authorization Failed</h1>
    <div class="error">{}</div>
  </div>
</body>
</html>"#,
        html_escape(error)
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

type CallbackResult = Result<String, String>;

/// Waiters keyed by the `state` they were issued.
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<CallbackResult>>>>;

/// A running loopback listener. Stops when dropped.
pub struct CallbackServer {
    redirect_uri: String,
    pending: Pending,
    shutdown: Option<oneshot::Sender<()>>,
}

impl CallbackServer {
    /// Bind an ephemeral port on `host` and start serving.
    pub async fn start(host: &str) -> McpResult<Self> {
        let listener = TcpListener::bind((host, 0)).await.map_err(|e| {
            McpError::connection_failed(format!("Failed to bind OAuth callback listener on {host}: {e}"))
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| McpError::connection_failed(format!("OAuth callback listener: {e}")))?
            .port();
        let redirect_uri = format!("http://{host}:{port}{CALLBACK_PATH}");

        let pending: Pending = Arc::default();
        let app = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(pending.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                warn!(error = %e, "OAuth callback listener failed");
            }
            debug!("OAuth callback listener stopped");
        });

        info!(redirect_uri = %redirect_uri, "OAuth callback listener started");
        Ok(Self {
            redirect_uri,
            pending,
            shutdown: Some(shutdown_tx),
        })
    }

    /// Redirect URI to register and send with the authorization request.
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Start waiting for the redirect that carries `state`.
    ///
    /// Call this before sending the user off, so an early redirect is not
    /// mistaken for a forged one.
    pub async fn expect(&self, state: &str) -> PendingCallback {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(state.to_string(), tx);
        PendingCallback {
            state: state.to_string(),
            rx,
            pending: self.pending.clone(),
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl std::fmt::Debug for CallbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackServer")
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

/// A login waiting for its redirect.
#[derive(Debug)]
pub struct PendingCallback {
    state: String,
    rx: oneshot::Receiver<CallbackResult>,
    pending: Pending,
}

impl PendingCallback {
    /// Wait for the authorization code.
    pub async fn wait(self, timeout: Duration) -> McpResult<String> {
        let Self { state, rx, pending } = self;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(code))) => Ok(code),
            Ok(Ok(Err(error))) => Err(McpError::AuthFailed(error)),
            Ok(Err(_)) => {
                pending.lock().await.remove(&state);
                Err(McpError::auth_failed("Authorization cancelled"))
            }
            Err(_) => {
                pending.lock().await.remove(&state);
                Err(McpError::auth_failed(
                    "OAuth callback timeout - authorization took too long",
                ))
            }
        }
    }
}

async fn handle_callback(
    State(pending): State<Pending>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<String>) {
    debug!(
        has_code = params.contains_key("code"),
        error = ?params.get("error"),
        "Received OAuth callback"
    );

    let Some(state) = params.get("state") else {
        warn!("OAuth callback missing state parameter");
        return (
            StatusCode::BAD_REQUEST,
            Html(html_error("Missing required state parameter")),
        );
    };

    let Some(sender) = pending.lock().await.remove(state) else {
        warn!("OAuth callback with unknown state");
        return (
            StatusCode::BAD_REQUEST,
            Html(html_error("Invalid or expired state parameter")),
        );
    };

    if let Some(error) = params.get("error") {
        let message = match params.get("error_description") {
            Some(description) => format!("{error}: {description}"),
            None => error.clone(),
        };
        let _ = sender.send(Err(message.clone()));
        return (StatusCode::OK, Html(html_error(&message)));
    }

    match params.get("code") {
        Some(code) => {
            let _ = sender.send(Ok(code.clone()));
            (StatusCode::OK, Html(HTML_SUCCESS.to_string()))
        }
        None => {
            let message = "No authorization code provided";
            let _ = sender.send(Err(message.to_string()));
            (StatusCode::BAD_REQUEST, Html(html_error(message)))
        }
    }
}
