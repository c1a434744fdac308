//! HTTP routes for the server.
//!
//! The OAuth facade endpoints are public; the MCP endpoint sits behind
//! [`bearer_guard`].

use crate::{error::ApiError, state::AppState};
use axum::{
    extract::{
        rejection::{FormRejection, JsonRejection, QueryRejection},
        Query, Request, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use mcpgate_auth::config::{
    AUTHORIZATION_SERVER_METADATA_PATH, AUTHORIZE_PATH, PROTECTED_RESOURCE_METADATA_PATH,
    REGISTER_PATH, REVOKE_PATH, TOKEN_PATH,
};
use mcpgate_auth::{
    bearer_token, AuthError, AuthorizeRequest, CallbackParams, RegistrationRequest,
    RevocationRequest, TokenRequest,
};
use mcpgate_mcp::create_mcp_router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let config = state.facade.config();
    let mcp_path = config.mcp_path.clone();
    let callback_path = config.redirect_path.clone();
    // RFC 9728 §3.1: the metadata URL may carry the resource path as a suffix.
    let resource_metadata_path = format!("{PROTECTED_RESOURCE_METADATA_PATH}{mcp_path}");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::WWW_AUTHENTICATE]);

    // The trailing-slash variant is served so that it can be refused as a
    // different resource rather than answered with 404.
    let mcp = create_mcp_router(state.mcp.clone(), &mcp_path)
        .merge(create_mcp_router(state.mcp.clone(), &format!("{mcp_path}/")))
        .layer(middleware::from_fn_with_state(state.clone(), bearer_guard));

    Router::new()
        // ===================
        // Discovery
        // ===================
        .route(PROTECTED_RESOURCE_METADATA_PATH, get(protected_resource_metadata))
        .route(&resource_metadata_path, get(protected_resource_metadata))
        .route(
            AUTHORIZATION_SERVER_METADATA_PATH,
            get(authorization_server_metadata),
        )
        // ===================
        // OAuth endpoints
        // ===================
        .route(REGISTER_PATH, post(register))
        .route(AUTHORIZE_PATH, get(authorize))
        .route(&callback_path, get(callback))
        .route(TOKEN_PATH, post(token))
        .route(REVOKE_PATH, post(revoke))
        // ===================
        // Health
        // ===================
        .route("/healthz", get(health))
        .with_state(state)
        .merge(mcp)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// A `302 Found` to `location`.
fn found(location: &str) -> Result<Response, ApiError> {
    let value = HeaderValue::from_str(location).map_err(|_| {
        AuthError::InvalidRedirectUri("redirect target is not a valid header value".to_string())
    })?;
    Ok((StatusCode::FOUND, [(header::LOCATION, value)]).into_response())
}

/// Token responses must not be cached (RFC 6749 §5.1).
fn no_store(response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

// =============================================================================
// Discovery
// =============================================================================

async fn protected_resource_metadata(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.facade.protected_resource_metadata())
}

async fn authorization_server_metadata(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.facade.authorization_server_metadata())
}

// =============================================================================
// OAuth endpoints
// =============================================================================

/// Dynamic client registration (RFC 7591).
async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| {
        AuthError::InvalidClientMetadata(format!("registration body is not valid: {}", e.body_text()))
    })?;
    let response = state.facade.register(request).await?;
    Ok(no_store((StatusCode::CREATED, Json(response))))
}

/// Authorization endpoint: validate and send the browser upstream.
async fn authorize(
    State(state): State<AppState>,
    query: Result<Query<AuthorizeRequest>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(request) = query.map_err(|e| {
        AuthError::invalid_request(format!("authorization request is not valid: {}", e.body_text()))
    })?;
    let redirect = state.facade.authorize(request).await?;
    found(&redirect.url)
}

/// Upstream callback: finish the upstream leg and send the browser back to
/// the client.
async fn callback(
    State(state): State<AppState>,
    query: Result<Query<CallbackParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = query.map_err(|e| {
        AuthError::invalid_request(format!("callback parameters are not valid: {}", e.body_text()))
    })?;
    let location = state.facade.callback(params).await?;
    found(&location)
}

async fn token(
    State(state): State<AppState>,
    body: Result<Form<TokenRequest>, FormRejection>,
) -> Result<Response, ApiError> {
    let Form(request) = body.map_err(|e| {
        AuthError::invalid_request(format!("token request must be a form: {}", e.body_text()))
    })?;
    let response = state.facade.token(request).await?;
    Ok(no_store(Json(response)))
}

/// Token revocation (RFC 7009).
async fn revoke(
    State(state): State<AppState>,
    body: Result<Form<RevocationRequest>, FormRejection>,
) -> Result<Response, ApiError> {
    let Form(request) = body.map_err(|e| {
        AuthError::invalid_request(format!("revocation request must be a form: {}", e.body_text()))
    })?;
    state.facade.revoke(request).await?;
    Ok(StatusCode::OK.into_response())
}

/// Health check endpoint.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.facade.config();
    Json(serde_json::json!({
        "status": "ok",
        "base_url": config.base_url,
        "mcp_path": config.mcp_path,
        "resource": config.resource(),
        "scopes": config.required_scopes,
    }))
}

// =============================================================================
// Bearer guard
// =============================================================================

/// Authenticate the bearer token against the resource being accessed.
///
/// The resource is this server's base URL plus the request path, so a token
/// bound to `/mcp` does not open `/mcp/`. On success the caller's
/// [`mcpgate_auth::Principal`] is left in the request extensions.
pub async fn bearer_guard(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let resource = state.facade.resource_for_path(request.uri().path());
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string);

    match state.facade.authenticate(bearer.as_deref(), &resource).await {
        Ok(principal) => {
            debug!(
                client_id = %principal.client_id,
                user = %principal.claims.label(),
                "Bearer token accepted"
            );
            request.extensions_mut().insert(principal);
            Ok(next.run(request).await)
        }
        Err(e) => {
            info!(resource = %resource, reason = %e, "Rejected MCP request");
            if e.status() != StatusCode::UNAUTHORIZED.as_u16() {
                return Err(e.into());
            }
            let challenge = state.facade.www_authenticate(&e);
            Err(ApiError::from(e).with_challenge(challenge))
        }
    }
}
