//! OAuth support for connecting to protected MCP servers.
//!
//! Implements the client side of the MCP authorization flow: discovery from
//! a `401` challenge (RFC 9728, RFC 8414), dynamic client registration
//! (RFC 7591), an S256 PKCE login through a loopback redirect, the code
//! exchange and refresh. Every authorization and token request carries the
//! resource indicator (RFC 8707) advertised by the protected resource.

use crate::callback::CallbackServer;
use crate::error::{McpError, McpResult};
use mcpgate_auth::config::{AUTHORIZATION_SERVER_METADATA_PATH, PROTECTED_RESOURCE_METADATA_PATH};
use mcpgate_auth::pkce;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Timeout for discovery, registration and token requests.
pub const OAUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the user to finish logging in.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Parameters of a `Bearer` challenge from a `WWW-Authenticate` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerChallenge {
    pub error: Option<String>,
    pub error_description: Option<String>,
    /// URL of the protected resource metadata document.
    pub resource_metadata: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    /// Parse a `Bearer` challenge. Other schemes yield `None`.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut challenge = Self::default();
        for (name, value) in auth_params(params) {
            match name.to_ascii_lowercase().as_str() {
                "error" => challenge.error = Some(value),
                "error_description" => challenge.error_description = Some(value),
                "resource_metadata" => challenge.resource_metadata = Some(value),
                "scope" => challenge.scope = Some(value),
                _ => {}
            }
        }
        Some(challenge)
    }
}

/// Split `name=value, name="quoted value"` auth parameters.
fn auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| *c == ',' || c.is_whitespace()).is_some() {}

        let mut name = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && *c != ',' && !c.is_whitespace()) {
            name.push(c);
        }
        if name.is_empty() {
            break;
        }

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next_if_eq(&'=').is_none() {
            continue;
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',' && !c.is_whitespace()) {
                value.push(c);
            }
        }
        params.push((name, value));
    }

    params
}

fn parse_url(value: &str) -> McpResult<Url> {
    Url::parse(value).map_err(|e| McpError::protocol_error(format!("Invalid URL '{value}': {e}")))
}

/// Well-known URL `prefix` inserted between the origin and the path of `url`.
fn well_known_url(url: &str, prefix: &str) -> McpResult<String> {
    let parsed = parse_url(url)?;
    let path = parsed.path().trim_end_matches('/');
    Ok(format!(
        "{}{}{}",
        parsed.origin().ascii_serialization(),
        prefix,
        path
    ))
}

/// Default metadata URL of a protected resource (RFC 9728 §3.1), used when
/// the challenge does not name one.
pub fn protected_resource_metadata_url(resource: &str) -> McpResult<String> {
    well_known_url(resource, PROTECTED_RESOURCE_METADATA_PATH)
}

/// Metadata URL of an authorization server (RFC 8414 §3.1).
pub fn authorization_server_metadata_url(issuer: &str) -> McpResult<String> {
    well_known_url(issuer, AUTHORIZATION_SERVER_METADATA_PATH)
}

/// Protected resource metadata, as far as a client needs it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResourceMetadata {
    pub resource: String,
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

/// Authorization server metadata, as far as a client needs it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

impl ServerMetadata {
    /// Servers that list challenge methods must list S256.
    pub fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported.is_empty()
            || self
                .code_challenge_methods_supported
                .iter()
                .any(|m| m == "S256")
    }
}

/// Client metadata sent to the registration endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ClientRegistration {
    pub redirect_uris: Vec<String>,
    pub client_name: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl ClientRegistration {
    /// A public client using one loopback redirect URI.
    pub fn public(client_name: &str, redirect_uri: &str, scope: Option<String>) -> Self {
        Self {
            redirect_uris: vec![redirect_uri.to_string()],
            client_name: client_name.to_string(),
            grant_types: vec!["authorization_code".to_string(), "refresh_token".to_string()],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: "none".to_string(),
            scope,
        }
    }
}

/// Client information returned by dynamic registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_issued_at: Option<u64>,
}

/// OAuth tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Build the authorization URL the user is sent to.
pub fn build_auth_url(
    auth_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: Option<&str>,
    state: &str,
    code_challenge: &str,
    resource: &str,
) -> String {
    let separator = if auth_endpoint.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{}{}response_type=code&client_id={}&redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256&resource={}",
        auth_endpoint,
        separator,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(state),
        urlencoding::encode(code_challenge),
        urlencoding::encode(resource),
    );

    if let Some(scope) = scope {
        url.push_str(&format!("&scope={}", urlencoding::encode(scope)));
    }

    url
}

/// Sends the user to an authorization URL.
pub type UrlOpener = Arc<dyn Fn(&str) -> McpResult<()> + Send + Sync>;

/// Options for an interactive login.
#[derive(Clone)]
pub struct LoginOptions {
    /// Name registered for this client.
    pub client_name: String,
    /// Scopes to request; defaults to what the resource advertises.
    pub scopes: Option<Vec<String>>,
    /// Host of the loopback redirect URI.
    pub callback_host: String,
    /// How long to wait for the redirect back.
    pub timeout: Duration,
    pub open_url: UrlOpener,
}

impl LoginOptions {
    pub fn new(open_url: impl Fn(&str) -> McpResult<()> + Send + Sync + 'static) -> Self {
        Self {
            client_name: "mcpgate client".to_string(),
            scopes: None,
            callback_host: "localhost".to_string(),
            timeout: LOGIN_TIMEOUT,
            open_url: Arc::new(open_url),
        }
    }
}

impl std::fmt::Debug for LoginOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginOptions")
            .field("client_name", &self.client_name)
            .field("scopes", &self.scopes)
            .field("callback_host", &self.callback_host)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// The outcome of a login against one protected resource.
#[derive(Debug, Clone)]
pub struct OAuthSession {
    /// Resource indicator the tokens are bound to.
    pub resource: String,
    pub server: ServerMetadata,
    pub client: ClientInfo,
    pub tokens: OAuthTokens,
}

impl OAuthSession {
    pub fn access_token(&self) -> &str {
        &self.tokens.access_token
    }

    pub fn can_refresh(&self) -> bool {
        self.tokens.refresh_token.is_some()
    }
}

/// HTTP client for the OAuth endpoints of an MCP server.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new() -> McpResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(OAUTH_TIMEOUT)
            .build()
            .map_err(|e| McpError::connection_failed(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Fetch the protected resource metadata document.
    pub async fn fetch_resource_metadata(&self, url: &str) -> McpResult<ResourceMetadata> {
        self.get_json(url, "protected resource metadata").await
    }

    /// Fetch the metadata of an authorization server.
    pub async fn fetch_server_metadata(&self, issuer: &str) -> McpResult<ServerMetadata> {
        let url = authorization_server_metadata_url(issuer)?;
        let metadata: ServerMetadata = self.get_json(&url, "authorization server metadata").await?;
        // RFC 8414 §3.3: the document must be about the issuer that was asked for.
        if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
            return Err(McpError::auth_failed(format!(
                "Authorization server metadata names issuer '{}', expected '{issuer}'",
                metadata.issuer
            )));
        }
        Ok(metadata)
    }

    /// Register a client (RFC 7591).
    pub async fn register(
        &self,
        registration_endpoint: &str,
        registration: &ClientRegistration,
    ) -> McpResult<ClientInfo> {
        let response = self
            .http
            .post(registration_endpoint)
            .json(registration)
            .send()
            .await
            .map_err(|e| McpError::auth_failed(format!("Registration request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::auth_failed(format!(
                "Client registration failed ({status}): {text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| McpError::auth_failed(format!("Invalid registration response: {e}")))
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        token_endpoint: &str,
        client: &ClientInfo,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
        resource: &str,
    ) -> McpResult<OAuthTokens> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client.client_id.as_str()),
            ("code_verifier", code_verifier),
            ("resource", resource),
        ];
        if let Some(secret) = client.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        self.post_token(token_endpoint, &params, "Token exchange").await
    }

    /// Refresh tokens using a refresh token.
    pub async fn refresh_tokens(
        &self,
        token_endpoint: &str,
        client: &ClientInfo,
        refresh_token: &str,
        resource: &str,
    ) -> McpResult<OAuthTokens> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client.client_id.as_str()),
            ("resource", resource),
        ];
        if let Some(secret) = client.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        self.post_token(token_endpoint, &params, "Token refresh").await
    }

    /// Run the whole login for the MCP server at `mcp_url`.
    ///
    /// `challenge` is the server's `401` challenge, if one was received.
    pub async fn login(
        &self,
        mcp_url: &str,
        challenge: Option<&BearerChallenge>,
        options: &LoginOptions,
    ) -> McpResult<OAuthSession> {
        let metadata_url = match challenge.and_then(|c| c.resource_metadata.clone()) {
            Some(url) => url,
            None => protected_resource_metadata_url(mcp_url)?,
        };
        let resource = self.fetch_resource_metadata(&metadata_url).await?;
        if resource.resource != mcp_url {
            warn!(
                requested = %mcp_url,
                advertised = %resource.resource,
                "Protected resource identifies itself by a different URL"
            );
        }

        let issuer = resource.authorization_servers.first().ok_or_else(|| {
            McpError::auth_failed("Protected resource metadata names no authorization server")
        })?;
        let server = self.fetch_server_metadata(issuer).await?;
        if !server.supports_s256() {
            return Err(McpError::auth_failed(
                "Authorization server does not support S256 PKCE",
            ));
        }
        let registration_endpoint = server.registration_endpoint.clone().ok_or_else(|| {
            McpError::auth_failed("Authorization server does not support dynamic client registration")
        })?;

        let scopes = match &options.scopes {
            Some(scopes) => scopes.clone(),
            None if !resource.scopes_supported.is_empty() => resource.scopes_supported.clone(),
            None => server.scopes_supported.clone(),
        };
        let scope = (!scopes.is_empty()).then(|| scopes.join(" "));

        let callback = CallbackServer::start(&options.callback_host).await?;
        let redirect_uri = callback.redirect_uri().to_string();

        let client = self
            .register(
                &registration_endpoint,
                &ClientRegistration::public(&options.client_name, &redirect_uri, scope.clone()),
            )
            .await?;
        info!(client_id = %client.client_id, issuer = %server.issuer, "Registered OAuth client");

        let code_verifier = pkce::generate_code_verifier();
        let state = pkce::generate_token();
        let pending = callback.expect(&state).await;
        let auth_url = build_auth_url(
            &server.authorization_endpoint,
            &client.client_id,
            &redirect_uri,
            scope.as_deref(),
            &state,
            &pkce::code_challenge(&code_verifier),
            &resource.resource,
        );
        (options.open_url)(&auth_url)?;

        let code = pending.wait(options.timeout).await?;
        drop(callback);
        debug!(client_id = %client.client_id, "Received authorization code");

        let tokens = self
            .exchange_code(
                &server.token_endpoint,
                &client,
                &code,
                &redirect_uri,
                &code_verifier,
                &resource.resource,
            )
            .await?;
        info!(client_id = %client.client_id, resource = %resource.resource, "Obtained OAuth tokens");

        Ok(OAuthSession {
            resource: resource.resource,
            server,
            client,
            tokens,
        })
    }

    /// Replace the session's tokens using its refresh token.
    pub async fn refresh(&self, session: &mut OAuthSession) -> McpResult<()> {
        let refresh_token = session
            .tokens
            .refresh_token
            .clone()
            .ok_or_else(|| McpError::auth_failed("No refresh token available"))?;
        let mut tokens = self
            .refresh_tokens(
                &session.server.token_endpoint,
                &session.client,
                &refresh_token,
                &session.resource,
            )
            .await?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token);
        }
        session.tokens = tokens;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> McpResult<T> {
        debug!(url = %url, "Fetching {what}");
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| McpError::auth_failed(format!("Failed to fetch {what}: {e}")))?;

        if !response.status().is_success() {
            return Err(McpError::auth_failed(format!(
                "Failed to fetch {what} from {url}: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| McpError::auth_failed(format!("Invalid {what}: {e}")))
    }

    async fn post_token(
        &self,
        token_endpoint: &str,
        params: &[(&str, &str)],
        what: &str,
    ) -> McpResult<OAuthTokens> {
        let response = self
            .http
            .post(token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| McpError::auth_failed(format!("{what} request failed: {e}")))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::auth_failed(format!("{what} failed: {text}")));
        }

        response
            .json()
            .await
            .map_err(|e| McpError::auth_failed(format!("Invalid token response: {e}")))
    }
}
