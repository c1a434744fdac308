//! Facade configuration.
//!
//! Configuration is assembled from, in increasing priority:
//! 1. Built-in defaults (a local server on port 8005 delegating to Google)
//! 2. An optional JSON file
//! 3. Environment variables (`RS_BASE_URL`, `GOOGLE_CLIENT_ID`, ...)
//!
//! [`FacadeConfig::validate`] must pass before the server starts; a missing
//! upstream credential is fatal.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Google's OAuth 2.0 authorization endpoint.
pub const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Google's token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Google's OpenID Connect userinfo endpoint.
pub const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
/// Google's tokeninfo endpoint.
pub const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Path of the protected resource metadata document (RFC 9728).
pub const PROTECTED_RESOURCE_METADATA_PATH: &str = "/.well-known/oauth-protected-resource";
/// Path of the authorization server metadata document (RFC 8414).
pub const AUTHORIZATION_SERVER_METADATA_PATH: &str = "/.well-known/oauth-authorization-server";

pub const AUTHORIZE_PATH: &str = "/authorize";
pub const TOKEN_PATH: &str = "/token";
pub const REGISTER_PATH: &str = "/register";
pub const REVOKE_PATH: &str = "/revoke";

/// Upstream OAuth provider settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Client id registered with the upstream provider.
    pub client_id: String,
    /// Client secret registered with the upstream provider.
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub tokeninfo_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            authorize_url: GOOGLE_AUTHORIZE_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            tokeninfo_url: GOOGLE_TOKENINFO_URL.to_string(),
        }
    }
}

// The secret never reaches logs.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &if self.client_secret.is_empty() {
                    "<unset>"
                } else {
                    "<redacted>"
                },
            )
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("tokeninfo_url", &self.tokeninfo_url)
            .finish()
    }
}

/// Upper bound for any configured lifetime (one year).
pub const MAX_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// Lifetimes of the facade's short-lived artifacts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    /// In-flight authorization requests.
    pub authorization_secs: i64,
    /// Client-facing authorization codes.
    pub code_secs: i64,
    /// Access tokens handed to clients.
    pub access_token_secs: i64,
    /// Refresh tokens handed to clients.
    pub refresh_token_secs: i64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            authorization_secs: 10 * 60,
            code_secs: 60,
            access_token_secs: 60 * 60,
            refresh_token_secs: 30 * 24 * 60 * 60,
        }
    }
}

/// Main facade configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FacadeConfig {
    /// Public base URL of this server, e.g. `http://localhost:8005`.
    pub base_url: String,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Mount path of the protected MCP endpoint.
    pub mcp_path: String,
    /// Callback path registered with the upstream provider.
    pub redirect_path: String,
    /// Scopes requested from the upstream provider and advertised to clients.
    pub required_scopes: Vec<String>,
    /// Redirect URI patterns clients may register.
    pub allowed_client_redirect_uris: Vec<String>,
    /// Re-check the upstream credential on every protected request.
    pub revalidate_upstream: bool,
    /// Human-readable resource name for the metadata document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    pub upstream: UpstreamConfig,
    pub ttl: TtlConfig,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8005".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8005,
            mcp_path: "/mcp".to_string(),
            redirect_path: "/auth/callback".to_string(),
            required_scopes: vec![
                "openid".to_string(),
                "https://www.googleapis.com/auth/userinfo.email".to_string(),
                "https://www.googleapis.com/auth/userinfo.profile".to_string(),
            ],
            allowed_client_redirect_uris: vec![
                "http://localhost:*".to_string(),
                "http://127.0.0.1:*".to_string(),
            ],
            revalidate_upstream: true,
            resource_name: Some("MCP RS with Google OAuth".to_string()),
            upstream: UpstreamConfig::default(),
            ttl: TtlConfig::default(),
        }
    }
}

impl FacadeConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Load a JSON file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from an environment-like lookup.
    ///
    /// Empty values are ignored so an exported-but-blank variable does not
    /// wipe out a file setting.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RS_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = get("RS_HOST") {
            self.host = v;
        }
        if let Some(v) = get("RS_PORT") {
            match v.parse() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!(value = %v, "Ignoring invalid RS_PORT"),
            }
        }
        if let Some(v) = get("MCP_PATH") {
            self.mcp_path = v;
        }
        if let Some(v) = get("GOOGLE_CLIENT_ID") {
            self.upstream.client_id = v;
        }
        if let Some(v) = get("GOOGLE_CLIENT_SECRET") {
            self.upstream.client_secret = v;
        }
        if let Some(v) = get("GOOGLE_REDIRECT_PATH") {
            self.redirect_path = v;
        }
        if let Some(v) = get("REQUIRED_SCOPES") {
            self.required_scopes = v.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = get("ALLOWED_CLIENT_REDIRECT_URIS") {
            self.allowed_client_redirect_uris = v
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("MCPGATE_REVALIDATE_UPSTREAM") {
            match parse_bool(&v) {
                Some(b) => self.revalidate_upstream = b,
                None => tracing::warn!(value = %v, "Ignoring invalid MCPGATE_REVALIDATE_UPSTREAM"),
            }
        }
    }

    /// Check that the configuration can serve requests.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.client_id.trim().is_empty() || self.upstream.client_secret.trim().is_empty()
        {
            return Err(ConfigError::MissingUpstreamCredentials);
        }

        let base = url::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url '{}': {e}", self.base_url)))?;
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            return Err(ConfigError::Invalid(format!(
                "base_url '{}' must be an absolute http(s) URL",
                self.base_url
            )));
        }
        if base.query().is_some() || base.fragment().is_some() {
            return Err(ConfigError::Invalid(
                "base_url must not carry a query or fragment".to_string(),
            ));
        }

        for (name, path) in [("mcp_path", &self.mcp_path), ("redirect_path", &self.redirect_path)] {
            if !path.starts_with('/') || path.len() < 2 {
                return Err(ConfigError::Invalid(format!(
                    "{name} '{path}' must start with '/' and name an endpoint"
                )));
            }
        }
        if self.mcp_path == self.redirect_path {
            return Err(ConfigError::Invalid(
                "mcp_path and redirect_path must differ".to_string(),
            ));
        }

        if self.required_scopes.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one upstream scope is required".to_string(),
            ));
        }
        if self.allowed_client_redirect_uris.is_empty() {
            return Err(ConfigError::Invalid(
                "allowed_client_redirect_uris must not be empty".to_string(),
            ));
        }

        let ttl = &self.ttl;
        if [
            ttl.authorization_secs,
            ttl.code_secs,
            ttl.access_token_secs,
            ttl.refresh_token_secs,
        ]
        .iter()
        .any(|&s| s <= 0 || s > MAX_TTL_SECS)
        {
            return Err(ConfigError::Invalid(format!(
                "TTLs must be between 1 and {MAX_TTL_SECS} seconds"
            )));
        }

        Ok(())
    }

    /// Issuer identifier: the base URL without a trailing slash.
    pub fn issuer(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Resource indicator of the protected MCP endpoint.
    ///
    /// Tokens are bound to this exact string.
    pub fn resource(&self) -> String {
        format!("{}{}", self.issuer(), self.mcp_path)
    }

    /// Absolute URL for a path on this server.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.issuer(), path)
    }

    /// Fixed callback URI registered with the upstream provider.
    pub fn upstream_redirect_uri(&self) -> String {
        self.endpoint(&self.redirect_path)
    }

    /// URL clients are pointed at from `WWW-Authenticate` challenges.
    pub fn protected_resource_metadata_url(&self) -> String {
        self.endpoint(PROTECTED_RESOURCE_METADATA_PATH)
    }

    /// Scopes clients may request.
    pub fn scopes_supported(&self) -> &[String] {
        &self.required_scopes
    }

    /// Socket address string to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
