//! Error types for the OAuth facade.

use thiserror::Error;

/// Result type for facade operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Result type for upstream provider calls.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Errors surfaced to OAuth clients.
///
/// Every variant maps to an OAuth `error` code via [`AuthError::code`] and an
/// HTTP status via [`AuthError::status`].
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed or missing parameters.
    #[error("{0}")]
    InvalidRequest(String),

    /// Unknown client_id.
    #[error("{0}")]
    InvalidClient(String),

    /// Redirect URI not allowed.
    #[error("{0}")]
    InvalidRedirectUri(String),

    /// Registration metadata rejected.
    #[error("{0}")]
    InvalidClientMetadata(String),

    /// Resource indicator does not name this server's protected endpoint.
    #[error("{0}")]
    InvalidTarget(String),

    /// Requested scope not available.
    #[error("{0}")]
    InvalidScope(String),

    /// `response_type` other than `code`.
    #[error("unsupported response_type: {0}")]
    UnsupportedResponseType(String),

    /// Grant type not handled by the token endpoint.
    #[error("unsupported grant_type: {0}")]
    UnsupportedGrantType(String),

    /// Authorization state unknown, expired or already consumed.
    #[error("{0}")]
    InvalidState(String),

    /// Code or refresh token unknown, expired, consumed or PKCE mismatch.
    #[error("{0}")]
    InvalidGrant(String),

    /// Upstream provider rejected the exchange or is unreachable.
    #[error("upstream provider error: {0}")]
    Upstream(#[from] UpstreamError),

    /// No bearer token on a protected request.
    #[error("authentication required")]
    MissingToken,

    /// Bearer token present but not acceptable.
    #[error("{0}")]
    InvalidToken(String),

    /// State store failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// OAuth error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidRedirectUri(_) => "invalid_redirect_uri",
            Self::InvalidClientMetadata(_) => "invalid_client_metadata",
            Self::InvalidTarget(_) => "invalid_target",
            Self::InvalidScope(_) => "invalid_scope",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::InvalidState(_) => "invalid_state",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::Upstream(_) => "upstream_error",
            Self::MissingToken | Self::InvalidToken(_) => "unauthorized",
            Self::Storage(_) => "server_error",
        }
    }

    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidClient(_) | Self::MissingToken | Self::InvalidToken(_) => 401,
            Self::Upstream(_) => 502,
            Self::Storage(_) => 500,
            _ => 400,
        }
    }

    /// Human-readable description safe to return to clients.
    ///
    /// Storage failures are not described; they are logged instead.
    pub fn description(&self) -> String {
        match self {
            Self::Storage(_) => "internal server error".to_string(),
            Self::Upstream(_) => {
                "login with the upstream provider failed, restart the authorization".to_string()
            }
            other => other.to_string(),
        }
    }

    /// The `error` attribute for a `WWW-Authenticate` challenge.
    ///
    /// `None` when the request carried no credentials at all (RFC 6750 §3.1).
    pub fn challenge_error(&self) -> Option<&'static str> {
        match self {
            Self::MissingToken => None,
            _ => Some("invalid_token"),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an invalid grant error.
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant(message.into())
    }

    /// Create an invalid token error.
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken(message.into())
    }
}

/// Errors from the upstream OAuth provider.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Network or protocol failure talking to the provider.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Provider answered with something we could not understand.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Provider says the access token is not (or no longer) valid.
    #[error("upstream token is not valid")]
    TokenInvalid,
}

/// Configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Upstream client id or secret missing.
    #[error("upstream client credentials are missing (set GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET)")]
    MissingUpstreamCredentials,

    /// A configuration value is malformed.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// IO error reading a configuration file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
