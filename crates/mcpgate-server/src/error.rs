//! OAuth error responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use mcpgate_auth::AuthError;
use serde::Serialize;
use tracing::error;

/// Body of every facade error (RFC 6749 §5.2).
#[derive(Debug, Serialize)]
struct OAuthErrorBody {
    error: &'static str,
    error_description: String,
}

/// An [`AuthError`] on its way to the client.
#[derive(Debug)]
pub struct ApiError {
    error: AuthError,
    challenge: Option<String>,
}

impl ApiError {
    /// Attach a `WWW-Authenticate` challenge.
    pub fn with_challenge(mut self, challenge: String) -> Self {
        self.challenge = Some(challenge);
        self
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        Self {
            error,
            challenge: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.error, code = self.error.code(), "Request failed");
        }

        let body = OAuthErrorBody {
            error: self.error.code(),
            error_description: self.error.description(),
        };
        let mut response = (status, Json(body)).into_response();

        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if let Some(value) = self
            .challenge
            .and_then(|c| HeaderValue::from_str(&c).ok())
        {
            headers.insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}
