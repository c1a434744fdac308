//! Upstream OAuth provider adapter.
//!
//! The facade talks to the provider through [`UpstreamProvider`] so tests can
//! swap in a fake. [`GoogleProvider`] is the production implementation.

use crate::claims::UserClaims;
use crate::config::UpstreamConfig;
use crate::error::{UpstreamError, UpstreamResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout applied to every upstream HTTP call.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Token response from the upstream token endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamTokens {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Operations the facade needs from the upstream provider.
#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    /// URL to send the user's browser to.
    fn authorization_url(
        &self,
        state: &str,
        code_challenge: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> String;

    /// Exchange an upstream authorization code (server to server).
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> UpstreamResult<UpstreamTokens>;

    /// Refresh an upstream access token.
    async fn refresh(&self, refresh_token: &str) -> UpstreamResult<UpstreamTokens>;

    /// Fetch the user's claims with an upstream access token.
    async fn fetch_claims(&self, access_token: &str) -> UpstreamResult<UserClaims>;

    /// Check that the provider still accepts an access token.
    ///
    /// Returns [`UpstreamError::TokenInvalid`] when the provider rejects it.
    async fn verify_access_token(&self, access_token: &str) -> UpstreamResult<()>;
}

/// Google OAuth 2.0 / OpenID Connect provider.
pub struct GoogleProvider {
    config: UpstreamConfig,
    client: reqwest::Client,
}

impl GoogleProvider {
    /// Create a provider with its own HTTP client.
    pub fn new(config: UpstreamConfig) -> UpstreamResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()?;
        Ok(Self { config, client })
    }

    /// Create a provider sharing an existing HTTP client.
    pub fn with_client(config: UpstreamConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> UpstreamResult<UpstreamTokens> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Upstream token endpoint rejected request");
            return Err(UpstreamError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<UpstreamTokens>()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(format!("token response: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    aud: Option<String>,
    #[serde(default)]
    azp: Option<String>,
}

#[async_trait]
impl UpstreamProvider for GoogleProvider {
    fn authorization_url(
        &self,
        state: &str,
        code_challenge: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> String {
        let separator = if self.config.authorize_url.contains('?') {
            '&'
        } else {
            '?'
        };
        format!(
            "{}{}response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256&access_type=offline&prompt=consent",
            self.config.authorize_url,
            separator,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes.join(" ")),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> UpstreamResult<UpstreamTokens> {
        debug!("Exchanging upstream authorization code");
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("code_verifier", code_verifier),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> UpstreamResult<UpstreamTokens> {
        debug!("Refreshing upstream access token");
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ])
        .await
    }

    async fn fetch_claims(&self, access_token: &str) -> UpstreamResult<UserClaims> {
        let response = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<UserClaims>()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(format!("userinfo response: {e}")))
    }

    async fn verify_access_token(&self, access_token: &str) -> UpstreamResult<()> {
        let response = self
            .client
            .get(&self.config.tokeninfo_url)
            .query(&[("access_token", access_token)])
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            return Err(UpstreamError::TokenInvalid);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(format!("tokeninfo response: {e}")))?;

        // A token minted for some other Google client must not unlock this one.
        let client_id = self.config.client_id.as_str();
        let ours = info.aud.as_deref() == Some(client_id) || info.azp.as_deref() == Some(client_id);
        if !ours {
            warn!("Upstream token was issued to a different client");
            return Err(UpstreamError::TokenInvalid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> UpstreamConfig {
        UpstreamConfig {
            client_id: "google-client".to_string(),
            client_secret: "google-secret".to_string(),
            authorize_url: format!("{}/auth", server.uri()),
            token_url: format!("{}/token", server.uri()),
            userinfo_url: format!("{}/userinfo", server.uri()),
            tokeninfo_url: format!("{}/tokeninfo", server.uri()),
        }
    }

    fn provider(server: &MockServer) -> GoogleProvider {
        GoogleProvider::new(config(server)).unwrap()
    }

    #[test]
    fn test_authorization_url() {
        let provider = GoogleProvider::with_client(
            UpstreamConfig {
                client_id: "id with space".to_string(),
                ..UpstreamConfig::default()
            },
            reqwest::Client::new(),
        );
        let url = provider.authorization_url(
            "st",
            "challenge",
            "http://localhost:8005/auth/callback",
            &["openid".to_string(), "email".to_string()],
        );

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?response_type=code"));
        assert!(url.contains("client_id=id%20with%20space"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8005%2Fauth%2Fcallback"));
        assert!(url.contains("scope=openid%20email"));
        assert!(url.contains("state=st"));
        assert!(url.contains("code_challenge=challenge&code_challenge_method=S256"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=upstream-code"))
            .and(body_string_contains("code_verifier=verifier"))
            .and(body_string_contains("client_secret=google-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.token",
                "token_type": "Bearer",
                "expires_in": 3599,
                "refresh_token": "1//refresh",
                "scope": "openid email",
                "id_token": "eyJ..."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = provider(&server)
            .exchange_code("upstream-code", "verifier", "http://localhost/cb")
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "ya29.token");
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(tokens.expires_in, Some(3599));
    }

    #[tokio::test]
    async fn test_exchange_code_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .exchange_code("bad", "verifier", "http://localhost/cb")
            .await
            .unwrap_err();

        match err {
            UpstreamError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_code_garbage_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .exchange_code("code", "verifier", "http://localhost/cb")
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=1%2F%2Frefresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.new",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;

        let tokens = provider(&server).refresh("1//refresh").await.unwrap();
        assert_eq!(tokens.access_token, "ya29.new");
        assert_eq!(tokens.token_type, "Bearer");
        assert!(tokens.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_fetch_claims() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer ya29.token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "1234",
                "email": "ada@example.com",
                "email_verified": true,
                "name": "Ada"
            })))
            .mount(&server)
            .await;

        let claims = provider(&server).fetch_claims("ya29.token").await.unwrap();
        assert_eq!(claims.sub.as_deref(), Some("1234"));
        assert_eq!(claims.email.as_deref(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn test_verify_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tokeninfo"))
            .and(query_param("access_token", "good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "aud": "google-client",
                "azp": "google-client",
                "expires_in": "3000"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tokeninfo"))
            .and(query_param("access_token", "foreign"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "aud": "someone-else"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tokeninfo"))
            .and(query_param("access_token", "revoked"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({
                    "error_description": "Invalid Value"
                })),
            )
            .mount(&server)
            .await;

        let provider = provider(&server);
        assert!(provider.verify_access_token("good").await.is_ok());
        assert!(matches!(
            provider.verify_access_token("foreign").await,
            Err(UpstreamError::TokenInvalid)
        ));
        assert!(matches!(
            provider.verify_access_token("revoked").await,
            Err(UpstreamError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_verify_access_token_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tokeninfo"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server).verify_access_token("t").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Rejected { status: 503, .. }));
    }
}
