//! Pre-wired facades and helpers for driving the OAuth flow in tests.

use crate::upstream::FakeUpstream;
use chrono::{TimeZone, Utc};
use mcpgate_auth::pkce;
use mcpgate_auth::{
    AuthResult, AuthorizeRequest, CallbackParams, FacadeConfig, MemoryStore, OAuthFacade,
    RegistrationRequest, TokenRequest, TokenResponse, UpstreamRedirect,
};
use mcpgate_util::ManualClock;
use std::sync::Arc;

/// Base URL of the facade under test.
pub const TEST_BASE_URL: &str = "http://host";

/// Resource indicator of the facade under test.
pub const TEST_RESOURCE: &str = "http://host/mcp";

/// Redirect URI pattern registered by [`TestFacade::register`].
pub const TEST_REDIRECT_PATTERN: &str = "http://localhost:*/cb";

/// Concrete redirect URI matching [`TEST_REDIRECT_PATTERN`].
pub const TEST_REDIRECT_URI: &str = "http://localhost:4321/cb";

/// A configuration that passes validation.
pub fn test_config() -> FacadeConfig {
    let mut config = FacadeConfig {
        base_url: TEST_BASE_URL.to_string(),
        required_scopes: vec![
            "openid".to_string(),
            "email".to_string(),
            "profile".to_string(),
        ],
        ..FacadeConfig::default()
    };
    config.upstream.client_id = "google-client".to_string();
    config.upstream.client_secret = "google-secret".to_string();
    config
}

/// Read one query parameter from a URL.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let url = url::Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// A client that made it through login and holds a code.
#[derive(Debug, Clone)]
pub struct Login {
    pub client_id: String,
    pub redirect_uri: String,
    pub code_verifier: String,
    pub code: String,
}

impl Login {
    /// Token request redeeming this login's code.
    pub fn token_request(&self) -> TokenRequest {
        TokenRequest {
            grant_type: Some("authorization_code".to_string()),
            code: Some(self.code.clone()),
            redirect_uri: Some(self.redirect_uri.clone()),
            client_id: Some(self.client_id.clone()),
            code_verifier: Some(self.code_verifier.clone()),
            ..TokenRequest::default()
        }
    }
}

/// A facade backed by a memory store, a fake upstream and a manual clock.
pub struct TestFacade {
    pub facade: OAuthFacade,
    pub store: Arc<MemoryStore>,
    pub upstream: FakeUpstream,
    pub clock: ManualClock,
}

impl Default for TestFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFacade {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: FacadeConfig) -> Self {
        Self::with_parts(config, FakeUpstream::new())
    }

    pub fn with_parts(config: FacadeConfig, upstream: FakeUpstream) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap());
        let facade = OAuthFacade::new(
            config,
            store.clone(),
            Arc::new(upstream.clone()),
            Arc::new(clock.clone()),
        )
        .expect("test config is valid");
        Self {
            facade,
            store,
            upstream,
            clock,
        }
    }

    /// Register a client with the given redirect URIs.
    pub async fn register(&self, redirect_uris: &[&str]) -> String {
        self.facade
            .register(RegistrationRequest {
                redirect_uris: redirect_uris.iter().map(|s| s.to_string()).collect(),
                client_name: Some("test client".to_string()),
                ..RegistrationRequest::default()
            })
            .await
            .expect("registration succeeds")
            .client_id
    }

    /// An S256 authorization request with a fresh verifier.
    pub fn authorize_request(&self, client_id: &str) -> (AuthorizeRequest, String) {
        let verifier = pkce::generate_code_verifier();
        let request = AuthorizeRequest {
            response_type: Some("code".to_string()),
            client_id: Some(client_id.to_string()),
            redirect_uri: Some(TEST_REDIRECT_URI.to_string()),
            code_challenge: Some(pkce::code_challenge(&verifier)),
            code_challenge_method: Some("S256".to_string()),
            scope: Some("openid email".to_string()),
            resource: Some(TEST_RESOURCE.to_string()),
            state: Some("client-state".to_string()),
        };
        (request, verifier)
    }

    /// Simulate the user approving the login upstream.
    pub async fn approve(&self, redirect: &UpstreamRedirect) -> AuthResult<String> {
        self.facade
            .callback(CallbackParams {
                code: Some(format!("upstream-code-for-{}", redirect.state_token)),
                state: Some(redirect.state_token.clone()),
                ..CallbackParams::default()
            })
            .await
    }

    /// Register, authorize and approve; returns the client's code.
    pub async fn login(&self) -> Login {
        let client_id = self.register(&[TEST_REDIRECT_PATTERN]).await;
        self.login_as(&client_id).await
    }

    /// Authorize and approve for an existing client.
    pub async fn login_as(&self, client_id: &str) -> Login {
        let (request, code_verifier) = self.authorize_request(client_id);
        let redirect = self
            .facade
            .authorize(request)
            .await
            .expect("authorization succeeds");
        let location = self.approve(&redirect).await.expect("callback succeeds");
        Login {
            client_id: client_id.to_string(),
            redirect_uri: TEST_REDIRECT_URI.to_string(),
            code_verifier,
            code: query_param(&location, "code").expect("redirect carries a code"),
        }
    }

    /// Full login followed by a successful code exchange.
    pub async fn issue_token(&self) -> (Login, TokenResponse) {
        let login = self.login().await;
        let response = self
            .facade
            .token(login.token_request())
            .await
            .expect("token exchange succeeds");
        (login, response)
    }
}
