//! A fake upstream provider.
//!
//! Stands in for Google: it hands out predictable tokens, records every call
//! and can be told to fail or to revoke credentials.

use async_trait::async_trait;
use mcpgate_auth::error::{UpstreamError, UpstreamResult};
use mcpgate_auth::{UpstreamProvider, UpstreamTokens, UserClaims};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Authorization endpoint the fake points browsers at.
pub const FAKE_AUTHORIZE_URL: &str = "https://upstream.test/auth";

/// A recorded call to the fake.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamCall {
    Exchange {
        code: String,
        code_verifier: String,
        redirect_uri: String,
    },
    Refresh {
        refresh_token: String,
    },
    Claims {
        access_token: String,
    },
    Verify {
        access_token: String,
    },
}

#[derive(Debug)]
struct FakeState {
    issued: u32,
    expires_in: Option<u64>,
    exchange_failure: Option<u16>,
    refresh_failure: Option<u16>,
    revoked: HashSet<String>,
    claims: UserClaims,
    refresh_gate: Option<Arc<RefreshGate>>,
}

/// Holds upstream refreshes until released.
///
/// Returned by [`FakeUpstream::gate_refresh`].
#[derive(Debug, Default)]
pub struct RefreshGate {
    entered: Notify,
    release: Notify,
}

impl RefreshGate {
    /// Wait until a refresh is parked at the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let one parked refresh continue.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// An upstream provider that never leaves the process.
///
/// # Example
///
/// ```rust,ignore
/// let upstream = FakeUpstream::new().with_expires_in(Some(60));
/// // hand `Arc::new(upstream)` to the facade...
/// assert_eq!(upstream.exchange_count(), 1);
/// ```
#[derive(Clone)]
pub struct FakeUpstream {
    calls: Arc<Mutex<Vec<UpstreamCall>>>,
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            state: Arc::new(Mutex::new(FakeState {
                issued: 0,
                expires_in: Some(3600),
                exchange_failure: None,
                refresh_failure: None,
                revoked: HashSet::new(),
                claims: default_claims(),
                refresh_gate: None,
            })),
        }
    }

    /// Lifetime of issued upstream access tokens.
    pub fn with_expires_in(self, expires_in: Option<u64>) -> Self {
        self.state.lock().unwrap().expires_in = expires_in;
        self
    }

    /// Claims returned from userinfo.
    pub fn with_claims(self, claims: UserClaims) -> Self {
        self.state.lock().unwrap().claims = claims;
        self
    }

    /// Make every code exchange fail with this HTTP status.
    pub fn fail_exchange(&self, status: u16) {
        self.state.lock().unwrap().exchange_failure = Some(status);
    }

    /// Make every refresh fail with this HTTP status.
    pub fn fail_refresh(&self, status: u16) {
        self.state.lock().unwrap().refresh_failure = Some(status);
    }

    /// Park every refresh until the returned gate releases it.
    pub fn gate_refresh(&self) -> Arc<RefreshGate> {
        let gate = Arc::new(RefreshGate::default());
        self.state.lock().unwrap().refresh_gate = Some(gate.clone());
        gate
    }

    /// Revoke an upstream access or refresh token.
    pub fn revoke(&self, token: &str) {
        self.state.lock().unwrap().revoked.insert(token.to_string());
    }

    pub fn calls(&self) -> Vec<UpstreamCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn exchange_count(&self) -> usize {
        self.count(|c| matches!(c, UpstreamCall::Exchange { .. }))
    }

    pub fn refresh_count(&self) -> usize {
        self.count(|c| matches!(c, UpstreamCall::Refresh { .. }))
    }

    pub fn verify_count(&self) -> usize {
        self.count(|c| matches!(c, UpstreamCall::Verify { .. }))
    }

    fn count(&self, pred: impl Fn(&UpstreamCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: UpstreamCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn issue(&self, with_refresh: bool) -> UpstreamTokens {
        let mut state = self.state.lock().unwrap();
        state.issued += 1;
        UpstreamTokens {
            access_token: format!("upstream-access-{}", state.issued),
            token_type: "Bearer".to_string(),
            refresh_token: with_refresh.then(|| format!("upstream-refresh-{}", state.issued)),
            expires_in: state.expires_in,
            scope: Some("openid email profile".to_string()),
            id_token: None,
        }
    }
}

/// Claims of the fake's only user.
pub fn default_claims() -> UserClaims {
    UserClaims {
        sub: Some("1234567890".to_string()),
        email: Some("ada@example.com".to_string()),
        email_verified: Some(true),
        name: Some("Ada Lovelace".to_string()),
        picture: Some("https://example.com/ada.png".to_string()),
        locale: Some("en".to_string()),
        ..UserClaims::default()
    }
}

#[async_trait]
impl UpstreamProvider for FakeUpstream {
    fn authorization_url(
        &self,
        state: &str,
        code_challenge: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> String {
        format!(
            "{}?state={}&code_challenge={}&code_challenge_method=S256&redirect_uri={}&scope={}",
            FAKE_AUTHORIZE_URL,
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes.join(" ")),
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> UpstreamResult<UpstreamTokens> {
        self.record(UpstreamCall::Exchange {
            code: code.to_string(),
            code_verifier: code_verifier.to_string(),
            redirect_uri: redirect_uri.to_string(),
        });
        if let Some(status) = self.state.lock().unwrap().exchange_failure {
            return Err(UpstreamError::Rejected {
                status,
                body: r#"{"error":"invalid_grant"}"#.to_string(),
            });
        }
        Ok(self.issue(true))
    }

    async fn refresh(&self, refresh_token: &str) -> UpstreamResult<UpstreamTokens> {
        self.record(UpstreamCall::Refresh {
            refresh_token: refresh_token.to_string(),
        });
        let gate = self.state.lock().unwrap().refresh_gate.clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        {
            let state = self.state.lock().unwrap();
            if let Some(status) = state.refresh_failure {
                return Err(UpstreamError::Rejected {
                    status,
                    body: "refresh failed".to_string(),
                });
            }
            if state.revoked.contains(refresh_token) {
                return Err(UpstreamError::Rejected {
                    status: 400,
                    body: r#"{"error":"invalid_grant"}"#.to_string(),
                });
            }
        }
        Ok(self.issue(false))
    }

    async fn fetch_claims(&self, access_token: &str) -> UpstreamResult<UserClaims> {
        self.record(UpstreamCall::Claims {
            access_token: access_token.to_string(),
        });
        Ok(self.state.lock().unwrap().claims.clone())
    }

    async fn verify_access_token(&self, access_token: &str) -> UpstreamResult<()> {
        self.record(UpstreamCall::Verify {
            access_token: access_token.to_string(),
        });
        if self.state.lock().unwrap().revoked.contains(access_token) {
            return Err(UpstreamError::TokenInvalid);
        }
        Ok(())
    }
}
