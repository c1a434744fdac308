//! Records kept by the facade.
//!
//! The client-facing leg ([`AuthorizationRequestState`]) and the upstream leg
//! ([`UpstreamExchangeState`]) of one login are separate records correlated
//! by the internal state token.

use crate::claims::UserClaims;
use crate::pkce::CodeChallengeMethod;
use crate::upstream::UpstreamTokens;
use chrono::{DateTime, Duration, Utc};
use mcpgate_util::wildcard;
use serde::{Deserialize, Serialize};

/// A dynamically registered public client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredClient {
    pub client_id: String,
    /// Redirect URI patterns; `*` matches any run of characters.
    pub redirect_uris: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// Scopes this client may request.
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl RegisteredClient {
    /// Whether `uri` matches one of the registered patterns.
    pub fn allows_redirect(&self, uri: &str) -> bool {
        wildcard::matches_any(&self.redirect_uris, uri)
    }

    /// The only registered redirect URI, if there is exactly one literal URI.
    pub fn default_redirect(&self) -> Option<&str> {
        match self.redirect_uris.as_slice() {
            [only] if wildcard::is_literal(only) => Some(only),
            _ => None,
        }
    }
}

/// One in-flight authorization attempt (client leg).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequestState {
    /// Internal state token sent to the upstream provider.
    pub state_token: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: CodeChallengeMethod,
    /// Resource indicator the client asked for.
    pub resource: String,
    pub scopes: Vec<String>,
    /// The client's own opaque `state`, echoed back on redirect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationRequestState {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The facade's own PKCE pair for the upstream leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamExchangeState {
    pub state_token: String,
    pub code_verifier: String,
    pub created_at: DateTime<Utc>,
}

/// Credential obtained from the upstream provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamCredential {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl UpstreamCredential {
    /// A lifetime too large to represent is treated as no expiry.
    pub fn from_tokens(tokens: UpstreamTokens, now: DateTime<Utc>) -> Self {
        let expires_at = tokens.expires_in.and_then(|secs| {
            i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|lifetime| now.checked_add_signed(lifetime))
        });
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at,
            scope: tokens.scope,
        }
    }

    /// Apply a refresh response. Providers may omit the refresh token on
    /// refresh, in which case the old one stays.
    pub fn refreshed(&self, tokens: UpstreamTokens, now: DateTime<Utc>) -> Self {
        let mut next = Self::from_tokens(tokens, now);
        if next.refresh_token.is_none() {
            next.refresh_token = self.refresh_token.clone();
        }
        if next.scope.is_none() {
            next.scope = self.scope.clone();
        }
        next
    }

    /// Expired credentials have no remaining lifetime; a missing expiry
    /// never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A token the facade hands to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub client_id: String,
    /// Resource indicator this token is valid for, compared byte for byte.
    pub resource: String,
    pub scopes: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub upstream: UpstreamCredential,
    pub claims: UserClaims,
    /// Refresh token issued alongside, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl IssuedToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whole seconds left, never negative.
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Space-separated scope string.
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Client-facing authorization code minted by the upstream callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationCodeGrant {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: CodeChallengeMethod,
    /// Token prepared at callback time, activated on a successful exchange.
    pub token: IssuedToken,
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationCodeGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Refresh token issued to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshGrant {
    pub refresh_token: String,
    pub client_id: String,
    pub resource: String,
    pub scopes: Vec<String>,
    /// Access token issued together with this refresh token.
    pub access_token: String,
    pub upstream: UpstreamCredential,
    pub claims: UserClaims,
    pub expires_at: DateTime<Utc>,
}

impl RefreshGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
