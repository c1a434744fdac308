//! Token and revocation endpoints.

use crate::error::{AuthError, AuthResult};
use crate::facade::OAuthFacade;
use crate::model::IssuedToken;
use crate::pkce;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Form body of the token endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub resource: Option<String>,
}

/// Successful token response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    fn for_token(token: &IssuedToken, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            access_token: token.access_token.clone(),
            token_type: "Bearer".to_string(),
            expires_in: token.expires_in(now),
            scope: token.scope(),
            refresh_token: token.refresh_token.clone(),
        }
    }
}

/// Form body of the revocation endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevocationRequest {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> AuthResult<&'a str> {
    value
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::invalid_request(format!("{name} is required")))
}

impl OAuthFacade {
    /// Token endpoint dispatch.
    pub async fn token(&self, request: TokenRequest) -> AuthResult<TokenResponse> {
        match required(&request.grant_type, "grant_type")? {
            "authorization_code" => self.exchange_authorization_code(&request).await,
            "refresh_token" => self.exchange_refresh_token(&request).await,
            other => Err(AuthError::UnsupportedGrantType(other.to_string())),
        }
    }

    async fn exchange_authorization_code(&self, request: &TokenRequest) -> AuthResult<TokenResponse> {
        let code = required(&request.code, "code")?;

        // Single use: the code is gone from here on, whatever the outcome.
        let grant = self
            .store
            .take_code(code)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("authorization code is invalid or already used"))?;

        let now = self.now();
        if grant.is_expired(now) {
            return Err(AuthError::invalid_grant("authorization code has expired"));
        }

        let client_id = required(&request.client_id, "client_id")?;
        if client_id != grant.client_id {
            warn!(client_id = %client_id, "Authorization code presented by a different client");
            return Err(AuthError::invalid_grant(
                "authorization code was issued to another client",
            ));
        }

        // Every authorization request fixes a redirect URI, so the exchange
        // must repeat it.
        let redirect_uri = required(&request.redirect_uri, "redirect_uri")?;
        if redirect_uri != grant.redirect_uri {
            return Err(AuthError::invalid_grant(
                "redirect_uri does not match the authorization request",
            ));
        }

        let verifier = required(&request.code_verifier, "code_verifier")?;
        if !pkce::verify(grant.code_challenge_method, &grant.code_challenge, verifier) {
            warn!(client_id = %client_id, "PKCE verification failed");
            return Err(AuthError::invalid_grant("code_verifier does not match code_challenge"));
        }

        let mut token = grant.token;
        if let Some(resource) = request.resource.as_deref() {
            if resource != token.resource {
                return Err(AuthError::InvalidTarget(format!(
                    "resource '{resource}' does not match the authorization request"
                )));
            }
        }

        // The lifetime starts now, not at callback time.
        token.expires_at = now + (token.expires_at - token.issued_at);
        token.issued_at = now;
        self.activate(&token).await?;

        info!(
            client_id = %token.client_id,
            user = %token.claims.label(),
            resource = %token.resource,
            "Issued access token"
        );
        Ok(TokenResponse::for_token(&token, now))
    }

    async fn exchange_refresh_token(&self, request: &TokenRequest) -> AuthResult<TokenResponse> {
        let refresh_token = required(&request.refresh_token, "refresh_token")?;

        let grant = self
            .store
            .take_refresh(refresh_token)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("refresh token is invalid or already used"))?;

        let now = self.now();
        if grant.is_expired(now) {
            return Err(AuthError::invalid_grant("refresh token has expired"));
        }
        if let Some(client_id) = request.client_id.as_deref() {
            if client_id != grant.client_id {
                warn!(client_id = %client_id, "Refresh token presented by a different client");
                return Err(AuthError::invalid_grant(
                    "refresh token was issued to another client",
                ));
            }
        }

        let scopes = match request.scope.as_deref().map(str::trim) {
            Some(scope) if !scope.is_empty() => {
                let requested: Vec<String> = scope.split_whitespace().map(str::to_string).collect();
                if let Some(bad) = requested.iter().find(|s| !grant.scopes.contains(s)) {
                    return Err(AuthError::InvalidScope(format!(
                        "scope '{bad}' exceeds the original grant"
                    )));
                }
                requested
            }
            _ => grant.scopes.clone(),
        };

        // Rotate: the previous access token dies with its refresh token. Its
        // upstream credential may have been refreshed since the grant was made.
        let upstream = match self.store.remove_token(&grant.access_token).await? {
            Some(previous) => previous.upstream,
            None => grant.upstream,
        };

        let token = self.mint_token(&grant.client_id, &grant.resource, scopes, upstream, grant.claims);
        self.activate(&token).await?;

        debug!(client_id = %token.client_id, "Rotated refresh token");
        Ok(TokenResponse::for_token(&token, now))
    }

    /// Revoke an access or refresh token.
    ///
    /// Unknown tokens are not an error.
    pub async fn revoke(&self, request: RevocationRequest) -> AuthResult<()> {
        let token = required(&request.token, "token")?;

        let access_first = request.token_type_hint.as_deref() != Some("refresh_token");
        if access_first && self.revoke_access_token(token).await? {
            return Ok(());
        }
        if self.revoke_refresh_token(token).await? {
            return Ok(());
        }
        if !access_first {
            self.revoke_access_token(token).await?;
        }
        Ok(())
    }

    async fn revoke_access_token(&self, token: &str) -> AuthResult<bool> {
        match self.store.get_token(token).await? {
            Some(issued) => {
                self.revoke_issued(&issued).await?;
                info!(client_id = %issued.client_id, "Revoked access token");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_refresh_token(&self, token: &str) -> AuthResult<bool> {
        match self.store.take_refresh(token).await? {
            Some(grant) => {
                self.store.remove_token(&grant.access_token).await?;
                info!(client_id = %grant.client_id, "Revoked refresh token");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
