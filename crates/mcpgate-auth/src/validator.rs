//! Bearer token validation for protected endpoints.

use crate::claims::UserClaims;
use crate::error::{AuthError, AuthResult, UpstreamError};
use crate::facade::OAuthFacade;
use crate::model::IssuedToken;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// The authenticated caller of a protected endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub client_id: String,
    pub scopes: Vec<String>,
    pub resource: String,
    pub claims: UserClaims,
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

impl From<&IssuedToken> for Principal {
    fn from(token: &IssuedToken) -> Self {
        Self {
            client_id: token.client_id.clone(),
            scopes: token.scopes.clone(),
            resource: token.resource.clone(),
            claims: token.claims.clone(),
            expires_at: token.expires_at,
        }
    }
}

/// Extract the token from an `Authorization` header value.
///
/// The scheme is matched case-insensitively.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn quote(value: &str) -> String {
    value.replace(['\\', '"'], "'")
}

impl OAuthFacade {
    /// Absolute URL of a path on this server, used as the resource indicator
    /// a token must be bound to.
    pub fn resource_for_path(&self, path: &str) -> String {
        self.config.endpoint(path)
    }

    /// Validate a bearer token for the resource being accessed.
    pub async fn authenticate(&self, bearer: Option<&str>, resource: &str) -> AuthResult<Principal> {
        let access_token = bearer.filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)?;

        let mut token = self
            .store
            .get_token(access_token)
            .await?
            .ok_or_else(|| AuthError::invalid_token("token is unknown or revoked"))?;

        let now = self.now();
        if token.is_expired(now) {
            self.store.remove_token(access_token).await?;
            return Err(AuthError::invalid_token("token has expired"));
        }

        if token.resource != resource {
            debug!(
                client_id = %token.client_id,
                bound = %token.resource,
                requested = %resource,
                "Token presented to a different resource"
            );
            return Err(AuthError::invalid_token(
                "token is not valid for this resource",
            ));
        }

        if self.config.revalidate_upstream {
            self.revalidate_upstream(&mut token, now).await?;
        }

        Ok(Principal::from(&token))
    }

    async fn revalidate_upstream(&self, token: &mut IssuedToken, now: DateTime<Utc>) -> AuthResult<()> {
        let result = if token.upstream.is_expired(now) {
            match token.upstream.refresh_token.clone() {
                Some(refresh_token) => match self.upstream.refresh(&refresh_token).await {
                    Ok(tokens) => {
                        token.upstream = token.upstream.refreshed(tokens, now);
                        if !self.store.replace_token(token.clone()).await? {
                            debug!(client_id = %token.client_id, "Token revoked during upstream refresh");
                            return Err(AuthError::invalid_token("token is unknown or revoked"));
                        }
                        debug!(client_id = %token.client_id, "Refreshed upstream credential");
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                None => Err(UpstreamError::TokenInvalid),
            }
        } else {
            self.upstream
                .verify_access_token(&token.upstream.access_token)
                .await
        };

        match result {
            Ok(()) => Ok(()),
            Err(UpstreamError::TokenInvalid)
            | Err(UpstreamError::Rejected {
                status: 400..=499,
                ..
            }) => {
                self.revoke_issued(token).await?;
                info!(
                    client_id = %token.client_id,
                    user = %token.claims.label(),
                    "Upstream authorization no longer valid, token revoked"
                );
                Err(AuthError::invalid_token(
                    "upstream authorization is no longer valid",
                ))
            }
            Err(e) => {
                warn!(client_id = %token.client_id, error = %e, "Could not revalidate upstream credential");
                Err(AuthError::invalid_token(
                    "upstream authorization could not be verified",
                ))
            }
        }
    }

    /// `WWW-Authenticate` value for a failed authentication.
    pub fn www_authenticate(&self, error: &AuthError) -> String {
        let metadata = self.config.protected_resource_metadata_url();
        match error.challenge_error() {
            None => format!("Bearer resource_metadata=\"{}\"", metadata),
            Some(code) => format!(
                "Bearer error=\"{}\", error_description=\"{}\", resource_metadata=\"{}\"",
                code,
                quote(&error.description()),
                metadata
            ),
        }
    }
}
