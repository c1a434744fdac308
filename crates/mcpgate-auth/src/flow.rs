//! Authorization endpoint and upstream callback.
//!
//! `authorize` validates the client's request and parks it under a fresh
//! internal state token before sending the browser upstream. `callback`
//! consumes that state exactly once, exchanges the upstream code and hands
//! the client its own short-lived code.

use crate::client::validate_redirect_uri;
use crate::error::{AuthError, AuthResult};
use crate::facade::OAuthFacade;
use crate::model::{
    AuthorizationCodeGrant, AuthorizationRequestState, UpstreamCredential, UpstreamExchangeState,
};
use crate::pkce::{self, CodeChallengeMethod};
use chrono::Duration;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Query parameters of the authorization endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeRequest {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Option<String>,
    pub resource: Option<String>,
    pub state: Option<String>,
}

/// Query parameters the upstream provider sends to the callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Where to send the browser after a successful authorization request.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRedirect {
    pub url: String,
    /// Internal state token correlating the two legs.
    pub state_token: String,
}

/// Append query parameters to a client redirect URI.
fn client_redirect(redirect_uri: &str, params: &[(&str, &str)]) -> AuthResult<String> {
    let mut url = url::Url::parse(redirect_uri).map_err(|e| {
        AuthError::InvalidRedirectUri(format!("redirect_uri '{redirect_uri}' is invalid: {e}"))
    })?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok(url.into())
}

impl OAuthFacade {
    /// Validate an authorization request and start the upstream leg.
    pub async fn authorize(&self, request: AuthorizeRequest) -> AuthResult<UpstreamRedirect> {
        // 1. client
        let client_id = request
            .client_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::invalid_request("client_id is required"))?;
        let client = self
            .store
            .get_client(client_id)
            .await?
            .ok_or_else(|| AuthError::InvalidClient(format!("unknown client_id '{client_id}'")))?;

        // 2. redirect_uri
        let redirect_uri = match request.redirect_uri.as_deref() {
            Some(uri) => {
                validate_redirect_uri(uri)?;
                if !client.allows_redirect(uri) {
                    warn!(client_id = %client_id, redirect_uri = %uri, "redirect_uri not registered");
                    return Err(AuthError::InvalidRedirectUri(format!(
                        "redirect_uri '{uri}' is not registered for this client"
                    )));
                }
                uri.to_string()
            }
            None => client.default_redirect().map(str::to_string).ok_or_else(|| {
                AuthError::InvalidRedirectUri(
                    "redirect_uri is required when the client registered a pattern or several URIs"
                        .to_string(),
                )
            })?,
        };

        // 3. response_type, `code` when omitted
        if let Some(other) = request.response_type.as_deref().filter(|t| *t != "code") {
            return Err(AuthError::UnsupportedResponseType(other.to_string()));
        }

        // 4. PKCE
        let code_challenge = request
            .code_challenge
            .ok_or_else(|| AuthError::invalid_request("code_challenge is required"))?;
        if !pkce::is_well_formed(&code_challenge) {
            return Err(AuthError::invalid_request(
                "code_challenge must be 43 to 128 characters of [A-Za-z0-9-._~]",
            ));
        }
        let code_challenge_method = match request.code_challenge_method.as_deref() {
            None => CodeChallengeMethod::Plain,
            Some(method) => CodeChallengeMethod::parse(method).ok_or_else(|| {
                AuthError::invalid_request(format!(
                    "unsupported code_challenge_method '{method}'"
                ))
            })?,
        };

        // 5. resource indicator, compared byte for byte
        let expected_resource = self.config.resource();
        let resource = match request.resource {
            Some(resource) if resource != expected_resource => {
                return Err(AuthError::InvalidTarget(format!(
                    "resource '{resource}' is not served by this authorization server"
                )));
            }
            Some(resource) => resource,
            None => expected_resource,
        };

        // 6. scopes
        let scopes: Vec<String> = match request.scope.as_deref().map(str::trim) {
            Some(scope) if !scope.is_empty() => {
                let requested: Vec<String> = scope.split_whitespace().map(str::to_string).collect();
                if let Some(bad) = requested.iter().find(|s| !client.scopes.contains(s)) {
                    return Err(AuthError::InvalidScope(format!(
                        "scope '{bad}' is not available to this client"
                    )));
                }
                requested
            }
            _ => client.scopes.clone(),
        };

        // 7. park both legs and go upstream
        let now = self.now();
        let state_token = pkce::generate_token();
        let code_verifier = pkce::generate_code_verifier();
        let upstream_challenge = pkce::code_challenge(&code_verifier);

        let request_state = AuthorizationRequestState {
            state_token: state_token.clone(),
            client_id: client.client_id.clone(),
            redirect_uri,
            code_challenge,
            code_challenge_method,
            resource,
            scopes,
            client_state: request.state,
            created_at: now,
            expires_at: now + Duration::seconds(self.config.ttl.authorization_secs),
        };
        let exchange_state = UpstreamExchangeState {
            state_token: state_token.clone(),
            code_verifier,
            created_at: now,
        };
        self.store
            .put_authorization(request_state, exchange_state)
            .await?;

        let url = self.upstream.authorization_url(
            &state_token,
            &upstream_challenge,
            &self.config.upstream_redirect_uri(),
            &self.config.required_scopes,
        );

        info!(client_id = %client.client_id, "Authorization started, redirecting to upstream");
        Ok(UpstreamRedirect { url, state_token })
    }

    /// Complete the upstream leg. Returns the client redirect URL.
    pub async fn callback(&self, params: CallbackParams) -> AuthResult<String> {
        let state_token = params
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::InvalidState("state is missing".to_string()))?;

        // Consumed here whatever happens next; a failed login must restart.
        let (request, exchange) = self
            .store
            .take_authorization(state_token)
            .await?
            .ok_or_else(|| {
                AuthError::InvalidState("authorization state is unknown or already used".to_string())
            })?;

        let now = self.now();
        if request.is_expired(now) {
            debug!(client_id = %request.client_id, "Authorization state expired");
            return Err(AuthError::InvalidState(
                "authorization state has expired".to_string(),
            ));
        }

        let client_state = request.client_state.as_deref();

        if let Some(error) = params.error.as_deref() {
            warn!(client_id = %request.client_id, upstream_error = %error, "Upstream login was not approved");
            let description = params
                .error_description
                .unwrap_or_else(|| format!("upstream provider returned '{error}'"));
            let mut pairs = vec![
                ("error", "access_denied"),
                ("error_description", description.as_str()),
            ];
            if let Some(state) = client_state {
                pairs.push(("state", state));
            }
            return client_redirect(&request.redirect_uri, &pairs);
        }

        let upstream_code = params
            .code
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::invalid_request("code is missing from the upstream callback"))?;

        let tokens = self
            .upstream
            .exchange_code(
                upstream_code,
                &exchange.code_verifier,
                &self.config.upstream_redirect_uri(),
            )
            .await
            .map_err(|e| {
                warn!(client_id = %request.client_id, error = %e, "Upstream code exchange failed");
                AuthError::Upstream(e)
            })?;

        let credential = UpstreamCredential::from_tokens(tokens, now);
        let claims = self
            .upstream
            .fetch_claims(&credential.access_token)
            .await
            .map_err(|e| {
                warn!(client_id = %request.client_id, error = %e, "Fetching upstream user claims failed");
                AuthError::Upstream(e)
            })?;

        let token = self.mint_token(
            &request.client_id,
            &request.resource,
            request.scopes.clone(),
            credential,
            claims,
        );
        let grant = AuthorizationCodeGrant {
            code: pkce::generate_token(),
            client_id: request.client_id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            code_challenge: request.code_challenge,
            code_challenge_method: request.code_challenge_method,
            token,
            expires_at: now + Duration::seconds(self.config.ttl.code_secs),
        };
        let code = grant.code.clone();
        info!(
            client_id = %request.client_id,
            user = %grant.token.claims.label(),
            "Upstream login succeeded, issuing authorization code"
        );
        self.store.put_code(grant).await?;

        let mut pairs = vec![("code", code.as_str())];
        if let Some(state) = client_state {
            pairs.push(("state", state));
        }
        client_redirect(&request.redirect_uri, &pairs)
    }
}
