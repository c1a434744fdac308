//! The OAuth delegation facade.
//!
//! [`OAuthFacade`] presents a full authorization server to MCP clients and
//! delegates user login to the upstream provider. Its operations are split by
//! endpoint across `client`, `flow`, `token` and `validator`.

use crate::config::FacadeConfig;
use crate::error::{AuthResult, ConfigError};
use crate::metadata::{AuthorizationServerMetadata, ProtectedResourceMetadata};
use crate::model::{IssuedToken, RefreshGrant, UpstreamCredential};
use crate::claims::UserClaims;
use crate::pkce;
use crate::store::{AuthStore, PurgeStats};
use crate::upstream::UpstreamProvider;
use chrono::{DateTime, Duration, Utc};
use mcpgate_util::SharedClock;
use std::sync::Arc;
use tracing::debug;

/// OAuth authorization server facade.
///
/// Cheap to clone; all clones share the same store.
#[derive(Clone)]
pub struct OAuthFacade {
    pub(crate) config: Arc<FacadeConfig>,
    pub(crate) store: Arc<dyn AuthStore>,
    pub(crate) upstream: Arc<dyn UpstreamProvider>,
    pub(crate) clock: SharedClock,
}

impl OAuthFacade {
    /// Create a facade. Fails if the configuration cannot serve requests.
    pub fn new(
        config: FacadeConfig,
        store: Arc<dyn AuthStore>,
        upstream: Arc<dyn UpstreamProvider>,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            store,
            upstream,
            clock,
        })
    }

    pub fn config(&self) -> &FacadeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn AuthStore> {
        &self.store
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn protected_resource_metadata(&self) -> ProtectedResourceMetadata {
        ProtectedResourceMetadata::from_config(&self.config)
    }

    pub fn authorization_server_metadata(&self) -> AuthorizationServerMetadata {
        AuthorizationServerMetadata::from_config(&self.config)
    }

    /// Drop expired state from the store.
    pub async fn purge_expired(&self) -> AuthResult<PurgeStats> {
        self.store.purge_expired(self.now()).await
    }

    /// Build a fresh access token with a paired refresh token.
    pub(crate) fn mint_token(
        &self,
        client_id: &str,
        resource: &str,
        scopes: Vec<String>,
        upstream: UpstreamCredential,
        claims: UserClaims,
    ) -> IssuedToken {
        let now = self.now();
        IssuedToken {
            access_token: pkce::generate_token(),
            client_id: client_id.to_string(),
            resource: resource.to_string(),
            scopes,
            issued_at: now,
            expires_at: now + Duration::seconds(self.config.ttl.access_token_secs),
            upstream,
            claims,
            refresh_token: Some(pkce::generate_token()),
        }
    }

    /// Store an access token together with its refresh grant.
    pub(crate) async fn activate(&self, token: &IssuedToken) -> AuthResult<()> {
        self.store.put_token(token.clone()).await?;
        if let Some(refresh_token) = &token.refresh_token {
            let grant = RefreshGrant {
                refresh_token: refresh_token.clone(),
                client_id: token.client_id.clone(),
                resource: token.resource.clone(),
                scopes: token.scopes.clone(),
                access_token: token.access_token.clone(),
                upstream: token.upstream.clone(),
                claims: token.claims.clone(),
                expires_at: self.now() + Duration::seconds(self.config.ttl.refresh_token_secs),
            };
            self.store.put_refresh(grant).await?;
        }
        debug!(client_id = %token.client_id, "Activated access token");
        Ok(())
    }

    /// Remove an access token and its refresh grant.
    pub(crate) async fn revoke_issued(&self, token: &IssuedToken) -> AuthResult<()> {
        self.store.remove_token(&token.access_token).await?;
        if let Some(refresh_token) = &token.refresh_token {
            self.store.take_refresh(refresh_token).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for OAuthFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthFacade")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
