//! State store for clients, in-flight authorizations, codes and tokens.
//!
//! The store is injected into the facade as `Arc<dyn AuthStore>` so several
//! server instances (or tests) can run side by side with isolated state.
//! All `take_*` operations are consume-once: the entry is removed under the
//! same lock that finds it, so two concurrent callers can never both get it.

use crate::error::AuthResult;
use crate::model::{
    AuthorizationCodeGrant, AuthorizationRequestState, IssuedToken, RefreshGrant,
    RegisteredClient, UpstreamExchangeState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Number of entries removed by [`AuthStore::purge_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub authorizations: usize,
    pub codes: usize,
    pub tokens: usize,
    pub refresh_grants: usize,
}

impl PurgeStats {
    pub fn total(&self) -> usize {
        self.authorizations + self.codes + self.tokens + self.refresh_grants
    }
}

/// Storage backend for the facade.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn put_client(&self, client: RegisteredClient) -> AuthResult<()>;

    async fn get_client(&self, client_id: &str) -> AuthResult<Option<RegisteredClient>>;

    /// Store both legs of a new authorization attempt.
    async fn put_authorization(
        &self,
        request: AuthorizationRequestState,
        exchange: UpstreamExchangeState,
    ) -> AuthResult<()>;

    /// Remove and return both legs for a state token.
    async fn take_authorization(
        &self,
        state_token: &str,
    ) -> AuthResult<Option<(AuthorizationRequestState, UpstreamExchangeState)>>;

    async fn put_code(&self, grant: AuthorizationCodeGrant) -> AuthResult<()>;

    /// Remove and return a client-facing code.
    async fn take_code(&self, code: &str) -> AuthResult<Option<AuthorizationCodeGrant>>;

    /// Insert or replace an access token.
    async fn put_token(&self, token: IssuedToken) -> AuthResult<()>;

    async fn get_token(&self, access_token: &str) -> AuthResult<Option<IssuedToken>>;

    /// Replace an access token only if it is still stored. Returns `false`
    /// when it was revoked or rotated away in the meantime.
    async fn replace_token(&self, token: IssuedToken) -> AuthResult<bool>;

    async fn remove_token(&self, access_token: &str) -> AuthResult<Option<IssuedToken>>;

    async fn put_refresh(&self, grant: RefreshGrant) -> AuthResult<()>;

    /// Remove and return a refresh grant.
    async fn take_refresh(&self, refresh_token: &str) -> AuthResult<Option<RefreshGrant>>;

    /// Drop everything that expired before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> AuthResult<PurgeStats>;
}

#[derive(Default)]
struct MemoryInner {
    clients: HashMap<String, RegisteredClient>,
    requests: HashMap<String, AuthorizationRequestState>,
    exchanges: HashMap<String, UpstreamExchangeState>,
    codes: HashMap<String, AuthorizationCodeGrant>,
    tokens: HashMap<String, IssuedToken>,
    refresh: HashMap<String, RefreshGrant>,
}

/// In-process store. State lives as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of in-flight authorization attempts.
    pub async fn pending_authorizations(&self) -> usize {
        self.inner.read().await.requests.len()
    }

    /// Number of live access tokens.
    pub async fn token_count(&self) -> usize {
        self.inner.read().await.tokens.len()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn put_client(&self, client: RegisteredClient) -> AuthResult<()> {
        let mut inner = self.inner.write().await;
        inner.clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> AuthResult<Option<RegisteredClient>> {
        Ok(self.inner.read().await.clients.get(client_id).cloned())
    }

    async fn put_authorization(
        &self,
        request: AuthorizationRequestState,
        exchange: UpstreamExchangeState,
    ) -> AuthResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .exchanges
            .insert(exchange.state_token.clone(), exchange);
        inner.requests.insert(request.state_token.clone(), request);
        Ok(())
    }

    async fn take_authorization(
        &self,
        state_token: &str,
    ) -> AuthResult<Option<(AuthorizationRequestState, UpstreamExchangeState)>> {
        let mut inner = self.inner.write().await;
        let request = inner.requests.remove(state_token);
        let exchange = inner.exchanges.remove(state_token);
        Ok(request.zip(exchange))
    }

    async fn put_code(&self, grant: AuthorizationCodeGrant) -> AuthResult<()> {
        let mut inner = self.inner.write().await;
        inner.codes.insert(grant.code.clone(), grant);
        Ok(())
    }

    async fn take_code(&self, code: &str) -> AuthResult<Option<AuthorizationCodeGrant>> {
        Ok(self.inner.write().await.codes.remove(code))
    }

    async fn put_token(&self, token: IssuedToken) -> AuthResult<()> {
        let mut inner = self.inner.write().await;
        inner.tokens.insert(token.access_token.clone(), token);
        Ok(())
    }

    async fn get_token(&self, access_token: &str) -> AuthResult<Option<IssuedToken>> {
        Ok(self.inner.read().await.tokens.get(access_token).cloned())
    }

    async fn replace_token(&self, token: IssuedToken) -> AuthResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.tokens.get_mut(&token.access_token) {
            Some(slot) => {
                *slot = token;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_token(&self, access_token: &str) -> AuthResult<Option<IssuedToken>> {
        Ok(self.inner.write().await.tokens.remove(access_token))
    }

    async fn put_refresh(&self, grant: RefreshGrant) -> AuthResult<()> {
        let mut inner = self.inner.write().await;
        inner.refresh.insert(grant.refresh_token.clone(), grant);
        Ok(())
    }

    async fn take_refresh(&self, refresh_token: &str) -> AuthResult<Option<RefreshGrant>> {
        Ok(self.inner.write().await.refresh.remove(refresh_token))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AuthResult<PurgeStats> {
        let mut inner = self.inner.write().await;
        let before = (
            inner.requests.len(),
            inner.codes.len(),
            inner.tokens.len(),
            inner.refresh.len(),
        );

        inner.requests.retain(|_, r| !r.is_expired(now));
        let MemoryInner {
            requests,
            exchanges,
            ..
        } = &mut *inner;
        exchanges.retain(|state, _| requests.contains_key(state));
        inner.codes.retain(|_, c| !c.is_expired(now));
        inner.tokens.retain(|_, t| !t.is_expired(now));
        inner.refresh.retain(|_, g| !g.is_expired(now));

        let stats = PurgeStats {
            authorizations: before.0 - inner.requests.len(),
            codes: before.1 - inner.codes.len(),
            tokens: before.2 - inner.tokens.len(),
            refresh_grants: before.3 - inner.refresh.len(),
        };
        if stats.total() > 0 {
            debug!(?stats, "Purged expired OAuth state");
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::UserClaims;
    use crate::model::UpstreamCredential;
    use crate::pkce::CodeChallengeMethod;
    use chrono::Duration;
    use std::sync::Arc;

    fn request(state: &str, now: DateTime<Utc>) -> (AuthorizationRequestState, UpstreamExchangeState) {
        (
            AuthorizationRequestState {
                state_token: state.to_string(),
                client_id: "client".to_string(),
                redirect_uri: "http://localhost:1/cb".to_string(),
                code_challenge: "c".repeat(43),
                code_challenge_method: CodeChallengeMethod::S256,
                resource: "http://host/mcp".to_string(),
                scopes: vec!["openid".to_string()],
                client_state: Some("xyz".to_string()),
                created_at: now,
                expires_at: now + Duration::minutes(10),
            },
            UpstreamExchangeState {
                state_token: state.to_string(),
                code_verifier: "v".repeat(43),
                created_at: now,
            },
        )
    }

    fn token(value: &str, now: DateTime<Utc>, ttl: i64) -> IssuedToken {
        IssuedToken {
            access_token: value.to_string(),
            client_id: "client".to_string(),
            resource: "http://host/mcp".to_string(),
            scopes: vec![],
            issued_at: now,
            expires_at: now + Duration::seconds(ttl),
            upstream: UpstreamCredential {
                access_token: "up".to_string(),
                refresh_token: None,
                expires_at: None,
                scope: None,
            },
            claims: UserClaims::default(),
            refresh_token: None,
        }
    }

    #[tokio::test]
    async fn test_client_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get_client("missing").await.unwrap().is_none());

        let client = RegisteredClient {
            client_id: "abc".to_string(),
            redirect_uris: vec!["http://localhost:*".to_string()],
            client_name: Some("Inspector".to_string()),
            scopes: vec!["openid".to_string()],
            created_at: Utc::now(),
        };
        store.put_client(client.clone()).await.unwrap();
        assert_eq!(store.get_client("abc").await.unwrap(), Some(client));
    }

    #[tokio::test]
    async fn test_take_authorization_is_consume_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let (req, ex) = request("s1", now);
        store.put_authorization(req.clone(), ex).await.unwrap();
        assert_eq!(store.pending_authorizations().await, 1);

        let taken = store.take_authorization("s1").await.unwrap();
        assert_eq!(taken.map(|(r, _)| r), Some(req));
        assert!(store.take_authorization("s1").await.unwrap().is_none());
        assert_eq!(store.pending_authorizations().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_take_code_single_winner() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .put_code(AuthorizationCodeGrant {
                code: "code-1".to_string(),
                client_id: "client".to_string(),
                redirect_uri: "http://localhost:1/cb".to_string(),
                code_challenge: "c".repeat(43),
                code_challenge_method: CodeChallengeMethod::Plain,
                token: token("t", now, 60),
                expires_at: now + Duration::seconds(60),
            })
            .await
            .unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.take_code("code-1").await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_token_put_get_remove() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.put_token(token("t1", now, 60)).await.unwrap();
        assert!(store.get_token("t1").await.unwrap().is_some());
        assert_eq!(store.token_count().await, 1);

        let removed = store.remove_token("t1").await.unwrap();
        assert_eq!(removed.map(|t| t.access_token), Some("t1".to_string()));
        assert!(store.get_token("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_token_requires_presence() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.put_token(token("t1", now, 60)).await.unwrap();

        let mut updated = token("t1", now, 60);
        updated.upstream.access_token = "up-2".to_string();
        assert!(store.replace_token(updated).await.unwrap());
        assert_eq!(
            store.get_token("t1").await.unwrap().map(|t| t.upstream.access_token),
            Some("up-2".to_string())
        );

        store.remove_token("t1").await.unwrap();
        assert!(!store.replace_token(token("t1", now, 60)).await.unwrap());
        assert!(store.get_token("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let (req, ex) = request("live", now);
        store.put_authorization(req, ex).await.unwrap();
        let (mut req, ex) = request("stale", now);
        req.expires_at = now - Duration::seconds(1);
        store.put_authorization(req, ex).await.unwrap();

        store.put_token(token("fresh", now, 60)).await.unwrap();
        store.put_token(token("old", now, -1)).await.unwrap();

        let stats = store.purge_expired(now).await.unwrap();
        assert_eq!(stats.authorizations, 1);
        assert_eq!(stats.tokens, 1);
        assert_eq!(stats.total(), 2);

        assert!(store.take_authorization("stale").await.unwrap().is_none());
        assert!(store.take_authorization("live").await.unwrap().is_some());
        assert!(store.get_token("fresh").await.unwrap().is_some());
    }
}
