//! Dynamic client registration (RFC 7591).

use crate::error::{AuthError, AuthResult};
use crate::facade::OAuthFacade;
use crate::model::RegisteredClient;
use mcpgate_util::wildcard;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const SUPPORTED_GRANT_TYPES: [&str; 2] = ["authorization_code", "refresh_token"];
const SUPPORTED_RESPONSE_TYPES: [&str; 1] = ["code"];

/// Client registration request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationRequest {
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub grant_types: Option<Vec<String>>,
    #[serde(default)]
    pub response_types: Option<Vec<String>>,
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Client information returned on successful registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub client_id: String,
    pub client_id_issued_at: i64,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub scope: String,
}

/// Check that a redirect URI (or a pattern for one) is an absolute URL with
/// a host, and carries neither userinfo nor a fragment.
///
/// Wildcards are checked as if they were a single harmless character, so
/// `http://localhost:*/cb` is accepted as a pattern.
pub fn validate_redirect_uri(uri: &str) -> AuthResult<()> {
    let reject = |reason: &str| {
        Err(AuthError::InvalidRedirectUri(format!(
            "redirect_uri '{uri}' {reason}"
        )))
    };

    let concrete = uri.replace('*', "0");
    let parsed = match url::Url::parse(&concrete) {
        Ok(parsed) => parsed,
        Err(_) => return reject("is not an absolute URL"),
    };
    if parsed.host_str().map_or(true, str::is_empty) {
        return reject("has no host");
    }
    if !parsed.username().is_empty() || parsed.password().is_some() || uri.contains('@') {
        return reject("must not contain userinfo");
    }
    if parsed.fragment().is_some() || uri.contains('#') {
        return reject("must not contain a fragment");
    }
    Ok(())
}

fn check_subset(field: &str, requested: &[String], supported: &[&str]) -> AuthResult<()> {
    match requested.iter().find(|v| !supported.contains(&v.as_str())) {
        Some(bad) => Err(AuthError::InvalidClientMetadata(format!(
            "unsupported {field} '{bad}'"
        ))),
        None => Ok(()),
    }
}

impl OAuthFacade {
    /// Register a public client.
    pub async fn register(&self, request: RegistrationRequest) -> AuthResult<RegistrationResponse> {
        if request.redirect_uris.is_empty() {
            return Err(AuthError::InvalidRedirectUri(
                "at least one redirect_uri is required".to_string(),
            ));
        }
        for uri in &request.redirect_uris {
            validate_redirect_uri(uri)?;
            if !wildcard::matches_any(&self.config.allowed_client_redirect_uris, uri) {
                warn!(redirect_uri = %uri, "Rejected registration with disallowed redirect_uri");
                return Err(AuthError::InvalidRedirectUri(format!(
                    "redirect_uri '{uri}' is not allowed by this server"
                )));
            }
        }

        if let Some(method) = &request.token_endpoint_auth_method {
            if method != "none" {
                return Err(AuthError::InvalidClientMetadata(format!(
                    "token_endpoint_auth_method '{method}' is not supported, only public clients may register"
                )));
            }
        }

        let grant_types = match request.grant_types {
            Some(types) if !types.is_empty() => {
                check_subset("grant_type", &types, &SUPPORTED_GRANT_TYPES)?;
                types
            }
            _ => SUPPORTED_GRANT_TYPES.iter().map(|s| s.to_string()).collect(),
        };
        let response_types = match request.response_types {
            Some(types) if !types.is_empty() => {
                check_subset("response_type", &types, &SUPPORTED_RESPONSE_TYPES)?;
                types
            }
            _ => SUPPORTED_RESPONSE_TYPES.iter().map(|s| s.to_string()).collect(),
        };

        let supported = self.config.scopes_supported();
        let scopes: Vec<String> = match request.scope.as_deref().map(str::trim) {
            Some(scope) if !scope.is_empty() => {
                let requested: Vec<String> = scope.split_whitespace().map(str::to_string).collect();
                if let Some(bad) = requested.iter().find(|s| !supported.contains(s)) {
                    return Err(AuthError::InvalidClientMetadata(format!(
                        "scope '{bad}' is not supported"
                    )));
                }
                requested
            }
            _ => supported.to_vec(),
        };

        let client = RegisteredClient {
            client_id: uuid::Uuid::new_v4().to_string(),
            redirect_uris: request.redirect_uris,
            client_name: request.client_name,
            scopes,
            created_at: self.now(),
        };
        self.store.put_client(client.clone()).await?;

        info!(
            client_id = %client.client_id,
            client_name = client.client_name.as_deref().unwrap_or("-"),
            "Registered OAuth client"
        );

        Ok(RegistrationResponse {
            client_id: client.client_id,
            client_id_issued_at: client.created_at.timestamp(),
            redirect_uris: client.redirect_uris,
            grant_types,
            response_types,
            token_endpoint_auth_method: "none".to_string(),
            client_name: client.client_name,
            scope: client.scopes.join(" "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_redirect_uris() {
        assert!(validate_redirect_uri("http://localhost:3000/callback").is_ok());
        assert!(validate_redirect_uri("http://localhost:*/cb").is_ok());
        assert!(validate_redirect_uri("http://127.0.0.1:*").is_ok());
        assert!(validate_redirect_uri("https://app.example.com/oauth?x=1").is_ok());
    }

    #[test]
    fn test_rejects_relative_uri() {
        let err = validate_redirect_uri("/callback").unwrap_err();
        assert_eq!(err.code(), "invalid_redirect_uri");
        assert!(validate_redirect_uri("not a url").is_err());
    }

    #[test]
    fn test_rejects_userinfo() {
        assert!(validate_redirect_uri("http://localhost:80@evil.example/").is_err());
        assert!(validate_redirect_uri("http://user:pw@localhost:80/").is_err());
    }

    #[test]
    fn test_rejects_fragment() {
        assert!(validate_redirect_uri("http://localhost:3000/cb#frag").is_err());
        assert!(validate_redirect_uri("http://localhost:3000/cb#").is_err());
    }

    #[test]
    fn test_rejects_missing_host() {
        assert!(validate_redirect_uri("file:///tmp/cb").is_err());
    }

    #[test]
    fn test_registration_request_defaults() {
        let req: RegistrationRequest =
            serde_json::from_str(r#"{"client_name":"Inspector"}"#).unwrap();
        assert!(req.redirect_uris.is_empty());
        assert_eq!(req.client_name.as_deref(), Some("Inspector"));
        assert!(req.grant_types.is_none());
    }

    #[test]
    fn test_check_subset() {
        let ok = vec!["authorization_code".to_string()];
        assert!(check_subset("grant_type", &ok, &SUPPORTED_GRANT_TYPES).is_ok());

        let bad = vec!["client_credentials".to_string()];
        let err = check_subset("grant_type", &bad, &SUPPORTED_GRANT_TYPES).unwrap_err();
        assert_eq!(err.code(), "invalid_client_metadata");
    }
}
