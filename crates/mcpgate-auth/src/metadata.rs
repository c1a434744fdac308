//! Discovery documents (RFC 9728 and RFC 8414).

use crate::config::{FacadeConfig, AUTHORIZE_PATH, REGISTER_PATH, REVOKE_PATH, TOKEN_PATH};
use crate::pkce::CodeChallengeMethod;
use serde::{Deserialize, Serialize};

/// OAuth 2.0 Protected Resource Metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    pub authorization_servers: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub bearer_methods_supported: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
}

impl ProtectedResourceMetadata {
    pub fn from_config(config: &FacadeConfig) -> Self {
        Self {
            resource: config.resource(),
            authorization_servers: vec![config.issuer().to_string()],
            scopes_supported: config.scopes_supported().to_vec(),
            bearer_methods_supported: vec!["header".to_string()],
            resource_name: config.resource_name.clone(),
        }
    }
}

/// OAuth 2.0 Authorization Server Metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: String,
    pub revocation_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub revocation_endpoint_auth_methods_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
}

impl AuthorizationServerMetadata {
    pub fn from_config(config: &FacadeConfig) -> Self {
        Self {
            issuer: config.issuer().to_string(),
            authorization_endpoint: config.endpoint(AUTHORIZE_PATH),
            token_endpoint: config.endpoint(TOKEN_PATH),
            registration_endpoint: config.endpoint(REGISTER_PATH),
            revocation_endpoint: config.endpoint(REVOKE_PATH),
            response_types_supported: vec!["code".to_string()],
            grant_types_supported: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            code_challenge_methods_supported: vec![
                CodeChallengeMethod::S256.as_str().to_string(),
                CodeChallengeMethod::Plain.as_str().to_string(),
            ],
            token_endpoint_auth_methods_supported: vec!["none".to_string()],
            revocation_endpoint_auth_methods_supported: vec!["none".to_string()],
            scopes_supported: config.scopes_supported().to_vec(),
        }
    }
}
