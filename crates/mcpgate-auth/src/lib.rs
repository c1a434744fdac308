//! OAuth delegation facade for mcpgate.
//!
//! Presents a complete OAuth 2.1 authorization server to MCP clients while
//! delegating user login to a fixed upstream provider (Google):
//!
//! - Discovery metadata (RFC 9728, RFC 8414)
//! - Dynamic client registration (RFC 7591) for public clients
//! - Authorization code flow with PKCE (RFC 7636) and resource indicators (RFC 8707)
//! - Refresh token rotation and revocation (RFC 7009)
//! - Bearer token validation with optional upstream revalidation
//!
//! All state lives in an injected [`AuthStore`].

pub mod claims;
pub mod client;
pub mod config;
pub mod error;
pub mod facade;
pub mod flow;
pub mod metadata;
pub mod model;
pub mod pkce;
pub mod store;
pub mod token;
pub mod upstream;
pub mod validator;

pub use claims::UserClaims;
pub use client::{RegistrationRequest, RegistrationResponse};
pub use config::{FacadeConfig, TtlConfig, UpstreamConfig};
pub use error::{AuthError, AuthResult, ConfigError, UpstreamError, UpstreamResult};
pub use facade::OAuthFacade;
pub use flow::{AuthorizeRequest, CallbackParams, UpstreamRedirect};
pub use metadata::{AuthorizationServerMetadata, ProtectedResourceMetadata};
pub use store::{AuthStore, MemoryStore, PurgeStats};
pub use token::{RevocationRequest, TokenRequest, TokenResponse};
pub use upstream::{GoogleProvider, UpstreamProvider, UpstreamTokens};
pub use validator::{bearer_token, Principal};
