//! Testing utilities, fixtures, and fakes for mcpgate.
//!
//! - **Upstream**: [`FakeUpstream`], an in-process stand-in for Google that
//!   records calls and can be told to fail
//! - **Fixtures**: [`TestFacade`], a facade over a memory store, the fake
//!   upstream and a manual clock, with helpers that drive the login flow
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use mcpgate_test_utils::TestFacade;
//!
//! #[tokio::test]
//! async fn test_login() {
//!     let t = TestFacade::new();
//!     let (_login, token) = t.issue_token().await;
//!     assert_eq!(token.token_type, "Bearer");
//! }
//! ```

pub mod fixtures;
pub mod upstream;

pub use fixtures::{
    query_param, test_config, Login, TestFacade, TEST_BASE_URL, TEST_REDIRECT_PATTERN,
    TEST_REDIRECT_URI, TEST_RESOURCE,
};
pub use upstream::{default_claims, FakeUpstream, RefreshGate, UpstreamCall, FAKE_AUTHORIZE_URL};
