//! HTTP-level tests of the facade endpoints and the guarded MCP endpoint.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use mcpgate_auth::pkce;
use mcpgate_mcp::{protected_tools, McpHttpState};
use mcpgate_server::{create_router, AppState};
use mcpgate_test_utils::{
    query_param, TestFacade, TEST_REDIRECT_PATTERN, TEST_REDIRECT_URI, TEST_RESOURCE,
};
use serde_json::{json, Value};
use tower::ServiceExt;

fn router(t: &TestFacade) -> Router {
    let mcp = McpHttpState::new("MCP RS with Google OAuth", "test", protected_tools());
    create_router(AppState::new(t.facade.clone(), mcp))
}

async fn send(t: &TestFacade, request: Request<Body>) -> Response {
    router(t).oneshot(request).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_form(uri: &str, pairs: &[(&str, &str)]) -> Request<Body> {
    let body = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

fn post_json(uri: &str, body: &Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn location(response: &Response) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

fn rpc(id: i64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

/// Drive register, authorize, callback and token over HTTP.
async fn http_login(t: &TestFacade) -> Value {
    let response = send(
        t,
        post_json(
            "/register",
            &json!({ "redirect_uris": [TEST_REDIRECT_PATTERN], "client_name": "http client" }),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let client_id = body_json(response).await["client_id"]
        .as_str()
        .unwrap()
        .to_string();

    let verifier = pkce::generate_code_verifier();
    let authorize = format!(
        "/authorize?response_type=code&client_id={}&redirect_uri={}&code_challenge={}&code_challenge_method=S256&scope=openid%20email&resource={}&state=xyz",
        client_id,
        urlencoding::encode(TEST_REDIRECT_URI),
        pkce::code_challenge(&verifier),
        urlencoding::encode(TEST_RESOURCE),
    );
    let response = send(t, get(&authorize)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let upstream = location(&response);
    let state = query_param(&upstream, "state").unwrap();

    let response = send(
        t,
        get(&format!("/auth/callback?code=google-code&state={}", state)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let back = location(&response);
    assert!(back.starts_with(TEST_REDIRECT_URI));
    assert_eq!(query_param(&back, "state").as_deref(), Some("xyz"));
    let code = query_param(&back, "code").unwrap();

    let response = send(
        t,
        post_form(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", TEST_REDIRECT_URI),
                ("client_id", &client_id),
                ("code_verifier", &verifier),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    body_json(response).await
}

#[tokio::test]
async fn test_protected_resource_metadata() {
    let t = TestFacade::new();
    for path in [
        "/.well-known/oauth-protected-resource",
        "/.well-known/oauth-protected-resource/mcp",
    ] {
        let response = send(&t, get(path)).await;
        assert_eq!(response.status(), StatusCode::OK, "{path}");
        let body = body_json(response).await;
        assert_eq!(body["resource"], TEST_RESOURCE);
        assert_eq!(body["authorization_servers"], json!(["http://host"]));
        assert_eq!(body["bearer_methods_supported"], json!(["header"]));
    }
}

#[tokio::test]
async fn test_authorization_server_metadata() {
    let t = TestFacade::new();
    let response = send(&t, get("/.well-known/oauth-authorization-server")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["issuer"], "http://host");
    assert_eq!(body["authorization_endpoint"], "http://host/authorize");
    assert_eq!(body["token_endpoint"], "http://host/token");
    assert_eq!(body["registration_endpoint"], "http://host/register");
    assert_eq!(body["revocation_endpoint"], "http://host/revoke");
    assert_eq!(body["code_challenge_methods_supported"], json!(["S256", "plain"]));
}

#[tokio::test]
async fn test_healthz() {
    let t = TestFacade::new();
    let response = send(&t, get("/healthz")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mcp_path"], "/mcp");
    assert_eq!(body["resource"], TEST_RESOURCE);
    assert_eq!(body["scopes"], json!(["openid", "email", "profile"]));
}

#[tokio::test]
async fn test_register_rejects_disallowed_redirect() {
    let t = TestFacade::new();
    let response = send(
        &t,
        post_json(
            "/register",
            &json!({ "redirect_uris": ["https://evil.example/cb"] }),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_redirect_uri");
    assert!(body["error_description"].is_string());
}

#[tokio::test]
async fn test_register_rejects_malformed_body() {
    let t = TestFacade::new();
    let response = send(
        &t,
        Request::builder()
            .method("POST")
            .uri("/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{nope"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_client_metadata");
}

#[tokio::test]
async fn test_authorize_error_is_json() {
    let t = TestFacade::new();
    let response = send(&t, get("/authorize?client_id=unknown")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::LOCATION).is_none());
    assert_eq!(body_json(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn test_malformed_query_is_json_error() {
    let t = TestFacade::new();
    for uri in [
        "/authorize?client_id=a&client_id=b",
        "/auth/callback?state=a&state=b",
    ] {
        let response = send(&t, get(uri)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/json"));
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_request");
        assert!(body["error_description"].as_str().is_some());
    }
}

#[tokio::test]
async fn test_callback_unknown_state() {
    let t = TestFacade::new();
    let response = send(&t, get("/auth/callback?code=c&state=never-issued")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_state");
}

#[tokio::test]
async fn test_callback_upstream_failure_is_bad_gateway() {
    let t = TestFacade::new();
    let client_id = t.register(&[TEST_REDIRECT_PATTERN]).await;
    let (request, _) = t.authorize_request(&client_id);
    let redirect = t.facade.authorize(request).await.unwrap();
    t.upstream.fail_exchange(400);

    let response = send(
        &t,
        get(&format!("/auth/callback?code=c&state={}", redirect.state_token)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"], "upstream_error");
    assert!(!body["error_description"]
        .as_str()
        .unwrap()
        .contains("provider returned"));
}

#[tokio::test]
async fn test_full_flow_over_http() {
    let t = TestFacade::new();
    let token = http_login(&t).await;
    assert_eq!(token["token_type"], "Bearer");
    assert_eq!(token["scope"], "openid email");
    let access_token = token["access_token"].as_str().unwrap();

    let response = send(
        &t,
        post_json(
            "/mcp",
            &rpc(1, "tools/call", json!({ "name": "get_user_info" })),
            Some(access_token),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["isError"], false);
    let info = &body["result"]["structuredContent"];
    assert_eq!(info["email"], "ada@example.com");
    assert_eq!(info["google_id"], "1234567890");
}

#[tokio::test]
async fn test_token_endpoint_requires_form() {
    let t = TestFacade::new();
    let response = send(
        &t,
        post_json("/token", &json!({ "grant_type": "authorization_code" }), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_token_wrong_verifier_over_http() {
    let t = TestFacade::new();
    let login = t.login().await;
    let response = send(
        &t,
        post_form(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &login.code),
                ("redirect_uri", &login.redirect_uri),
                ("client_id", &login.client_id),
                ("code_verifier", &pkce::generate_code_verifier()),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert_eq!(body_json(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_mcp_without_token_is_challenged() {
    let t = TestFacade::new();
    let response = send(&t, post_json("/mcp", &rpc(1, "tools/list", json!({})), None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[header::WWW_AUTHENTICATE],
        "Bearer resource_metadata=\"http://host/.well-known/oauth-protected-resource\""
    );
    assert_eq!(body_json(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn test_mcp_with_unknown_token() {
    let t = TestFacade::new();
    let response = send(
        &t,
        post_json("/mcp", &rpc(1, "tools/list", json!({})), Some("forged")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers()[header::WWW_AUTHENTICATE]
        .to_str()
        .unwrap()
        .to_string();
    assert!(challenge.starts_with("Bearer error=\"invalid_token\""));
    assert!(challenge.contains("resource_metadata=\"http://host/.well-known/oauth-protected-resource\""));
}

#[tokio::test]
async fn test_token_rejected_on_trailing_slash_endpoint() {
    let t = TestFacade::new();
    let (_, token) = t.issue_token().await;

    let response = send(
        &t,
        post_json("/mcp/", &rpc(1, "tools/list", json!({})), Some(&token.access_token)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers()[header::WWW_AUTHENTICATE]
        .to_str()
        .unwrap()
        .to_string();
    assert!(challenge.contains("not valid for this resource"));

    let response = send(
        &t,
        post_json("/mcp", &rpc(1, "tools/list", json!({})), Some(&token.access_token)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_mcp_get_not_allowed_when_authenticated() {
    let t = TestFacade::new();
    let (_, token) = t.issue_token().await;
    let response = send(
        &t,
        Request::builder()
            .uri("/mcp")
            .header(header::AUTHORIZATION, format!("Bearer {}", token.access_token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_revoked_token_fails_validation() {
    let t = TestFacade::new();
    let (_, token) = t.issue_token().await;

    let response = send(
        &t,
        post_form("/revoke", &[("token", &token.access_token)]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &t,
        post_json("/mcp", &rpc(1, "ping", json!({})), Some(&token.access_token)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_revoke_unknown_token_is_ok() {
    let t = TestFacade::new();
    let response = send(&t, post_form("/revoke", &[("token", "nothing")])).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&t, post_form("/revoke", &[])).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_refresh_over_http() {
    let t = TestFacade::new();
    let (login, token) = t.issue_token().await;
    let refresh_token = token.refresh_token.unwrap();

    let response = send(
        &t,
        post_form(
            "/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
                ("client_id", &login.client_id),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_ne!(body["access_token"], token.access_token.as_str());

    let response = send(
        &t,
        post_form(
            "/token",
            &[("grant_type", "refresh_token"), ("refresh_token", &refresh_token)],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");
}
