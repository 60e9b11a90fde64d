//! End-to-end tests of `SessionClient` over real HTTP against a mock server.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use mockito::Matcher;
use refshop_core::auth::{MemoryBackend, RenewalState};
use refshop_core::{ApiError, ClientConfig, CredentialStore, SessionClient, SessionTokens};
use serde_json::json;

fn jwt(user_id: i64, generation: u32) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        json!({"user_id": user_id, "generation": generation, "token_type": "access"}).to_string(),
    );
    format!("{}.{}.c2ln", header, payload)
}

fn client(base_url: &str, tokens: SessionTokens) -> SessionClient {
    let store = CredentialStore::new(Box::new(MemoryBackend::with_tokens(tokens)));
    let client = SessionClient::http(ClientConfig::new(base_url), store).expect("build client");
    client.restore();
    client
}

#[tokio::test]
async fn test_expired_credential_is_renewed_and_request_replayed() {
    let mut server = mockito::Server::new_async().await;
    let old = jwt(7, 1);
    let new = jwt(7, 2);

    let rejected = server
        .mock("GET", "/api/users/userinfo/")
        .match_header("authorization", format!("Bearer {}", old).as_str())
        .with_status(401)
        .with_body(r#"{"detail":"Given token not valid for any token type"}"#)
        .expect(1)
        .create_async()
        .await;
    let renewal = server
        .mock("POST", "/api/token/refresh/")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::Json(json!({"refresh": "renewal-1"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"access": new}).to_string())
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("GET", "/api/users/userinfo/")
        .match_header("authorization", format!("Bearer {}", new).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":7,"username":"alice"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client(&server.url(), SessionTokens::new(old, "renewal-1"));
    let profile: serde_json::Value = client
        .get("/api/users/userinfo/")
        .await
        .expect("profile after renewal");

    assert_eq!(profile["username"], "alice");
    assert_eq!(client.session().store().access(), Some(new));
    assert_eq!(client.session().state(), RenewalState::Idle);
    rejected.assert_async().await;
    renewal.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_bad_password_returns_401_without_renewal() {
    let mut server = mockito::Server::new_async().await;
    let login = server
        .mock("POST", "/api/users/login/")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::PartialJson(json!({"email": "alice@example.com"})))
        .with_status(401)
        .with_body(r#"{"detail":"Invalid credentials. Please check your email/phone and password."}"#)
        .expect(1)
        .create_async()
        .await;
    let renewal = server
        .mock("POST", "/api/token/refresh/")
        .expect(0)
        .create_async()
        .await;

    let client = client(&server.url(), SessionTokens::new(jwt(7, 1), "renewal-1"));
    let err = client
        .login("alice@example.com", "wrong")
        .await
        .expect_err("login must fail");

    assert!(matches!(err, ApiError::Unauthorized(ref body) if body.contains("Invalid credentials")));
    login.assert_async().await;
    renewal.assert_async().await;
}

#[tokio::test]
async fn test_rejected_renewal_ends_the_session() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/wallets/")
        .with_status(401)
        .create_async()
        .await;
    let renewal = server
        .mock("POST", "/api/token/refresh/")
        .with_status(401)
        .with_body(r#"{"detail":"Token is blacklisted"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client(&server.url(), SessionTokens::new(jwt(7, 1), "renewal-1"));
    let err = client
        .get::<serde_json::Value>("/api/wallets/")
        .await
        .expect_err("request must fail");

    assert!(err.requires_login());
    assert_eq!(client.session().state(), RenewalState::Failed);
    assert!(client.session().store().get().is_empty());
    renewal.assert_async().await;
}
