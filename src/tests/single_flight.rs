use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::codes;
use crate::tests::test_support::{authed_client, bearer, unauthorized_response};

fn gated_endpoint() -> impl Fn(&Request) -> ResponseTemplate + Send + Sync + 'static {
    |req: &Request| match bearer(req).as_deref() {
        Some("Bearer access-1") => {
            ResponseTemplate::new(200).set_body_json(json!({"data": {"ok": true}}))
        }
        _ => unauthorized_response(),
    }
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() {
    let server = MockServer::start().await;
    for endpoint in ["/feed", "/messages", "/polls"] {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(gated_endpoint())
            .mount(&server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "success": true,
                    "access_token": "access-1",
                    "refresh_token": "refresh-1"
                }))
                .set_delay(Duration::from_millis(250)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = authed_client(&server.uri());
    let (a, b, c) = tokio::join!(
        client.get::<Value>("/feed"),
        client.get::<Value>("/messages"),
        client.get::<Value>("/polls"),
    );

    assert!(a.is_success(), "{a:?}");
    assert!(b.is_success(), "{b:?}");
    assert!(c.is_success(), "{c:?}");

    // Both tokens rotated: the server issued a fresh refresh token alongside
    // the access token.
    assert_eq!(client.tokens().access_token().as_deref(), Some("access-1"));
    assert_eq!(client.tokens().refresh_token().as_deref(), Some("refresh-1"));

    let requests = server.received_requests().await.unwrap();
    let refresh_calls = requests
        .iter()
        .filter(|r| r.url.path() == "/auth/refresh")
        .count();
    assert_eq!(refresh_calls, 1);
    // Each caller was replayed at most once: one 401 and one success apiece.
    let feed_calls = requests.iter().filter(|r| r.url.path() == "/feed").count();
    assert_eq!(feed_calls, 2);
    assert!(!client.is_refreshing());
}

#[tokio::test]
async fn failed_refresh_expires_session_exactly_once() {
    let server = MockServer::start().await;
    let endpoints = ["/a", "/b", "/c", "/d", "/e"];
    for endpoint in endpoints {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(unauthorized_response())
            .mount(&server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({"error": "refresh backend down"}))
                .set_delay(Duration::from_millis(250)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = authed_client(&server.uri());
    client.tokens().set_tenant_id("acme");
    let mut expired = client.on_session_expired();

    let (a, b, c, d, e) = tokio::join!(
        client.get::<Value>("/a"),
        client.get::<Value>("/b"),
        client.get::<Value>("/c"),
        client.get::<Value>("/d"),
        client.get::<Value>("/e"),
    );

    for result in [a, b, c, d, e] {
        assert_eq!(result.code(), Some(codes::SESSION_EXPIRED));
    }

    // Credentials gone, tenant context untouched.
    assert_eq!(client.tokens().access_token(), None);
    assert_eq!(client.tokens().refresh_token(), None);
    assert_eq!(client.tokens().tenant_id(), "acme");

    // The signal fired exactly once even though five callers piled up.
    assert!(expired.try_recv().is_ok());
    assert!(expired.try_recv().is_err());

    // Failed refresh means no replay: each endpoint was hit once.
    let requests = server.received_requests().await.unwrap();
    for endpoint in endpoints {
        let calls = requests.iter().filter(|r| r.url.path() == endpoint).count();
        assert_eq!(calls, 1, "{endpoint}");
    }
    assert!(!client.is_refreshing());
}

#[tokio::test]
async fn missing_refresh_token_fails_without_a_refresh_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secure"))
        .respond_with(unauthorized_response())
        .mount(&server)
        .await;

    let client = authed_client(&server.uri());
    client.tokens().clear_tokens();
    client.tokens().set_access_token("stale-access");
    let mut expired = client.on_session_expired();

    let result = client.get::<Value>("/secure").await;
    assert_eq!(result.code(), Some(codes::SESSION_EXPIRED));
    assert!(expired.try_recv().is_ok());

    let refresh_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/auth/refresh")
        .count();
    assert_eq!(refresh_calls, 0);
}

#[tokio::test]
async fn second_unauthorized_after_replay_is_a_plain_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stale"))
        .respond_with(unauthorized_response())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "access_token": "access-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = authed_client(&server.uri());
    let result = client.get::<Value>("/stale").await;

    // Surfaced with the server's own code, not SESSION_EXPIRED, and the
    // coordinator was not re-entered.
    assert_eq!(result.code(), Some("AUTH_TOKEN_EXPIRED"));

    let requests = server.received_requests().await.unwrap();
    let stale_calls = requests.iter().filter(|r| r.url.path() == "/stale").count();
    assert_eq!(stale_calls, 2);
    let refresh_calls = requests
        .iter()
        .filter(|r| r.url.path() == "/auth/refresh")
        .count();
    assert_eq!(refresh_calls, 1);
}

#[tokio::test]
async fn refresh_without_rotation_keeps_old_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(gated_endpoint())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "access_token": "access-1"
        })))
        .mount(&server)
        .await;

    let client = authed_client(&server.uri());
    let result = client.get::<Value>("/feed").await;
    assert!(result.is_success());
    assert_eq!(client.tokens().access_token().as_deref(), Some("access-1"));
    assert_eq!(client.tokens().refresh_token().as_deref(), Some("refresh-0"));
}

#[tokio::test]
async fn skip_auth_calls_are_not_routed_into_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(unauthorized_response())
        .mount(&server)
        .await;

    let client = authed_client(&server.uri());
    let opts = crate::RequestOptions {
        skip_auth: true,
        ..crate::RequestOptions::default()
    };
    let result = client.get_with::<Value>("/public", opts).await;
    assert_eq!(result.code(), Some("AUTH_TOKEN_EXPIRED"));

    let refresh_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/auth/refresh")
        .count();
    assert_eq!(refresh_calls, 0);
}
