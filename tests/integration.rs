use std::sync::Once;
use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use nexus_client::{ApiClient, Config, RequestOptions, codes};

static INIT: Once = Once::new();

fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

fn client(server_uri: &str) -> ApiClient {
    let mut config = Config::new(server_uri);
    config.verbose_errors = true;
    ApiClient::new(config).expect("client construction failed")
}

#[tokio::test]
async fn login_bootstrap_and_dashboard_flow() {
    init_logging();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "user": {"id": 7}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/csrf-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"csrf_token": "csrf-1"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dashboard/stats"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": {"total_members": 42}}))
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/listings"))
        .and(header("x-csrf-token", "csrf-1"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"data": {"id": 12}})))
        .mount(&server)
        .await;

    let api = client(&server.uri());
    let login = api.login("amira@example.org", "hunter2").await;
    assert!(login.is_success());
    assert!(api.tokens().access_token().is_some());

    let bootstrap = api.fetch_csrf_token().await;
    assert!(bootstrap.is_success());

    // Two concurrent identical reads resolve to the same data through one
    // network round trip.
    let (a, b) = tokio::join!(
        api.get::<Value>("/dashboard/stats"),
        api.get::<Value>("/dashboard/stats"),
    );
    assert!(a.is_success());
    assert_eq!(a, b);
    let stats_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/dashboard/stats")
        .count();
    assert_eq!(stats_calls, 1);

    let created = api
        .post::<Value>("/listings", &json!({"title": "Bike repair"}))
        .await;
    assert!(created.is_success());
}

#[tokio::test]
async fn expired_access_token_is_refreshed_transparently() {
    init_logging();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(|req: &Request| {
            match req
                .headers
                .get("authorization")
                .and_then(|h| h.to_str().ok())
            {
                Some("Bearer access-1") => {
                    ResponseTemplate::new(200).set_body_json(json!({"data": {"id": 7}}))
                }
                _ => ResponseTemplate::new(401).set_body_json(json!({
                    "error": "Token expired",
                    "code": "AUTH_TOKEN_EXPIRED"
                })),
            }
        })
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "access_token": "access-1",
            "refresh_token": "refresh-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server.uri());
    api.tokens().set_access_token("access-0");
    api.tokens().set_refresh_token("refresh-0");

    let me = api.get::<Value>("/me").await;
    assert!(me.is_success());
    assert_eq!(api.tokens().access_token().as_deref(), Some("access-1"));
    assert_eq!(api.tokens().refresh_token().as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn definitive_refresh_failure_signals_session_expiry() {
    init_logging();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "Token expired",
            "code": "AUTH_TOKEN_EXPIRED"
        })))
        .mount(&server)
        .await;
    // No refresh endpoint mounted: the refresh call comes back as a plain
    // failure and the session expires.

    let api = client(&server.uri());
    api.tokens().set_access_token("access-0");
    api.tokens().set_refresh_token("refresh-0");
    let mut expired = api.on_session_expired();

    let me = api.get::<Value>("/me").await;
    assert_eq!(me.code(), Some(codes::SESSION_EXPIRED));
    assert!(api.tokens().access_token().is_none());
    assert!(expired.try_recv().is_ok());
}

#[tokio::test]
async fn unauthenticated_options_reach_public_endpoints() {
    init_logging();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/tenants/resolve"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"tenant_id": "acme"}})),
        )
        .mount(&server)
        .await;

    let api = client(&server.uri());
    api.tokens().set_access_token("access-0");

    let opts = RequestOptions {
        skip_auth: true,
        ..RequestOptions::default()
    };
    let resolved = api.get_with::<Value>("/tenants/resolve", opts).await;
    assert!(resolved.is_success());
    assert_eq!(resolved.data().unwrap()["tenant_id"], json!("acme"));

    let request = &server.received_requests().await.unwrap()[0];
    assert!(request.headers.get("authorization").is_none());
}
