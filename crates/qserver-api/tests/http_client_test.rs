// Integration tests for `HttpRunEngine` using wiremock.

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use qserver_api::models::PlansAllowedResponse;
use qserver_api::{Error, HttpRunEngine, RunEngineService, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, HttpRunEngine) {
    let server = MockServer::start().await;
    let client = HttpRunEngine::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    (server, client)
}

// ── Status ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_status() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "msg": "RE Manager v0.0.19",
            "manager_state": "idle",
            "items_in_queue": 2,
            "worker_environment_exists": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let status = client.status().await.unwrap();
    assert_eq!(status.manager_state, "idle");
    assert_eq!(status.items_in_queue(), Some(2));
    assert!(status.worker_environment_exists());
}

#[tokio::test]
async fn test_status_retries_transient_failure() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "manager_state": "paused" })))
        .mount(&server)
        .await;

    let status = client.status().await.unwrap();
    assert_eq!(status.manager_state, "paused");
}

#[tokio::test]
async fn test_status_does_not_retry_client_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.status().await.unwrap_err();
    assert!(matches!(err, Error::Http { status: 401, .. }), "got {err:?}");
}

#[tokio::test]
async fn test_status_malformed_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client.status().await.unwrap_err();
    match err {
        Error::Deserialization { body, .. } => assert_eq!(body, "<html>oops</html>"),
        other => panic!("expected deserialization error, got {other:?}"),
    }
}

// ── Allowed plans ───────────────────────────────────────────────────

#[tokio::test]
async fn test_plans_allowed() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/plans/allowed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "msg": "",
            "plans_allowed": {
                "count": { "name": "count", "parameters": [{ "name": "detectors" }] }
            },
            "plans_allowed_uid": "4c1f"
        })))
        .mount(&server)
        .await;

    let raw = client.plans_allowed_raw().await.unwrap();
    assert_eq!(raw["success"], json!(true));

    let plans = PlansAllowedResponse::from_raw(raw).unwrap().into_plans().unwrap();
    assert_eq!(plans.keys().collect::<Vec<_>>(), vec!["count"]);
}

// ── Auth header ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_api_key_header_is_sent() {
    let server = MockServer::start().await;
    let transport = TransportConfig {
        api_key: Some(secrecy::SecretString::from("abc123".to_string())),
        ..TransportConfig::default()
    };
    let limiter = std::sync::Arc::new(qserver_api::RateLimiter::new(5.0).unwrap());
    let client = HttpRunEngine::new(server.uri().parse().unwrap(), &transport, limiter).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/status"))
        .and(header("authorization", "ApiKey abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "manager_state": "idle" })))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(client.status().await.unwrap().manager_state, "idle");
}
