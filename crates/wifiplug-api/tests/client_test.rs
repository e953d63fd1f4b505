// Integration tests for `ApiClient` using wiremock.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wifiplug_api::models::{DeviceEdit, DeviceResults};
use wifiplug_api::{
    ApiClient, ApiKeys, Authentication, Cursor, Error, OAuth2Auth, RequestBody,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn builder(server: &MockServer) -> wifiplug_api::ApiClientBuilder {
    ApiClient::builder()
        .base_url(format!("{}/v1.0/", server.uri()))
        .api_keys(ApiKeys::new("test-key", "test-secret"))
        .retry_delay(Duration::ZERO)
}

async fn setup() -> (MockServer, ApiClient) {
    let server = MockServer::start().await;
    let client = builder(&server).build().unwrap();
    (server, client)
}

fn oauth2_client(server: &MockServer) -> ApiClient {
    let oauth = OAuth2Auth::new("client-1", "client-secret", "old-access", Some("refresh-1".into()))
        .with_base_url(format!("{}/oauth2", server.uri()));
    builder(server)
        .authentication(Authentication::OAuth2(oauth))
        .build()
        .unwrap()
}

fn error_body(code: &str, message: &str) -> serde_json::Value {
    json!({ "errors": [{ "error": code, "message": message }] })
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

fn none() -> CancellationToken {
    CancellationToken::new()
}

// ── Retry ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bad_gateway_is_retried_until_success() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/user"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uuid": Uuid::new_v4(),
            "username": "alice",
        })))
        .mount(&server)
        .await;

    let user = client.current_user(&none()).await.unwrap();

    assert_eq!(user.username.as_deref(), Some("alice"));
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn test_bad_gateway_exhausts_retry_count() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/session"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
        .mount(&server)
        .await;

    let err = client.current_session(&none()).await.unwrap_err();

    assert!(
        matches!(err, Error::InvalidServerResponse { status: StatusCode::BAD_GATEWAY, .. }),
        "{err:?}"
    );
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn test_retry_waits_between_attempts() {
    let server = MockServer::start().await;
    let client = builder(&server)
        .retry_count(3)
        .retry_delay(Duration::from_millis(100))
        .build()
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/v1.0/ping"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    let started = Instant::now();
    let body = client.ping(&none()).await.unwrap();

    assert_eq!(body, "pong");
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_other_failures_are_not_retried() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/device/00000000-0000-0000-0000-000000000001"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(error_body("not_found", "No such device")),
        )
        .mount(&server)
        .await;

    let err = client
        .get_device(Uuid::from_u128(1), &none())
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "API error (HTTP 404 Not Found): No such device");
    assert_eq!(err.errors()[0].code, "not_found");
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_truncated_failure_body_is_transport_error() {
    // Answers every request with a 502 whose body is cut off mid-stream.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut request = Vec::new();
            let mut buf = [0_u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let _ = stream
                .write_all(
                    b"HTTP/1.1 502 Bad Gateway\r\n\
                      Content-Type: application/json\r\n\
                      Content-Length: 100\r\n\r\n\
                      {\"errors\":",
                )
                .await;
            let _ = stream.shutdown().await;
        }
    });

    let client = ApiClient::builder()
        .base_url(format!("http://{addr}/v1.0/"))
        .retry_delay(Duration::ZERO)
        .build()
        .unwrap();

    let err = client.ping(&none()).await.unwrap_err();

    assert!(matches!(err, Error::Transport(_)), "{err:?}");
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

// ── Reauthorization ─────────────────────────────────────────────────

#[tokio::test]
async fn test_unauthorized_without_authentication_surfaces() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/user"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(error_body("invalid_api_keys", "Bad keys")),
        )
        .mount(&server)
        .await;

    let err = client.current_user(&none()).await.unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(err.api_error_code(), Some("invalid_api_keys"));
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_static_bearer_does_not_retry_unauthorized() {
    let server = MockServer::start().await;
    let client = builder(&server)
        .authentication(Authentication::bearer("static"))
        .build()
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/v1.0/user"))
        .and(header("Authorization", "Bearer static"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body("access_expired", "")))
        .mount(&server)
        .await;

    let err = client.current_user(&none()).await.unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(err.to_string(), "API error (HTTP 401 Unauthorized): Unspecified error");
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_oauth2_refreshes_once_and_retries() {
    let server = MockServer::start().await;
    let client = oauth2_client(&server);
    let mut reauthorized = client.subscribe_reauthorized();

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "refresh_token": "refresh-2",
            "expires_in": 3600,
            "token_type": "bearer",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/user"))
        .and(header("Authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body("access_expired", "expired")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/user"))
        .and(header("Authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "uuid": Uuid::new_v4() })))
        .mount(&server)
        .await;

    client.current_user(&none()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let token_request = requests
        .iter()
        .find(|r| r.url.path() == "/oauth2/token")
        .unwrap();
    let form = String::from_utf8(token_request.body.clone()).unwrap();
    assert!(form.contains("grant_type=refresh_token"), "{form}");
    assert!(form.contains("refresh_token=refresh-1"), "{form}");

    let Some(Authentication::OAuth2(current)) = client.authentication().await else {
        panic!("expected OAuth2 authentication");
    };
    assert_eq!(current.access_token().expose_secret(), "new-access");
    assert_eq!(current.refresh_token().unwrap().expose_secret(), "refresh-2");

    let broadcast = reauthorized.try_recv().unwrap();
    assert!(matches!(broadcast, Authentication::OAuth2(_)));
}

#[tokio::test]
async fn test_second_unauthorized_after_refresh_surfaces() {
    let server = MockServer::start().await;
    let client = oauth2_client(&server);

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "new-access" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/user"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body("access_expired", "expired")))
        .expect(2)
        .mount(&server)
        .await;

    let err = client.current_user(&none()).await.unwrap_err();

    assert!(err.is_unauthorized());
    // The refresh response had no refresh token, so the old one is kept.
    let Some(Authentication::OAuth2(current)) = client.authentication().await else {
        panic!("expected OAuth2 authentication");
    };
    assert_eq!(current.refresh_token().unwrap().expose_secret(), "refresh-1");
}

#[tokio::test]
async fn test_failed_refresh_surfaces_original_unauthorized() {
    let server = MockServer::start().await;
    let client = oauth2_client(&server);

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body("invalid_grant", "revoked")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/user"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body("access_expired", "expired")))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.current_user(&none()).await.unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(err.api_error_code(), Some("access_expired"));
}

#[tokio::test]
async fn test_reauthorize_does_not_consume_retry_count() {
    let server = MockServer::start().await;
    let oauth = OAuth2Auth::new("client-1", "client-secret", "old-access", Some("refresh-1".into()))
        .with_base_url(format!("{}/oauth2", server.uri()));
    let client = builder(&server)
        .retry_count(2)
        .authentication(Authentication::OAuth2(oauth))
        .build()
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "new-access" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/ping"))
        .and(header("Authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/ping"))
        .and(header("Authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    // 401 -> refresh -> 502 -> retry -> 200, within two attempts.
    assert_eq!(client.ping(&none()).await.unwrap(), "pong");
}

#[tokio::test]
async fn test_concurrent_unauthorized_requests_refresh_once() {
    let server = MockServer::start().await;
    let client = oauth2_client(&server);

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "new-access" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/ping"))
        .and(header("Authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/ping"))
        .and(header("Authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    let cancel = none();
    let (a, b) = tokio::join!(client.ping(&cancel), client.ping(&cancel));

    assert_eq!(a.unwrap(), "pong");
    assert_eq!(b.unwrap(), "pong");
}

// ── Request shape ───────────────────────────────────────────────────

#[tokio::test]
async fn test_credentials_and_client_headers_are_sent() {
    let server = MockServer::start().await;
    let client = builder(&server)
        .authentication(Authentication::session("sess-1"))
        .build()
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/v1.0/session"))
        .and(header("X-API-Key", "test-key"))
        .and(header("X-API-Secret", "test-secret"))
        .and(header("X-Session-Token", "sess-1"))
        .and(header_exists("X-API-Client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "sess-1",
            "expires_at": "2026-12-01T00:00:00Z",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = client.current_session(&none()).await.unwrap();

    assert_eq!(session.session_token, "sess-1");
    assert!(session.expires_at.is_some());
}

#[tokio::test]
async fn test_get_never_sends_a_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    let body = RequestBody::json(&json!({ "ignored": true })).unwrap();
    client
        .request(Method::GET, "ping", Some(body), &none())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].body.is_empty());
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let (server, client) = setup().await;
    let device = Uuid::new_v4();
    let service = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path(format!("/v1.0/device/{device}/service/{service}/control")))
        .and(body_json(json!({ "state": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": true })))
        .expect(1)
        .mount(&server)
        .await;

    let control = client
        .control_device_service(device, service, true, &none())
        .await
        .unwrap();

    assert!(control.state);
}

#[tokio::test]
async fn test_edit_device_round_trip() {
    let (server, client) = setup().await;
    let device = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path(format!("/v1.0/device/{device}")))
        .and(body_json(json!({ "name": "Heater" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uuid": device,
            "name": "Heater",
            "is_online": true,
        })))
        .mount(&server)
        .await;

    let edit = DeviceEdit {
        name: Some("Heater".into()),
    };
    let updated = client.edit_device(device, &edit, &none()).await.unwrap();

    assert_eq!(updated.uuid, device);
    assert_eq!(updated.name.as_deref(), Some("Heater"));
}

// ── Response handling ───────────────────────────────────────────────

#[tokio::test]
async fn test_non_json_content_type_is_invalid_server_response() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/user"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
        .mount(&server)
        .await;

    let err = client.current_user(&none()).await.unwrap_err();

    assert!(
        matches!(err, Error::InvalidServerResponse { status: StatusCode::OK, .. }),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_malformed_json_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/user"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{\"uuid\": 42", "application/json"))
        .mount(&server)
        .await;

    let err = client.current_user(&none()).await.unwrap_err();

    let Error::Deserialization { body, .. } = err else {
        panic!("expected Deserialization error, got {err:?}");
    };
    assert_eq!(body, "{\"uuid\": 42");
}

#[tokio::test]
async fn test_delete_ignores_response_body() {
    let (server, client) = setup().await;
    let group = Uuid::new_v4();

    Mock::given(method("DELETE"))
        .and(path(format!("/v1.0/group/{group}")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client.delete_group(group, &none()).await.unwrap();
}

// ── Cancellation ────────────────────────────────────────────────────

#[tokio::test]
async fn test_cancelled_call_makes_no_request() {
    let (server, client) = setup().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client.current_user(&cancel).await.unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(request_count(&server).await, 0);
}

#[tokio::test]
async fn test_cancellation_interrupts_retry_delay() {
    let server = MockServer::start().await;
    let client = builder(&server)
        .retry_delay(Duration::from_secs(30))
        .build()
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/v1.0/ping"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = client.ping(&cancel).await.unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(request_count(&server).await, 1);
}

// ── Pagination ──────────────────────────────────────────────────────

fn device_page(names: &[&str], cursor: Option<&str>, total: usize) -> serde_json::Value {
    let devices: Vec<_> = names
        .iter()
        .map(|name| json!({ "uuid": Uuid::new_v4(), "name": name }))
        .collect();
    json!({ "devices": devices, "cursor": cursor, "total_device_count": total })
}

#[tokio::test]
async fn test_list_all_walks_every_page_in_order() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/device"))
        .and(query_param("cursor", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_page(&["c", "d"], Some("page 3"), 5)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/device"))
        .and(query_param("cursor", "page 3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_page(&["e"], None, 5)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/device"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_page(&["a", "b"], Some("page-2"), 5)))
        .mount(&server)
        .await;

    let devices = client
        .list_all_with_limit::<DeviceResults>("device", 2, &none())
        .await
        .unwrap();

    let names: Vec<_> = devices.iter().filter_map(|d| d.name.as_deref()).collect();
    assert_eq!(names, ["a", "b", "c", "d", "e"]);
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn test_scan_returns_one_page() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/group"))
        .and(query_param("limit", "50"))
        .and(query_param("cursor", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "groups": [{ "uuid": Uuid::new_v4(), "name": "Lounge", "item_count": 2 }],
            "cursor": "def",
            "total_group_count": 7,
        })))
        .mount(&server)
        .await;

    let page = client
        .scan_groups(50, &Cursor::new("abc"), &none())
        .await
        .unwrap();

    assert_eq!(page.total, 7);
    assert_eq!(page.entities.len(), 1);
    assert_eq!(page.cursor, Cursor::new("def"));
}

#[tokio::test]
async fn test_scan_limit_out_of_range_makes_no_request() {
    let (server, client) = setup().await;

    for limit in [0, 51] {
        let err = client
            .scan_devices(limit, &Cursor::END, &none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LimitOutOfRange { .. }), "{err:?}");
    }

    assert_eq!(request_count(&server).await, 0);
}
