//! Tests for the client-side token coordinator.
//!
//! A mock server with an instrumented refresh endpoint pins down the
//! single-flight property; the remaining tests run the client against a
//! real server instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use doorman::client::{AuthClient, ClientError, Tokens};
use doorman::{ServerConfig, db::Database, start_server};

// =============================================================================
// Mock server
// =============================================================================

/// Tracks which access token is currently valid and counts refresh calls.
#[derive(Clone)]
struct MockState {
    valid_access: Arc<std::sync::Mutex<String>>,
    refresh_calls: Arc<AtomicUsize>,
    refresh_fails: bool,
    rotate_refresh: bool,
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn mock_protected(State(state): State<MockState>, headers: HeaderMap) -> StatusCode {
    let valid = state.valid_access.lock().unwrap().clone();
    match bearer(&headers) {
        Some(token) if token == valid => StatusCode::OK,
        _ => StatusCode::UNAUTHORIZED,
    }
}

async fn mock_refresh(
    State(state): State<MockState>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    let n = state.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;

    if state.refresh_fails || bearer(&headers).is_none() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "session_expired" })),
        );
    }

    let new_access = format!("access-{}", n);
    *state.valid_access.lock().unwrap() = new_access.clone();

    let body = if state.rotate_refresh {
        serde_json::json!({ "accessToken": new_access, "refreshToken": format!("refresh-{}", n) })
    } else {
        serde_json::json!({ "accessToken": new_access })
    };
    (StatusCode::OK, Json(body))
}

/// Start a mock server. The initially valid access token is "access-0".
async fn start_mock(refresh_fails: bool, rotate_refresh: bool) -> (String, MockState) {
    let state = MockState {
        valid_access: Arc::new(std::sync::Mutex::new("access-0".to_string())),
        refresh_calls: Arc::new(AtomicUsize::new(0)),
        refresh_fails,
        rotate_refresh,
    };

    let app = Router::new()
        .route("/protected", get(mock_protected))
        .route("/auth/refresh", post(mock_refresh))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (format!("http://{}", addr), state)
}

fn stale_tokens() -> Tokens {
    Tokens {
        access: "stale-access".to_string(),
        refresh: "valid-refresh".to_string(),
    }
}

// =============================================================================
// Single-flight
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_401s_trigger_exactly_one_refresh() {
    let (base_url, state) = start_mock(false, false).await;
    let client = AuthClient::new(base_url).unwrap();
    client.restore(stale_tokens());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let client = client.clone();
        handles.push(tokio::spawn(async move { client.get("/protected").await }));
    }

    for handle in handles {
        let response = handle.await.unwrap().expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sequential_401s_refresh_once_each() {
    let (base_url, state) = start_mock(false, false).await;
    let client = AuthClient::new(base_url).unwrap();
    client.restore(stale_tokens());

    let response = client.get("/protected").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);

    // The refreshed access token is cached; no further refresh needed
    let response = client.get("/protected").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);

    // Server-side invalidation forces one more
    *state.valid_access.lock().unwrap() = "rotated-elsewhere".to_string();
    let response = client.get("/protected").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_refresh_clears_credentials() {
    let (base_url, state) = start_mock(true, false).await;
    let client = AuthClient::new(base_url).unwrap();
    client.restore(stale_tokens());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move { client.get("/protected").await }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ClientError::Unauthorized)));
    }

    // One failed exchange was enough to tear everything down
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(client.tokens().is_none());

    // Later requests fail immediately without touching the network
    let calls_before = state.refresh_calls.load(Ordering::SeqCst);
    assert!(matches!(
        client.get("/protected").await,
        Err(ClientError::Unauthorized)
    ));
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), calls_before);
}

#[tokio::test]
async fn test_refresh_without_rotation_keeps_refresh_token() {
    let (base_url, _state) = start_mock(false, false).await;
    let client = AuthClient::new(base_url).unwrap();
    client.restore(stale_tokens());

    client.get("/protected").await.unwrap();

    let tokens = client.tokens().unwrap();
    assert_eq!(tokens.access, "access-1");
    // Server did not rotate, so the old refresh token stays
    assert_eq!(tokens.refresh, "valid-refresh");
}

#[tokio::test]
async fn test_refresh_with_rotation_replaces_refresh_token() {
    let (base_url, _state) = start_mock(false, true).await;
    let client = AuthClient::new(base_url).unwrap();
    client.restore(stale_tokens());

    client.get("/protected").await.unwrap();

    let tokens = client.tokens().unwrap();
    assert_eq!(tokens.access, "access-1");
    assert_eq!(tokens.refresh, "refresh-1");
}

#[tokio::test]
async fn test_unauthenticated_client_rejects_requests() {
    let (base_url, state) = start_mock(false, false).await;
    let client = AuthClient::new(base_url).unwrap();

    assert!(matches!(
        client.get("/protected").await,
        Err(ClientError::Unauthorized)
    ));
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Against the real server
// =============================================================================

async fn start_real_server() -> String {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let config = ServerConfig {
        db,
        access_secret: b"access-secret-for-testing-0000000".to_vec(),
        refresh_secret: b"refresh-secret-for-testing-00000".to_vec(),
        secure_cookies: false,
        admin_key: None,
    };

    let (_handle, addr) = start_server(config, 0).await;
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_register_login_and_authenticated_request() {
    let base_url = start_real_server().await;
    let client = AuthClient::new(base_url.clone()).unwrap();

    let user = client
        .register("ada@example.com", "Ada", "Byron", "a-long-enough-password")
        .await
        .unwrap();
    assert_eq!(user.email, "ada@example.com");
    assert_eq!(user.role, "user");

    let response = client.get("/auth/sessions").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A second client logs into the same account
    let other = AuthClient::new(base_url).unwrap();
    let user = other
        .login("ada@example.com", "a-long-enough-password")
        .await
        .unwrap();
    assert_eq!(user.email, "ada@example.com");
}

#[tokio::test]
async fn test_login_failure_surfaces_api_error() {
    let base_url = start_real_server().await;
    let client = AuthClient::new(base_url).unwrap();

    let result = client.login("nobody@example.com", "wrong password!").await;
    match result {
        Err(ClientError::Api { status, .. }) => {
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        other => panic!("Expected Api error, got {:?}", other.map(|_| ())),
    }
    assert!(client.tokens().is_none());
}

#[tokio::test]
async fn test_restored_refresh_token_recovers_session() {
    let base_url = start_real_server().await;
    let client = AuthClient::new(base_url.clone()).unwrap();
    client
        .register("ada@example.com", "Ada", "Byron", "a-long-enough-password")
        .await
        .unwrap();
    let tokens = client.tokens().unwrap();

    // A fresh client restores persisted credentials, but the access token
    // has gone bad; the first request must refresh and succeed.
    let restored = AuthClient::new(base_url).unwrap();
    restored.restore(Tokens {
        access: "no-longer-valid".to_string(),
        refresh: tokens.refresh,
    });

    let response = restored.get("/auth/sessions").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_logout_revokes_session_on_server() {
    let base_url = start_real_server().await;
    let client = AuthClient::new(base_url.clone()).unwrap();
    client
        .register("ada@example.com", "Ada", "Byron", "a-long-enough-password")
        .await
        .unwrap();
    let tokens = client.tokens().unwrap();

    client.logout().await.unwrap();
    assert!(client.tokens().is_none());
    assert!(matches!(
        client.get("/auth/sessions").await,
        Err(ClientError::Unauthorized)
    ));

    // The refresh token was revoked server-side, not just forgotten:
    // restoring it cannot resurrect the session
    let restored = AuthClient::new(base_url).unwrap();
    restored.restore(Tokens {
        access: "no-longer-valid".to_string(),
        refresh: tokens.refresh,
    });
    assert!(matches!(
        restored.get("/auth/sessions").await,
        Err(ClientError::Unauthorized)
    ));
}
