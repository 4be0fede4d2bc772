//! Integration tests for the REST backend adapter
//!
//! Runs the client against a local axum server that imitates the auth and row
//! endpoints closely enough to exercise request shape and error mapping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use whoami_client::backend::{AuthApi, HttpBackend, OtpType, SharedBackend};
use whoami_client::cache::{Cache, CacheLimits};
use whoami_client::services::device_tokens::Platform;
use whoami_client::{AppContext, AuthError, AuthStatus, ServiceError};

const EMAIL: &str = "ana@example.com";
const MFA_EMAIL: &str = "mfa@example.com";
const PASSWORD: &str = "correct-horse";
const ANON_KEY: &str = "anon-key";
const TOTP_CODE: &str = "123456";
const RECOVERY_CODE: &str = "654321";

// == Stub Server ==

fn user_json() -> Value {
    json!({
        "id": "u1",
        "email": EMAIL,
        "user_metadata": {"full_name": "Ana"},
        "created_at": "2024-01-01T00:00:00Z",
        "factors": []
    })
}

fn token_json(access: &str, refresh: &str) -> Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": 3600,
        "user": user_json()
    })
}

/// First-stage tokens of an account with a verified TOTP factor
fn pre_mfa_token_json() -> Value {
    let mut body = token_json("pre-mfa", "pre-mfa-refresh");
    body["user"]["factors"] = json!([{"id": "f1", "factor_type": "totp", "status": "verified"}]);
    body
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

async fn token(
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if headers.get("apikey").and_then(|v| v.to_str().ok()) != Some(ANON_KEY) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "No API key found in request"})));
    }
    match params.get("grant_type").map(String::as_str) {
        Some("password") if body["email"] == EMAIL && body["password"] == PASSWORD => {
            (StatusCode::OK, Json(token_json("access-1", "refresh-1")))
        }
        Some("password") if body["email"] == MFA_EMAIL && body["password"] == PASSWORD => {
            (StatusCode::OK, Json(pre_mfa_token_json()))
        }
        Some("refresh_token") if body["refresh_token"] == "refresh-1" => {
            (StatusCode::OK, Json(token_json("access-2", "refresh-2")))
        }
        Some("refresh_token") => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "code": 400,
                "error_code": "refresh_token_not_found",
                "msg": "Invalid Refresh Token: Refresh Token Not Found"
            })),
        ),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "code": 400,
                "error_code": "invalid_credentials",
                "msg": "Invalid login credentials"
            })),
        ),
    }
}

async fn user(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    match bearer(&headers) {
        Some("access-1") | Some("access-2") => (StatusCode::OK, Json(user_json())),
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": 401, "msg": "invalid JWT: unable to parse or verify signature"})),
        ),
    }
}

async fn logout() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn verify(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["email"] == EMAIL && body["token"] == RECOVERY_CODE && body["type"] == "recovery" {
        return (StatusCode::OK, Json(token_json("access-1", "refresh-1")));
    }
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "code": 403,
            "error_code": "otp_expired",
            "msg": "Token has expired or is invalid"
        })),
    )
}

fn pre_mfa_only(headers: &HeaderMap) -> Option<(StatusCode, Json<Value>)> {
    (bearer(headers) != Some("pre-mfa")).then(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": 401, "msg": "invalid JWT: unable to parse or verify signature"})),
        )
    })
}

async fn challenge(headers: HeaderMap, Path(factor_id): Path<String>) -> (StatusCode, Json<Value>) {
    if let Some(rejection) = pre_mfa_only(&headers) {
        return rejection;
    }
    if factor_id != "f1" {
        return (StatusCode::NOT_FOUND, Json(json!({"code": 404, "msg": "Factor not found"})));
    }
    (StatusCode::OK, Json(json!({"id": "ch1", "type": "totp", "expires_at": 1893456000})))
}

async fn verify_factor(
    headers: HeaderMap,
    Path(factor_id): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if let Some(rejection) = pre_mfa_only(&headers) {
        return rejection;
    }
    if factor_id == "f1" && body["challenge_id"] == "ch1" && body["code"] == TOTP_CODE {
        return (StatusCode::OK, Json(token_json("access-1", "refresh-1")));
    }
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "code": 422,
            "error_code": "mfa_verification_failed",
            "msg": "Invalid TOTP code entered"
        })),
    )
}

async fn device_tokens(
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if bearer(&headers) != Some("access-1") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"code": "PGRST301", "message": "JWT expired"})));
    }
    let merges = headers
        .get("prefer")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("resolution=merge-duplicates"));
    let well_formed = body["token"] == "device-abc" && body["user_id"] == "u1" && body["platform"] == "ios";
    if !merges || params.get("on_conflict").map(String::as_str) != Some("token") || !well_formed {
        return (
            StatusCode::CONFLICT,
            Json(json!({"code": "23505", "message": "duplicate key value violates unique constraint"})),
        );
    }
    (StatusCode::CREATED, Json(json!([body])))
}

async fn notifications(
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if bearer(&headers) != Some("access-1") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"code": "PGRST301", "message": "JWT expired"})));
    }
    let expected = [
        ("user_id", "eq.u1"),
        ("order", "created_at.desc"),
        ("select", "*"),
    ];
    for (name, value) in expected {
        if params.get(name).map(String::as_str) != Some(value) {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"code": "PGRST100", "message": format!("unexpected {} parameter", name)})),
            );
        }
    }
    (
        StatusCode::OK,
        Json(json!([
            {"id": "n2", "user_id": "u1", "title": "New column", "is_read": false, "created_at": "2024-01-02 09:00:00+00"},
            {"id": "n1", "user_id": "u1", "title": "Welcome", "is_read": true, "created_at": "2024-01-01 09:00:00.5+00"}
        ])),
    )
}

async fn missing_table() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "code": "42P01",
            "message": "relation \"public.weekly_columns\" does not exist",
            "details": null,
            "hint": null
        })),
    )
}

async fn spawn_stub() -> String {
    let app = Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/user", get(user))
        .route("/auth/v1/logout", post(logout))
        .route("/auth/v1/verify", post(verify))
        .route("/auth/v1/factors/:id/challenge", post(challenge))
        .route("/auth/v1/factors/:id/verify", post(verify_factor))
        .route("/rest/v1/device_tokens", post(device_tokens))
        .route("/rest/v1/notifications", get(notifications))
        .route("/rest/v1/weekly_columns", get(missing_table));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// == Helper Functions ==

async fn create_test_app() -> AppContext {
    let base_url = spawn_stub().await;
    let backend: SharedBackend =
        Arc::new(HttpBackend::new(base_url, ANON_KEY, Duration::from_secs(5)).unwrap());
    let cache = Cache::new(CacheLimits::bounded(100, 1 << 20), Duration::from_secs(300));
    AppContext::new(backend, cache, None)
}

// == Tests ==

#[tokio::test]
async fn test_sign_in_and_load_rows() {
    let app = create_test_app().await;

    let user = app.session.sign_in(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(user.id, "u1");
    assert_eq!(user.user_metadata["full_name"], "Ana");

    let items = app.notifications.load().await.unwrap();
    let ids: Vec<&str> = items.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["n2", "n1"]);
    assert_eq!(items[1].created_at.timestamp_subsec_millis(), 500);
    assert_eq!(app.notifications.unread_count(), 1);
}

#[tokio::test]
async fn test_bad_password_maps_to_invalid_credentials() {
    let app = create_test_app().await;

    let err = app.session.sign_in(EMAIL, "wrong-password").await.unwrap_err();

    assert_eq!(err, AuthError::InvalidCredentials);
    assert!(app.backend.session().await.is_none());
}

#[tokio::test]
async fn test_missing_table_maps_to_not_found() {
    let app = create_test_app().await;
    app.session.sign_in(EMAIL, PASSWORD).await.unwrap();

    let err = app.weekly_columns.load_latest(5).await.unwrap_err();

    assert!(matches!(err, ServiceError::NotFound(_)));
    assert!(matches!(app.weekly_columns.snapshot().error, Some(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn test_refresh_rotates_then_expires() {
    let app = create_test_app().await;
    app.session.sign_in(EMAIL, PASSWORD).await.unwrap();

    app.session.refresh().await.unwrap();
    assert_eq!(app.backend.session().await.unwrap().access_token, "access-2");
    assert!(app.session.is_authenticated());

    // The stub only honours the first refresh token
    assert!(app.session.refresh().await.is_err());
    assert_eq!(app.session.state().status, AuthStatus::Unauthenticated);
    assert!(app.backend.session().await.is_none());
}

#[tokio::test]
async fn test_realtime_is_unsupported_over_http() {
    let app = create_test_app().await;
    app.session.sign_in(EMAIL, PASSWORD).await.unwrap();

    let err = app.chat.subscribe("c1").await.unwrap_err();
    assert!(matches!(err, ServiceError::Unsupported(_)));
}

#[tokio::test]
async fn test_restore_and_sign_out() {
    let app = create_test_app().await;
    assert!(!app.session.restore().await);

    app.backend.sign_in(EMAIL, PASSWORD).await.unwrap();
    assert!(app.session.restore().await);
    assert_eq!(app.session.current_user().unwrap().email.as_deref(), Some(EMAIL));

    app.session.sign_out().await.unwrap();
    assert!(!app.session.is_authenticated());
    assert!(app.backend.session().await.is_none());
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    let backend: SharedBackend = Arc::new(
        HttpBackend::new("http://127.0.0.1:9", ANON_KEY, Duration::from_secs(2)).unwrap(),
    );
    let app = AppContext::new(
        backend,
        Cache::new(CacheLimits::unbounded(), Duration::from_secs(60)),
        None,
    );

    let err = app.session.sign_in(EMAIL, PASSWORD).await.unwrap_err();
    assert!(matches!(err, AuthError::Network(_)));
}

#[tokio::test]
async fn test_mfa_sign_in_holds_no_session_until_verified() {
    let app = create_test_app().await;

    let err = app.session.sign_in(MFA_EMAIL, PASSWORD).await.unwrap_err();
    assert_eq!(err, AuthError::MfaRequired { factor_id: "f1".into() });
    assert_eq!(
        app.session.state().status,
        AuthStatus::AwaitingMfa { factor_id: "f1".into() }
    );

    // The first-stage token must not reach the row API
    assert!(app.backend.session().await.is_none());
    assert_eq!(app.notifications.load().await, Err(ServiceError::Unauthorized));
    assert!(!app.session.restore().await);
    assert!(!app.session.is_authenticated());
}

#[tokio::test]
async fn test_mfa_challenge_and_verify() {
    let app = create_test_app().await;
    app.session.sign_in(MFA_EMAIL, PASSWORD).await.unwrap_err();

    assert_eq!(app.session.verify_mfa("000000").await, Err(AuthError::InvalidOtp));
    assert!(app.backend.session().await.is_none());

    let user = app.session.verify_mfa(TOTP_CODE).await.unwrap();
    assert_eq!(user.id, "u1");
    assert!(app.session.is_authenticated());
    assert_eq!(app.backend.session().await.unwrap().access_token, "access-1");
    assert_eq!(app.notifications.load().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_verify_otp_over_http() {
    let app = create_test_app().await;

    let err = app
        .session
        .verify_otp(EMAIL, "000000", OtpType::Recovery)
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::InvalidOtp);
    assert!(!app.session.is_authenticated());

    app.session
        .verify_otp(EMAIL, RECOVERY_CODE, OtpType::Recovery)
        .await
        .unwrap();
    assert!(app.session.is_authenticated());
    assert_eq!(app.backend.session().await.unwrap().refresh_token, "refresh-1");
}

#[tokio::test]
async fn test_deep_link_sets_session_over_http() {
    let app = create_test_app().await;

    let (user, kind) = app
        .session
        .handle_deep_link("whoami://reset-password#access_token=access-2&refresh_token=refresh-2&type=recovery")
        .await
        .unwrap();

    assert_eq!(user.id, "u1");
    assert_eq!(kind, Some(OtpType::Recovery));
    assert_eq!(app.backend.session().await.unwrap().access_token, "access-2");

    let err = app
        .session
        .handle_deep_link("whoami://reset-password?access_token=forged&refresh_token=x")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Unknown(_)));
    assert!(!app.session.is_authenticated());
}

#[tokio::test]
async fn test_device_token_upsert_over_http() {
    let app = create_test_app().await;
    app.session.sign_in(EMAIL, PASSWORD).await.unwrap();

    app.device_tokens.register(" device-abc ", Platform::Ios).await.unwrap();

    let err = app
        .device_tokens
        .register("other-device", Platform::Ios)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidData(_)));
}
