#![allow(dead_code)]

pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use auth_service::app::{build_router, AppState};
use auth_service::metrics::AuthMetrics;
use auth_service::mfa::totp_code_at;
use auth_service::service::{AuthService, AuthSettings};
use auth_service::tokens::TokenIssuer;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Duration;
use common_auth::{JwtConfig, TokenCodec};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

pub use memory::MemoryStore;

pub const ACCESS_SECRET: &str = "access-secret-access-secret-0123456789";
pub const REFRESH_SECRET: &str = "refresh-secret-refresh-secret-0123456789";
pub const TWO_FA_SECRET: &str = "twofa-secret-twofa-secret-0123456789ab";

pub const USER_EMAIL: &str = "a@b.com";
pub const USER_PASSWORD: &str = "t2aha000";

pub fn codec() -> Arc<TokenCodec> {
    Arc::new(
        TokenCodec::new(&JwtConfig::new(
            "maicare",
            ACCESS_SECRET,
            REFRESH_SECRET,
            TWO_FA_SECRET,
        ))
        .expect("codec"),
    )
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub codec: Arc<TokenCodec>,
    pub metrics: Arc<AuthMetrics>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(false)
    }

    pub fn with_rotation() -> Self {
        Self::build(true)
    }

    fn build(rotate_refresh_tokens: bool) -> Self {
        let store = Arc::new(MemoryStore::default());
        let codec = codec();
        let tokens = TokenIssuer::new(
            codec.clone(),
            Duration::minutes(15),
            Duration::hours(24),
            Duration::minutes(5),
        );
        let auth = AuthService::new(
            store.clone(),
            tokens,
            AuthSettings {
                totp_issuer: "Maicare".to_string(),
                recovery_code_count: 10,
                rotate_refresh_tokens,
            },
        );
        let metrics = Arc::new(AuthMetrics::new().expect("metrics"));
        let state = AppState {
            auth: Arc::new(auth),
            codec: codec.clone(),
            permissions: store.clone(),
            roles: store.clone(),
            metrics: metrics.clone(),
        };

        Self {
            router: build_router(state, None),
            store,
            codec,
            metrics,
        }
    }

    /// Seed the canonical active, non-2FA user and return its id and role.
    pub fn seed_user(&self) -> (i64, i32) {
        let role_id = self.store.add_role("staff");
        let user_id = self.store.insert_user(USER_EMAIL, USER_PASSWORD, role_id);
        (user_id, role_id)
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        send(&self.router, request).await
    }

    pub async fn post(&self, uri: &str, body: Value, bearer: Option<&str>) -> (StatusCode, Value) {
        self.send(json_request(Method::POST, uri, Some(body), bearer))
            .await
    }

    pub async fn get(&self, uri: &str, bearer: Option<&str>) -> (StatusCode, Value) {
        self.send(json_request(Method::GET, uri, None, bearer)).await
    }

    /// Log in and return `(access, refresh)`.
    pub async fn login(&self, email: &str, password: &str) -> (String, String) {
        let (status, body) = self
            .post(
                "/auth/token",
                serde_json::json!({ "email": email, "password": password }),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        (
            body["data"]["access"].as_str().expect("access").to_string(),
            body["data"]["refresh"].as_str().expect("refresh").to_string(),
        )
    }
}

pub fn json_request(
    method: Method,
    uri: &str,
    body: Option<Value>,
    bearer: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("user-agent", "integration-test")
        .header("x-forwarded-for", "203.0.113.9");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    builder.body(body).expect("request")
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

pub fn current_totp(secret: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs();
    totp_code_at(secret, now).expect("totp")
}
