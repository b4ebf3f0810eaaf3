use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{FromRef, State};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use common_auth::{
    require_auth, require_permission, PermissionStore, RequiredPermission, TokenCodec,
};
use common_http_errors::ApiError;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::auth_handlers::{change_password, login, logout, refresh, verify_two_factor};
use crate::metrics::AuthMetrics;
use crate::mfa_handlers::{enable_two_factor, setup_two_factor};
use crate::roles_handlers::{
    list_permissions, list_role_permissions, list_roles, update_role_permissions,
    PERMISSION_ROLE_UPDATE, PERMISSION_ROLE_VIEW,
};
use crate::service::AuthService;
use crate::store::RoleStore;

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub codec: Arc<TokenCodec>,
    pub permissions: Arc<dyn PermissionStore>,
    pub roles: Arc<dyn RoleStore>,
    pub metrics: Arc<AuthMetrics>,
}

impl FromRef<AppState> for Arc<TokenCodec> {
    fn from_ref(state: &AppState) -> Self {
        state.codec.clone()
    }
}

impl AppState {
    fn guard(&self, permission: &str) -> RequiredPermission {
        RequiredPermission::new(self.permissions.clone(), permission)
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(response) => response,
        Err(err) => {
            error!(error = ?err, "failed to render metrics");
            ApiError::internal().into_response()
        }
    }
}

pub fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("Invalid CORS origin '{origin}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION]))
}

pub fn build_router(state: AppState, cors: Option<CorsLayer>) -> Router {
    let require_bearer = from_fn_with_state(state.codec.clone(), require_auth);

    let public = Router::new()
        .route("/token", post(login))
        .route("/refresh", post(refresh))
        .route("/verify_2fa", post(verify_two_factor));

    let protected = Router::new()
        .route("/logout", post(logout))
        .route("/change_password", post(change_password))
        .route("/setup_2fa", post(setup_two_factor))
        .route("/enable_2fa", post(enable_two_factor))
        .route_layer(require_bearer.clone());

    let view_roles = from_fn_with_state(state.guard(PERMISSION_ROLE_VIEW), require_permission);
    let update_roles = from_fn_with_state(state.guard(PERMISSION_ROLE_UPDATE), require_permission);

    let roles = Router::new()
        .route("/roles", get(list_roles).route_layer(view_roles.clone()))
        .route(
            "/permissions",
            get(list_permissions).route_layer(view_roles.clone()),
        )
        .route(
            "/roles/:role_id/permissions",
            get(list_role_permissions)
                .route_layer(view_roles)
                .merge(post(update_role_permissions).route_layer(update_roles)),
        )
        .route_layer(require_bearer);

    let router = Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .nest("/auth", public.merge(protected))
        .merge(roles)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    match cors {
        Some(layer) => router.layer(layer),
        None => router,
    }
}
