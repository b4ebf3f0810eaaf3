use std::convert::Infallible;
use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::{header::USER_AGENT, request::Parts, HeaderMap};
use common_auth::AuthContext;
use common_http_errors::{ApiError, ApiResponse, ApiResult, ValidatedJson};
use serde::{Deserialize, Serialize};
use tracing::error;
use validator::Validate;

use crate::service::{ClientInfo, LoginOutcome, ServiceError};
use crate::AppState;

impl From<ServiceError> for ApiError {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::InvalidInput(message) => ApiError::InvalidInput(message),
            ServiceError::NotFound(message) => ApiError::NotFound(message),
            ServiceError::Unauthorized(message) => ApiError::Unauthorized(message),
            ServiceError::AccountDisabled => {
                ApiError::Conflict(ServiceError::AccountDisabled.to_string())
            }
            ServiceError::Conflict(message) => ApiError::Conflict(message),
            ServiceError::Internal(err) => {
                error!(error = ?err, "auth service failure");
                ApiError::internal()
            }
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Ok(ClientInfo {
            ip_address: client_ip(&parts.headers)
                .or(peer)
                .unwrap_or_else(|| "unknown".to_string()),
            user_agent: header_str(&parts.headers, USER_AGENT.as_str())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|value| {
            value
                .split(',')
                .map(str::trim)
                .find(|part| !part.is_empty())
                .map(str::to_string)
        })
        .or_else(|| header_str(headers, "x-real-ip"))
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub refresh: Option<String>,
    pub access: Option<String>,
    pub requires_2fa: bool,
    pub temp_token: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> ApiResult<ApiResponse<LoginResponse>> {
    let outcome = state
        .auth
        .login(&payload.email, &payload.password, &client)
        .await
        .map_err(|err| {
            state.metrics.login_attempt(login_failure_label(&err));
            ApiError::from(err)
        })?;

    match outcome {
        LoginOutcome::Authenticated(tokens) => {
            state.metrics.login_attempt("success");
            Ok(ApiResponse::new(
                LoginResponse {
                    refresh: Some(tokens.refresh),
                    access: Some(tokens.access),
                    requires_2fa: false,
                    temp_token: None,
                },
                "login successful",
            ))
        }
        LoginOutcome::TwoFactorRequired { temp_token } => {
            state.metrics.login_attempt("2fa_required");
            Ok(ApiResponse::new(
                LoginResponse {
                    refresh: None,
                    access: None,
                    requires_2fa: true,
                    temp_token: Some(temp_token),
                },
                "2FA required",
            ))
        }
    }
}

fn login_failure_label(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::NotFound(_) => "unknown_user",
        ServiceError::Unauthorized(_) => "bad_password",
        ServiceError::AccountDisabled => "disabled",
        _ => "error",
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RefreshRequest>,
) -> ApiResult<ApiResponse<RefreshResponse>> {
    let refreshed = state.auth.refresh(&payload.token).await.map_err(|err| {
        let outcome = match err {
            ServiceError::Internal(_) => "error",
            _ => "rejected",
        };
        state.metrics.token_refresh(outcome);
        ApiError::from(err)
    })?;

    state.metrics.token_refresh(if refreshed.refresh.is_some() {
        "rotated"
    } else {
        "success"
    });

    Ok(ApiResponse::new(
        RefreshResponse {
            access: refreshed.access,
            refresh: refreshed.refresh,
        },
        "access token refreshed successfully",
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyTwoFactorRequest {
    #[validate(length(min = 1))]
    pub validation_code: String,
    #[validate(length(min = 1))]
    pub temp_token: String,
}

#[derive(Debug, Serialize)]
pub struct SessionTokensResponse {
    pub access: String,
    pub refresh: String,
}

pub async fn verify_two_factor(
    State(state): State<AppState>,
    client: ClientInfo,
    ValidatedJson(payload): ValidatedJson<VerifyTwoFactorRequest>,
) -> ApiResult<ApiResponse<SessionTokensResponse>> {
    let tokens = state
        .auth
        .verify_two_factor(&payload.validation_code, &payload.temp_token, &client)
        .await
        .map_err(|err| {
            state.metrics.two_factor_event("verify_rejected");
            ApiError::from(err)
        })?;

    state.metrics.two_factor_event("verified");
    state.metrics.login_attempt("success");
    Ok(ApiResponse::new(
        SessionTokensResponse {
            access: tokens.access,
            refresh: tokens.refresh,
        },
        "login successful",
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<ApiResponse<()>> {
    state.auth.logout(auth.claims.session_id).await?;
    Ok(ApiResponse::new((), "logout successful"))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1))]
    pub old_password: String,
    #[validate(length(min = 1))]
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    ValidatedJson(payload): ValidatedJson<ChangePasswordRequest>,
) -> ApiResult<ApiResponse<()>> {
    state
        .auth
        .change_password(
            auth.user_id(),
            auth.claims.session_id,
            &payload.old_password,
            &payload.new_password,
        )
        .await?;
    Ok(ApiResponse::new((), "password changed successfully"))
}
