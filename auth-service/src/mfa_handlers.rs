use axum::extract::State;
use common_auth::AuthContext;
use common_http_errors::{ApiError, ApiResponse, ApiResult, ValidatedJson};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SetupTwoFactorResponse {
    pub qr_code_base64: String,
    pub secret: String,
    pub otpauth_url: String,
}

pub async fn setup_two_factor(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<ApiResponse<SetupTwoFactorResponse>> {
    let setup = state.auth.setup_two_factor(auth.user_id()).await?;
    state.metrics.two_factor_event("setup");

    Ok(ApiResponse::new(
        SetupTwoFactorResponse {
            qr_code_base64: setup.qr_code,
            secret: setup.secret,
            otpauth_url: setup.otpauth_url,
        },
        "2FA setup successful",
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct EnableTwoFactorRequest {
    #[validate(length(min = 1))]
    pub validation_code: String,
}

#[derive(Debug, Serialize)]
pub struct EnableTwoFactorResponse {
    pub recovery_codes: Vec<String>,
}

pub async fn enable_two_factor(
    State(state): State<AppState>,
    auth: AuthContext,
    ValidatedJson(payload): ValidatedJson<EnableTwoFactorRequest>,
) -> ApiResult<ApiResponse<EnableTwoFactorResponse>> {
    let recovery_codes = state
        .auth
        .enable_two_factor(auth.user_id(), &payload.validation_code)
        .await
        .map_err(|err| {
            state.metrics.two_factor_event("enable_rejected");
            ApiError::from(err)
        })?;
    state.metrics.two_factor_event("enabled");

    Ok(ApiResponse::new(
        EnableTwoFactorResponse { recovery_codes },
        "2FA enabled successfully",
    ))
}
