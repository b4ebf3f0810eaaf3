//! Login, refresh, logout, password change and two-factor enrollment.
//!
//! A login attempt is either authenticated immediately or parked behind a
//! short-lived temp token until a TOTP or recovery code is supplied.

use std::sync::Arc;

use chrono::Utc;
use common_auth::{AuthError, TokenSubject};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::mfa::{
    generate_recovery_codes, generate_totp_secret, normalize_mfa_code, normalize_recovery_code,
    provisioning, verify_totp_code,
};
use crate::password::{digest_secret, hash_password, verify_password};
use crate::store::{CredentialStore, NewSession, UserRecord};
use crate::tokens::{IssuedTokens, TokenIssuer};

const INVALID_CREDENTIALS: &str = "invalid password or email for user";
const INVALID_CODE: &str = "invalid validation code";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("account is disabled")]
    AccountDisabled,
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    fn unauthorized(message: &str) -> Self {
        Self::Unauthorized(message.to_string())
    }

    /// Token failures surface as 401; signing problems are ours.
    fn from_token(err: AuthError) -> Self {
        match err {
            AuthError::Signing(_) | AuthError::KeyTooShort(_) => {
                Self::Internal(anyhow::anyhow!("token signing failed: {err}"))
            }
            other => Self::Unauthorized(other.public_message()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Caller metadata recorded on new sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: String,
    pub user_agent: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            ip_address: "unknown".to_string(),
            user_agent: "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(IssuedTokens),
    TwoFactorRequired { temp_token: String },
}

#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access: String,
    /// Present only when refresh-token rotation is on.
    pub refresh: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TwoFactorSetup {
    pub secret: String,
    pub qr_code: String,
    pub otpauth_url: String,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub totp_issuer: String,
    pub recovery_code_count: usize,
    pub rotate_refresh_tokens: bool,
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    tokens: TokenIssuer,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(store: Arc<dyn CredentialStore>, tokens: TokenIssuer, settings: AuthSettings) -> Self {
        Self {
            store,
            tokens,
            settings,
        }
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> ServiceResult<LoginOutcome> {
        let email = email.trim().to_lowercase();
        let user = self
            .store
            .find_user_by_email(&email)
            .await?
            .ok_or_else(|| {
                warn!(event = "auth.login.unknown_email", "login for unknown email");
                ServiceError::NotFound(INVALID_CREDENTIALS.to_string())
            })?;

        if !verify_password(password, &user.password_hash) {
            warn!(event = "auth.login.bad_password", user_id = user.id, "login rejected");
            return Err(ServiceError::unauthorized(INVALID_CREDENTIALS));
        }

        if !user.is_active {
            warn!(event = "auth.login.disabled", user_id = user.id, "login for disabled account");
            return Err(ServiceError::AccountDisabled);
        }

        if user.two_factor_enabled {
            let temp_token = self
                .tokens
                .issue_two_factor(user.id)
                .map_err(ServiceError::from_token)?;
            info!(event = "auth.login.2fa_required", user_id = user.id, "2FA challenge issued");
            return Ok(LoginOutcome::TwoFactorRequired { temp_token });
        }

        let issued = self.open_session(&user, client).await?;
        info!(
            event = "auth.login.success",
            user_id = user.id,
            session_id = %issued.session_id,
            "login succeeded"
        );
        Ok(LoginOutcome::Authenticated(issued))
    }

    pub async fn verify_two_factor(
        &self,
        validation_code: &str,
        temp_token: &str,
        client: &ClientInfo,
    ) -> ServiceResult<IssuedTokens> {
        let claims = self
            .tokens
            .verify_two_factor(temp_token)
            .map_err(ServiceError::from_token)?;

        let user = self
            .store
            .find_user_by_id(claims.user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("user not found".to_string()))?;

        if !user.is_active {
            return Err(ServiceError::AccountDisabled);
        }

        let secret = match (&user.two_factor_secret, user.two_factor_enabled) {
            (Some(secret), true) => secret.clone(),
            _ => {
                warn!(event = "auth.2fa.not_enabled", user_id = user.id, "2FA verify without 2FA");
                return Err(ServiceError::unauthorized("2FA not enabled or secret not set"));
            }
        };

        let issued = if let Some(code) = normalize_mfa_code(validation_code) {
            let Some(step) = verify_totp_code(&secret, &code) else {
                warn!(event = "auth.2fa.invalid_totp", user_id = user.id, "TOTP rejected");
                return Err(ServiceError::unauthorized(INVALID_CODE));
            };
            let step = i64::try_from(step).map_err(|err| anyhow::anyhow!(err))?;
            if !self.store.record_totp_step(user.id, step).await? {
                warn!(event = "auth.2fa.totp_replayed", user_id = user.id, step, "TOTP reused");
                return Err(ServiceError::unauthorized(INVALID_CODE));
            }
            self.open_session(&user, client).await?
        } else if let Some(code) = normalize_recovery_code(validation_code) {
            let (issued, session) = self.prepare_session(&user, client)?;
            let redeemed = self
                .store
                .redeem_recovery_code(user.id, &digest_secret(&code), session)
                .await
                .map_err(|err| {
                    error!(error = ?err, user_id = user.id, "failed to redeem recovery code");
                    ServiceError::Internal(err)
                })?;
            if redeemed.is_none() {
                warn!(
                    event = "auth.2fa.invalid_recovery_code",
                    user_id = user.id,
                    "recovery code rejected"
                );
                return Err(ServiceError::unauthorized(INVALID_CODE));
            }
            info!(
                event = "auth.2fa.recovery_code_used",
                user_id = user.id,
                remaining = user.recovery_codes.len().saturating_sub(1),
                "recovery code consumed"
            );
            issued
        } else {
            return Err(ServiceError::unauthorized(INVALID_CODE));
        };

        info!(
            event = "auth.2fa.verified",
            user_id = user.id,
            session_id = %issued.session_id,
            "2FA login succeeded"
        );
        Ok(issued)
    }

    pub async fn refresh(&self, refresh_token: &str) -> ServiceResult<RefreshedTokens> {
        let claims = self.tokens.verify_refresh(refresh_token).map_err(|err| {
            warn!(event = "auth.refresh.invalid_token", error = %err, "refresh rejected");
            ServiceError::unauthorized("invalid token")
        })?;

        let session_id = claims
            .session_id
            .ok_or_else(|| ServiceError::unauthorized("invalid token"))?;

        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| ServiceError::unauthorized("invalid session"))?;

        if session.is_blocked {
            warn!(
                event = "auth.refresh.blocked_session",
                user_id = claims.user_id,
                session_id = %session_id,
                "refresh on blocked session"
            );
            return Err(ServiceError::unauthorized("blocked session"));
        }
        if session.user_id != claims.user_id
            || session.refresh_token_hash != digest_secret(refresh_token)
        {
            warn!(
                event = "auth.refresh.token_mismatch",
                user_id = claims.user_id,
                session_id = %session_id,
                "refresh token does not match session"
            );
            return Err(ServiceError::unauthorized("mismatched session token"));
        }
        if session.expires_at <= Utc::now() {
            return Err(ServiceError::unauthorized("expired session"));
        }

        let user = self.store.find_user_by_id(claims.user_id).await?;
        if !user.map(|user| user.is_active).unwrap_or(false) {
            return Err(ServiceError::unauthorized("invalid session"));
        }

        let subject = claims.subject();
        if !self.settings.rotate_refresh_tokens {
            let access = self
                .tokens
                .issue_access(&subject)
                .map_err(ServiceError::from_token)?;
            info!(
                event = "auth.refresh.success",
                user_id = claims.user_id,
                session_id = %session_id,
                "access token refreshed"
            );
            return Ok(RefreshedTokens {
                access,
                refresh: None,
            });
        }

        let subject = TokenSubject {
            session_id: None,
            ..subject
        };
        let issued = self
            .tokens
            .issue_session_tokens(subject)
            .map_err(ServiceError::from_token)?;
        let replacement = NewSession {
            id: issued.session_id,
            user_id: session.user_id,
            refresh_token_hash: issued.refresh_hash(),
            ip_address: session.ip_address.clone(),
            user_agent: session.user_agent.clone(),
            expires_at: issued.refresh_expires_at,
        };

        if self
            .store
            .rotate_session(session_id, replacement)
            .await?
            .is_none()
        {
            warn!(
                event = "auth.refresh.replayed",
                user_id = claims.user_id,
                session_id = %session_id,
                "session was rotated concurrently"
            );
            return Err(ServiceError::unauthorized("blocked session"));
        }

        info!(
            event = "auth.refresh.rotated",
            user_id = claims.user_id,
            old_session_id = %session_id,
            session_id = %issued.session_id,
            "refresh token rotated"
        );
        Ok(RefreshedTokens {
            access: issued.access,
            refresh: Some(issued.refresh),
        })
    }

    pub async fn logout(&self, session_id: Option<Uuid>) -> ServiceResult<()> {
        let session_id =
            session_id.ok_or_else(|| ServiceError::unauthorized("token carries no session"))?;

        if !self.store.block_session(session_id).await? {
            return Err(ServiceError::NotFound("session not found".to_string()));
        }
        info!(event = "auth.logout", session_id = %session_id, "session blocked");
        Ok(())
    }

    pub async fn change_password(
        &self,
        user_id: i64,
        session_id: Option<Uuid>,
        old_password: &str,
        new_password: &str,
    ) -> ServiceResult<()> {
        if new_password.is_empty() {
            return Err(ServiceError::InvalidInput(
                "new password must not be empty".to_string(),
            ));
        }

        let user = self.require_user(user_id).await?;
        if !verify_password(old_password, &user.password_hash) {
            warn!(
                event = "auth.password.bad_old_password",
                user_id,
                "password change rejected"
            );
            return Err(ServiceError::unauthorized("old password is incorrect"));
        }

        let hash = hash_password(new_password)?;
        self.store.update_password(user_id, &hash).await?;

        let blocked = self
            .store
            .block_user_sessions_except(user_id, session_id)
            .await?;
        info!(
            event = "auth.password.changed",
            user_id,
            sessions_blocked = blocked,
            "password changed"
        );
        Ok(())
    }

    pub async fn setup_two_factor(&self, user_id: i64) -> ServiceResult<TwoFactorSetup> {
        let user = self.require_user(user_id).await?;
        if user.two_factor_enabled {
            return Err(ServiceError::Conflict("2FA already enabled".to_string()));
        }

        let secret = generate_totp_secret();
        let provisioning = provisioning(&self.settings.totp_issuer, &user.email, &secret)?;
        self.store
            .set_pending_two_factor_secret(user_id, &secret)
            .await?;

        info!(event = "auth.2fa.setup", user_id, "2FA enrollment started");
        Ok(TwoFactorSetup {
            secret,
            qr_code: provisioning.qr_code,
            otpauth_url: provisioning.otpauth_url,
        })
    }

    pub async fn enable_two_factor(
        &self,
        user_id: i64,
        validation_code: &str,
    ) -> ServiceResult<Vec<String>> {
        let user = self.require_user(user_id).await?;
        if user.two_factor_enabled {
            return Err(ServiceError::Conflict("2FA already enabled".to_string()));
        }

        let pending = user
            .two_factor_secret_pending
            .as_deref()
            .ok_or_else(|| ServiceError::InvalidInput("2FA setup not initiated".to_string()))?;

        let code_ok = normalize_mfa_code(validation_code)
            .and_then(|code| verify_totp_code(pending, &code))
            .is_some();
        if !code_ok {
            warn!(event = "auth.2fa.enable_rejected", user_id, "enrollment code rejected");
            return Err(ServiceError::unauthorized(INVALID_CODE));
        }

        let codes = generate_recovery_codes(self.settings.recovery_code_count);
        let hashes: Vec<String> = codes.iter().map(|code| digest_secret(code)).collect();

        if !self
            .store
            .enable_two_factor(user_id, pending, &hashes)
            .await?
        {
            return Err(ServiceError::Conflict(
                "2FA enrollment changed concurrently".to_string(),
            ));
        }

        info!(
            event = "auth.2fa.enabled",
            user_id,
            recovery_codes = codes.len(),
            "2FA enabled"
        );
        Ok(codes)
    }

    async fn require_user(&self, user_id: i64) -> ServiceResult<UserRecord> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("user not found".to_string()))
    }

    /// Mint tokens for a new session without persisting it.
    fn prepare_session(
        &self,
        user: &UserRecord,
        client: &ClientInfo,
    ) -> ServiceResult<(IssuedTokens, NewSession)> {
        let subject = TokenSubject {
            user_id: user.id,
            employee_id: user.employee_id,
            role_id: Some(user.role_id),
            session_id: None,
        };
        let issued = self
            .tokens
            .issue_session_tokens(subject)
            .map_err(ServiceError::from_token)?;

        let session = NewSession {
            id: issued.session_id,
            user_id: user.id,
            refresh_token_hash: issued.refresh_hash(),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            expires_at: issued.refresh_expires_at,
        };
        Ok((issued, session))
    }

    async fn open_session(
        &self,
        user: &UserRecord,
        client: &ClientInfo,
    ) -> ServiceResult<IssuedTokens> {
        let (issued, session) = self.prepare_session(user, client)?;
        self.store.create_session(session).await.map_err(|err| {
            error!(error = ?err, user_id = user.id, "failed to persist session");
            ServiceError::Internal(err)
        })?;
        Ok(issued)
    }
}
