use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub role_id: i32,
    pub employee_id: Option<i64>,
    pub two_factor_enabled: bool,
    pub two_factor_secret: Option<String>,
    pub two_factor_secret_pending: Option<String>,
    /// SHA-256 digests of the unused recovery codes.
    pub recovery_codes: Vec<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: i64,
    pub refresh_token_hash: String,
    pub ip_address: String,
    pub user_agent: String,
    pub expires_at: DateTime<Utc>,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: i64,
    pub refresh_token_hash: String,
    pub ip_address: String,
    pub user_agent: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Role {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Permission {
    pub id: i32,
    pub name: String,
    pub resource: String,
}

/// Persistence for users, sessions and two-factor state.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `email` is already lower-cased.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;
    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>>;
    async fn update_password(&self, user_id: i64, password_hash: &str) -> Result<()>;

    async fn set_pending_two_factor_secret(&self, user_id: i64, secret: &str) -> Result<()>;
    /// Promote `pending_secret` to the active secret and store the recovery
    /// code digests. Returns false if 2FA was enabled concurrently or the
    /// pending secret changed underneath the caller.
    async fn enable_two_factor(
        &self,
        user_id: i64,
        pending_secret: &str,
        recovery_code_hashes: &[String],
    ) -> Result<bool>;
    /// Record `step` as the last accepted TOTP time step. Returns false if an
    /// equal or later step was already accepted, so a code verifies once.
    async fn record_totp_step(&self, user_id: i64, step: i64) -> Result<bool>;
    /// Remove `code_hash` from the user's recovery codes and create `session`
    /// in one transaction. Returns None if the code was not present, so a
    /// code can only be spent once and is kept when the session insert fails.
    async fn redeem_recovery_code(
        &self,
        user_id: i64,
        code_hash: &str,
        session: NewSession,
    ) -> Result<Option<SessionRecord>>;

    async fn create_session(&self, session: NewSession) -> Result<SessionRecord>;
    async fn find_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>>;
    /// Returns false if the session does not exist.
    async fn block_session(&self, session_id: Uuid) -> Result<bool>;
    /// Block `old_session` and create `replacement` atomically. Returns None
    /// if `old_session` was already blocked.
    async fn rotate_session(
        &self,
        old_session: Uuid,
        replacement: NewSession,
    ) -> Result<Option<SessionRecord>>;
    /// Block every active session of `user_id` except `keep`. Returns how
    /// many were blocked.
    async fn block_user_sessions_except(&self, user_id: i64, keep: Option<Uuid>) -> Result<u64>;
}

/// Read and administer the role to permission mapping.
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn list_roles(&self) -> Result<Vec<Role>>;
    async fn list_permissions(&self) -> Result<Vec<Permission>>;
    /// None if the role does not exist.
    async fn list_role_permissions(&self, role_id: i32) -> Result<Option<Vec<Permission>>>;
    /// Replace the role's permission set. Returns false if the role does not
    /// exist.
    async fn replace_role_permissions(&self, role_id: i32, permission_ids: &[i32]) -> Result<bool>;
}
