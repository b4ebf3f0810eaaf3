use anyhow::{Context, Result};
use async_trait::async_trait;
use common_auth::PermissionStore;
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::{
    CredentialStore, NewSession, Permission, Role, RoleStore, SessionRecord, UserRecord,
};

const USER_COLUMNS: &str = "id, email, password_hash, is_active, role_id, employee_id, \
     two_factor_enabled, two_factor_secret, two_factor_secret_pending, recovery_codes";

const SESSION_COLUMNS: &str =
    "id, user_id, refresh_token_hash, ip_address, user_agent, expires_at, is_blocked, created_at";

/// Postgres-backed implementation of every store seam.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load user by email")
    }

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>> {
        sqlx::query_as::<_, UserRecord>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to load user by id")
    }

    async fn update_password(&self, user_id: i64, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .context("failed to update password")?;
        Ok(())
    }

    async fn set_pending_two_factor_secret(&self, user_id: i64, secret: &str) -> Result<()> {
        sqlx::query(
            "UPDATE users SET two_factor_secret_pending = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(secret)
        .execute(&self.pool)
        .await
        .context("failed to store pending 2FA secret")?;
        Ok(())
    }

    async fn enable_two_factor(
        &self,
        user_id: i64,
        pending_secret: &str,
        recovery_code_hashes: &[String],
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users
             SET two_factor_enabled = TRUE,
                 two_factor_secret = two_factor_secret_pending,
                 two_factor_secret_pending = NULL,
                 recovery_codes = $3,
                 two_factor_last_counter = NULL,
                 updated_at = NOW()
             WHERE id = $1 AND two_factor_enabled = FALSE AND two_factor_secret_pending = $2",
        )
        .bind(user_id)
        .bind(pending_secret)
        .bind(recovery_code_hashes)
        .execute(&self.pool)
        .await
        .context("failed to enable 2FA")?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_totp_step(&self, user_id: i64, step: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users
             SET two_factor_last_counter = $2, updated_at = NOW()
             WHERE id = $1 AND (two_factor_last_counter IS NULL OR two_factor_last_counter < $2)",
        )
        .bind(user_id)
        .bind(step)
        .execute(&self.pool)
        .await
        .context("failed to record TOTP step")?;
        Ok(result.rows_affected() == 1)
    }

    async fn redeem_recovery_code(
        &self,
        user_id: i64,
        code_hash: &str,
        session: NewSession,
    ) -> Result<Option<SessionRecord>> {
        let mut tx = self.pool.begin().await?;

        let consumed = sqlx::query(
            "UPDATE users
             SET recovery_codes = array_remove(recovery_codes, $2), updated_at = NOW()
             WHERE id = $1 AND $2 = ANY(recovery_codes)",
        )
        .bind(user_id)
        .bind(code_hash)
        .execute(&mut *tx)
        .await
        .context("failed to consume recovery code")?;
        if consumed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let created = insert_session(&mut *tx, &session).await?;
        tx.commit()
            .await
            .context("failed to commit recovery code redemption")?;
        Ok(Some(created))
    }

    async fn create_session(&self, session: NewSession) -> Result<SessionRecord> {
        insert_session(&self.pool, &session).await
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>> {
        sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load session")
    }

    async fn block_session(&self, session_id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET is_blocked = TRUE WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("failed to block session")?;
        Ok(result.rows_affected() == 1)
    }

    async fn rotate_session(
        &self,
        old_session: Uuid,
        replacement: NewSession,
    ) -> Result<Option<SessionRecord>> {
        let mut tx = self.pool.begin().await?;

        let blocked =
            sqlx::query("UPDATE sessions SET is_blocked = TRUE WHERE id = $1 AND is_blocked = FALSE")
                .bind(old_session)
                .execute(&mut *tx)
                .await
                .context("failed to block rotated session")?;
        if blocked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let created = insert_session(&mut *tx, &replacement).await?;
        tx.commit().await.context("failed to commit session rotation")?;
        Ok(Some(created))
    }

    async fn block_user_sessions_except(&self, user_id: i64, keep: Option<Uuid>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET is_blocked = TRUE
             WHERE user_id = $1 AND is_blocked = FALSE AND ($2::uuid IS NULL OR id <> $2)",
        )
        .bind(user_id)
        .bind(keep)
        .execute(&self.pool)
        .await
        .context("failed to block user sessions")?;
        Ok(result.rows_affected())
    }
}

async fn insert_session<'e, E>(executor: E, session: &NewSession) -> Result<SessionRecord>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query_as::<_, SessionRecord>(&format!(
        "INSERT INTO sessions (id, user_id, refresh_token_hash, ip_address, user_agent, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {SESSION_COLUMNS}"
    ))
    .bind(session.id)
    .bind(session.user_id)
    .bind(&session.refresh_token_hash)
    .bind(&session.ip_address)
    .bind(&session.user_agent)
    .bind(session.expires_at)
    .fetch_one(executor)
    .await
    .context("failed to create session")
}

#[async_trait]
impl RoleStore for PgStore {
    async fn list_roles(&self) -> Result<Vec<Role>> {
        sqlx::query_as::<_, Role>("SELECT id, name FROM roles ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("failed to list roles")
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        sqlx::query_as::<_, Permission>("SELECT id, name, resource FROM permissions ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("failed to list permissions")
    }

    async fn list_role_permissions(&self, role_id: i32) -> Result<Option<Vec<Permission>>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)")
            .bind(role_id)
            .fetch_one(&self.pool)
            .await
            .context("failed to check role")?;
        if !exists {
            return Ok(None);
        }

        let permissions = sqlx::query_as::<_, Permission>(
            "SELECT p.id, p.name, p.resource
             FROM permissions p
             JOIN role_permissions rp ON rp.permission_id = p.id
             WHERE rp.role_id = $1
             ORDER BY p.id",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list role permissions")?;
        Ok(Some(permissions))
    }

    async fn replace_role_permissions(&self, role_id: i32, permission_ids: &[i32]) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)")
                .bind(role_id)
                .fetch_one(&mut *tx)
                .await
                .context("failed to check role")?;
        if !exists {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .context("failed to clear role permissions")?;

        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id)
             SELECT $1, UNNEST($2::int[])
             ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .bind(permission_ids)
        .execute(&mut *tx)
        .await
        .context("failed to insert role permissions")?;

        tx.commit().await.context("failed to commit role permissions")?;
        Ok(true)
    }
}

#[async_trait]
impl PermissionStore for PgStore {
    async fn role_has_permission(&self, role_id: i32, permission: &str) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM role_permissions rp
                JOIN permissions p ON p.id = rp.permission_id
                WHERE rp.role_id = $1 AND p.name = $2
             )",
        )
        .bind(role_id)
        .bind(permission)
        .fetch_one(&self.pool)
        .await
        .context("failed to check role permission")
    }
}
