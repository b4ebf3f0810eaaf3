use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use auth_service::password::hash_password;
use auth_service::store::{
    CredentialStore, NewSession, Permission, Role, RoleStore, SessionRecord, UserRecord,
};
use chrono::Utc;
use common_auth::PermissionStore;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    users: HashMap<i64, UserRecord>,
    sessions: HashMap<Uuid, SessionRecord>,
    roles: BTreeMap<i32, Role>,
    permissions: BTreeMap<i32, Permission>,
    grants: HashSet<(i32, i32)>,
    totp_steps: HashMap<i64, i64>,
    next_user_id: i64,
    fail_permission_lookups: bool,
    fail_session_inserts: bool,
}

/// In-process stand-in for Postgres implementing every store seam.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn add_role(&self, name: &str) -> i32 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.roles.len() as i32 + 1;
        inner.roles.insert(
            id,
            Role {
                id,
                name: name.to_string(),
            },
        );
        id
    }

    pub fn add_permission(&self, name: &str, resource: &str) -> i32 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.permissions.len() as i32 + 1;
        inner.permissions.insert(
            id,
            Permission {
                id,
                name: name.to_string(),
                resource: resource.to_string(),
            },
        );
        id
    }

    pub fn grant(&self, role_id: i32, permission_id: i32) {
        self.inner
            .lock()
            .unwrap()
            .grants
            .insert((role_id, permission_id));
    }

    pub fn role_permission_ids(&self, role_id: i32) -> Vec<i32> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<i32> = inner
            .grants
            .iter()
            .filter(|(role, _)| *role == role_id)
            .map(|(_, permission)| *permission)
            .collect();
        ids.sort();
        ids
    }

    pub fn insert_user(&self, email: &str, password: &str, role_id: i32) -> i64 {
        let password_hash = hash_password(password).expect("hash password");
        let mut inner = self.inner.lock().unwrap();
        inner.next_user_id += 1;
        let id = inner.next_user_id;
        inner.users.insert(
            id,
            UserRecord {
                id,
                email: email.to_lowercase(),
                password_hash,
                is_active: true,
                role_id,
                employee_id: Some(id * 100),
                two_factor_enabled: false,
                two_factor_secret: None,
                two_factor_secret_pending: None,
                recovery_codes: Vec::new(),
            },
        );
        id
    }

    pub fn set_active(&self, user_id: i64, active: bool) {
        if let Some(user) = self.inner.lock().unwrap().users.get_mut(&user_id) {
            user.is_active = active;
        }
    }

    pub fn user(&self, user_id: i64) -> Option<UserRecord> {
        self.inner.lock().unwrap().users.get(&user_id).cloned()
    }

    pub fn session(&self, session_id: Uuid) -> Option<SessionRecord> {
        self.inner.lock().unwrap().sessions.get(&session_id).cloned()
    }

    pub fn sessions_for(&self, user_id: i64) -> Vec<SessionRecord> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .values()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn fail_permission_lookups(&self) {
        self.inner.lock().unwrap().fail_permission_lookups = true;
    }

    pub fn fail_session_inserts(&self, fail: bool) {
        self.inner.lock().unwrap().fail_session_inserts = fail;
    }

    fn insert_session(inner: &mut Inner, session: NewSession) -> Result<SessionRecord> {
        if inner.fail_session_inserts {
            return Err(anyhow!("session insert failed"));
        }
        let record = SessionRecord {
            id: session.id,
            user_id: session.user_id,
            refresh_token_hash: session.refresh_token_hash,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            expires_at: session.expires_at,
            is_blocked: false,
            created_at: Utc::now(),
        };
        inner.sessions.insert(record.id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>> {
        Ok(self.user(user_id))
    }

    async fn update_password(&self, user_id: i64, password_hash: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("user {user_id} missing"))?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn set_pending_two_factor_secret(&self, user_id: i64, secret: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("user {user_id} missing"))?;
        user.two_factor_secret_pending = Some(secret.to_string());
        Ok(())
    }

    async fn enable_two_factor(
        &self,
        user_id: i64,
        pending_secret: &str,
        recovery_code_hashes: &[String],
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(user) = inner.users.get_mut(&user_id) else {
            return Ok(false);
        };
        if user.two_factor_enabled
            || user.two_factor_secret_pending.as_deref() != Some(pending_secret)
        {
            return Ok(false);
        }
        user.two_factor_enabled = true;
        user.two_factor_secret = user.two_factor_secret_pending.take();
        user.recovery_codes = recovery_code_hashes.to_vec();
        inner.totp_steps.remove(&user_id);
        Ok(true)
    }

    async fn record_totp_step(&self, user_id: i64, step: i64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.users.contains_key(&user_id) {
            return Ok(false);
        }
        match inner.totp_steps.get(&user_id) {
            Some(last) if *last >= step => Ok(false),
            _ => {
                inner.totp_steps.insert(user_id, step);
                Ok(true)
            }
        }
    }

    async fn redeem_recovery_code(
        &self,
        user_id: i64,
        code_hash: &str,
        session: NewSession,
    ) -> Result<Option<SessionRecord>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(idx) = inner
            .users
            .get(&user_id)
            .and_then(|user| user.recovery_codes.iter().position(|hash| hash == code_hash))
        else {
            return Ok(None);
        };
        let record = Self::insert_session(&mut inner, session)?;
        if let Some(user) = inner.users.get_mut(&user_id) {
            user.recovery_codes.remove(idx);
        }
        Ok(Some(record))
    }

    async fn create_session(&self, session: NewSession) -> Result<SessionRecord> {
        Self::insert_session(&mut self.inner.lock().unwrap(), session)
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>> {
        Ok(self.session(session_id))
    }

    async fn block_session(&self, session_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.sessions.get_mut(&session_id) {
            Some(session) => {
                session.is_blocked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rotate_session(
        &self,
        old_session: Uuid,
        replacement: NewSession,
    ) -> Result<Option<SessionRecord>> {
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.sessions.get_mut(&old_session) {
                Some(session) if !session.is_blocked => session.is_blocked = true,
                _ => return Ok(None),
            }
        }
        self.create_session(replacement).await.map(Some)
    }

    async fn block_user_sessions_except(&self, user_id: i64, keep: Option<Uuid>) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut blocked = 0;
        for session in inner.sessions.values_mut() {
            if session.user_id == user_id && !session.is_blocked && Some(session.id) != keep {
                session.is_blocked = true;
                blocked += 1;
            }
        }
        Ok(blocked)
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn list_roles(&self) -> Result<Vec<Role>> {
        Ok(self.inner.lock().unwrap().roles.values().cloned().collect())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .permissions
            .values()
            .cloned()
            .collect())
    }

    async fn list_role_permissions(&self, role_id: i32) -> Result<Option<Vec<Permission>>> {
        let inner = self.inner.lock().unwrap();
        if !inner.roles.contains_key(&role_id) {
            return Ok(None);
        }
        Ok(Some(
            inner
                .permissions
                .values()
                .filter(|permission| inner.grants.contains(&(role_id, permission.id)))
                .cloned()
                .collect(),
        ))
    }

    async fn replace_role_permissions(&self, role_id: i32, permission_ids: &[i32]) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.roles.contains_key(&role_id) {
            return Ok(false);
        }
        inner.grants.retain(|(role, _)| *role != role_id);
        for id in permission_ids {
            inner.grants.insert((role_id, *id));
        }
        Ok(true)
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn role_has_permission(&self, role_id: i32, permission: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_permission_lookups {
            return Err(anyhow!("permission store unavailable"));
        }
        Ok(inner.permissions.values().any(|candidate| {
            candidate.name == permission && inner.grants.contains(&(role_id, candidate.id))
        }))
    }
}
