use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{error, warn};

use crate::error::{AuthError, AuthResult};
use crate::extractors::AuthContext;

/// Source of role to permission grants. Looked up on every request, so a
/// grant takes effect without reissuing tokens.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn role_has_permission(&self, role_id: i32, permission: &str) -> anyhow::Result<bool>;
}

/// State for [`require_permission`]: the store plus the permission a route
/// demands.
#[derive(Clone)]
pub struct RequiredPermission {
    store: Arc<dyn PermissionStore>,
    permission: Arc<str>,
}

impl RequiredPermission {
    pub fn new(store: Arc<dyn PermissionStore>, permission: &str) -> Self {
        Self {
            store,
            permission: Arc::from(permission),
        }
    }

    pub fn permission(&self) -> &str {
        &self.permission
    }
}

pub async fn ensure_permission(
    store: &dyn PermissionStore,
    auth: &AuthContext,
    permission: &str,
) -> AuthResult<()> {
    let Some(role_id) = auth.claims.role_id else {
        warn!(user_id = auth.user_id(), permission, "token carries no role");
        return Err(AuthError::Forbidden);
    };

    let granted = store
        .role_has_permission(role_id, permission)
        .await
        .map_err(|err| {
            error!(error = ?err, role_id, permission, "permission lookup failed");
            AuthError::PermissionLookup(err.to_string())
        })?;

    if granted {
        Ok(())
    } else {
        warn!(
            user_id = auth.user_id(),
            role_id,
            permission,
            "permission denied"
        );
        Err(AuthError::Forbidden)
    }
}

/// Middleware gate that must sit behind `require_auth`.
pub async fn require_permission(
    State(required): State<RequiredPermission>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth = req
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or(AuthError::MissingAuthContext)?;

    ensure_permission(required.store.as_ref(), &auth, required.permission()).await?;
    Ok(next.run(req).await)
}
