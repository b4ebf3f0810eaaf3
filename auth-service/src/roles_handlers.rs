use std::collections::HashSet;

use axum::extract::{Path, State};
use common_auth::AuthContext;
use common_http_errors::{ApiError, ApiResponse, ApiResult, ValidatedJson};
use serde::Deserialize;
use tracing::{error, info};
use validator::Validate;

use crate::store::{Permission, Role};
use crate::AppState;

pub const PERMISSION_ROLE_VIEW: &str = "ROLE.VIEW";
pub const PERMISSION_ROLE_UPDATE: &str = "ROLE.UPDATE";

fn internal(context: &'static str) -> impl FnOnce(anyhow::Error) -> ApiError {
    move |err| {
        error!(error = ?err, "{context}");
        ApiError::internal()
    }
}

pub async fn list_roles(State(state): State<AppState>) -> ApiResult<ApiResponse<Vec<Role>>> {
    let roles = state
        .roles
        .list_roles()
        .await
        .map_err(internal("failed to list roles"))?;
    Ok(ApiResponse::new(roles, "roles fetched successfully"))
}

pub async fn list_permissions(
    State(state): State<AppState>,
) -> ApiResult<ApiResponse<Vec<Permission>>> {
    let permissions = state
        .roles
        .list_permissions()
        .await
        .map_err(internal("failed to list permissions"))?;
    Ok(ApiResponse::new(permissions, "permissions fetched successfully"))
}

pub async fn list_role_permissions(
    State(state): State<AppState>,
    Path(role_id): Path<i32>,
) -> ApiResult<ApiResponse<Vec<Permission>>> {
    let permissions = state
        .roles
        .list_role_permissions(role_id)
        .await
        .map_err(internal("failed to list role permissions"))?
        .ok_or_else(|| ApiError::NotFound("role not found".to_string()))?;
    Ok(ApiResponse::new(
        permissions,
        "role permissions fetched successfully",
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRolePermissionsRequest {
    pub permission_ids: Vec<i32>,
}

pub async fn update_role_permissions(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(role_id): Path<i32>,
    ValidatedJson(payload): ValidatedJson<UpdateRolePermissionsRequest>,
) -> ApiResult<ApiResponse<()>> {
    let known: HashSet<i32> = state
        .roles
        .list_permissions()
        .await
        .map_err(internal("failed to list permissions"))?
        .into_iter()
        .map(|permission| permission.id)
        .collect();
    if let Some(unknown) = payload
        .permission_ids
        .iter()
        .find(|id| !known.contains(id))
    {
        return Err(ApiError::InvalidInput(format!(
            "unknown permission id {unknown}"
        )));
    }

    let updated = state
        .roles
        .replace_role_permissions(role_id, &payload.permission_ids)
        .await
        .map_err(internal("failed to update role permissions"))?;
    if !updated {
        return Err(ApiError::NotFound("role not found".to_string()));
    }

    info!(
        event = "rbac.role_permissions.replaced",
        role_id,
        updated_by = auth.user_id(),
        permissions = payload.permission_ids.len(),
        "role permissions replaced"
    );
    Ok(ApiResponse::new((), "role permissions updated successfully"))
}
