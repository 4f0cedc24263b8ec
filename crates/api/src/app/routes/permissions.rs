use std::sync::Arc;

use axum::{Extension, Json, extract::Path, http::StatusCode, response::IntoResponse};

use gatehouse_auth::AuthContext;
use gatehouse_core::{PermissionId, UserId};

use crate::app::{dto, errors, services::AppServices};

pub async fn list_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> axum::response::Response {
    match services.auth.list_permissions(&ctx).await {
        Ok(permissions) => {
            let out: Vec<dto::PermissionView> =
                permissions.iter().map(dto::PermissionView::from).collect();
            Json(out).into_response()
        }
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn grant_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::GrantRequest>,
) -> axum::response::Response {
    let (permission_id, user_id) = match parse_ids(&id, &body.user_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .auth
        .grant_permission(&ctx, permission_id, user_id)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn revoke_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::GrantRequest>,
) -> axum::response::Response {
    let (permission_id, user_id) = match parse_ids(&id, &body.user_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .auth
        .revoke_permission(&ctx, permission_id, user_id)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

fn parse_ids(
    permission: &str,
    user: &str,
) -> Result<(PermissionId, UserId), axum::response::Response> {
    Ok((errors::parse_id(permission)?, errors::parse_id(user)?))
}
