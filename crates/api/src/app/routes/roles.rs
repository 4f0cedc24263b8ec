use std::sync::Arc;

use axum::{Extension, Json, extract::Path, http::StatusCode, response::IntoResponse};

use gatehouse_auth::AuthContext;
use gatehouse_core::{RoleId, UserId};

use crate::app::{dto, errors, services::AppServices};

pub async fn list_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> axum::response::Response {
    match services.auth.list_roles(&ctx).await {
        Ok(roles) => {
            let out: Vec<dto::RoleView> = roles.iter().map(dto::RoleView::from).collect();
            Json(out).into_response()
        }
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn grant_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::GrantRequest>,
) -> axum::response::Response {
    let (role_id, user_id) = match parse_ids(&id, &body.user_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.auth.grant_role(&ctx, role_id, user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn revoke_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::GrantRequest>,
) -> axum::response::Response {
    let (role_id, user_id) = match parse_ids(&id, &body.user_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.auth.revoke_role(&ctx, role_id, user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

fn parse_ids(role: &str, user: &str) -> Result<(RoleId, UserId), axum::response::Response> {
    Ok((errors::parse_id(role)?, errors::parse_id(user)?))
}
