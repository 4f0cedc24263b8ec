use axum::{Extension, Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

use gatehouse_auth::AuthContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Optional-auth endpoint: describes the caller, or reports anonymity.
pub async fn whoami(Extension(ctx): Extension<AuthContext>) -> axum::response::Response {
    if ctx.is_anonymous() {
        return Json(json!({
            "anonymous": true,
            "user_id": null,
            "roles": [],
            "permissions": [],
        }))
        .into_response();
    }

    let roles: Vec<&str> = ctx.user.role_names().map(|r| r.as_str()).collect();
    Json(json!({
        "anonymous": false,
        "user_id": ctx.user_id(),
        "roles": roles,
        "permissions": ctx.permissions.names(),
    }))
    .into_response()
}
