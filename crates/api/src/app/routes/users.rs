use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
};

use gatehouse_auth::{AuthContext, Registration};
use gatehouse_core::UserId;

use crate::app::{dto, errors, services::AppServices};

pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RegisterRequest>,
) -> axum::response::Response {
    let registration = Registration {
        email: body.email,
        phone: body.phone,
        password: body.password,
    };

    match services.auth.register(registration).await {
        Ok(outcome) => (
            StatusCode::CREATED,
            Json(dto::LoginResponse::from(&outcome)),
        )
            .into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::LoginRequest>,
) -> axum::response::Response {
    match services.auth.login(&body.identifier, &body.password).await {
        Ok(outcome) => Json(dto::LoginResponse::from(&outcome)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> axum::response::Response {
    match services.auth.logout(&ctx).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: UserId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.auth.view_user(&ctx, id).await {
        Ok(user) => Json(dto::UserView::from(&user)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn get_user_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: UserId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.auth.user_permissions(&ctx, id).await {
        Ok(permissions) => Json(permissions).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn change_password(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ChangePasswordRequest>,
) -> axum::response::Response {
    let id: UserId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .auth
        .change_password(&ctx, id, &body.current_password, &body.new_password)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn reset_password(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ResetPasswordRequest>,
) -> axum::response::Response {
    let id: UserId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.auth.reset_password(&ctx, id, &body.new_password).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: UserId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.auth.soft_delete_user(&ctx, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn restore_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: UserId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.auth.restore_user(&ctx, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}
