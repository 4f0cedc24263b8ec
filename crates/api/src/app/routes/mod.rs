//! HTTP route handlers, one file per resource.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post, put},
};

use crate::app::services::AppServices;

pub mod permissions;
pub mod roles;
pub mod system;
pub mod users;

/// Endpoints that need no credential at all.
pub fn public() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/users", post(users::register))
        .route("/users/login", post(users::login))
}

/// Endpoints that accept anonymous callers but describe authenticated ones.
pub fn optional_auth(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .layer(axum::middleware::from_fn_with_state(
            services,
            crate::middleware::identify,
        ))
}

/// Endpoints that require a live bearer token.
pub fn protected(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/users/logout", post(users::logout))
        .route(
            "/users/:id",
            get(users::get_user).delete(users::delete_user),
        )
        .route("/users/:id/permissions", get(users::get_user_permissions))
        .route("/users/:id/password", patch(users::change_password))
        .route("/users/:id/password/reset", put(users::reset_password))
        .route("/users/:id/restore", put(users::restore_user))
        .route("/roles", get(roles::list_roles))
        .route("/roles/:id/grant", patch(roles::grant_role))
        .route("/roles/:id/revoke", patch(roles::revoke_role))
        .route("/permissions", get(permissions::list_permissions))
        .route("/permissions/:id/grant", patch(permissions::grant_permission))
        .route("/permissions/:id/revoke", patch(permissions::revoke_permission))
        .layer(axum::middleware::from_fn_with_state(
            services,
            crate::middleware::require_auth,
        ))
}
