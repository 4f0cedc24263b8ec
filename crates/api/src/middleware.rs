use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use gatehouse_auth::AuthMode;

use crate::app::{errors, services::AppServices};

/// Reject the request unless it carries a live bearer token.
pub async fn require_auth(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    authenticate(services, AuthMode::Required, req, next).await
}

/// Attach the caller's context when a live token is present, the anonymous
/// context otherwise.
pub async fn identify(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    authenticate(services, AuthMode::Optional, req, next).await
}

async fn authenticate(
    services: Arc<AppServices>,
    mode: AuthMode,
    mut req: Request,
    next: Next,
) -> Response {
    let ctx = services
        .auth
        .authenticator()
        .authenticate(authorization(req.headers()), mode)
        .await;

    match ctx {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// A header that is not valid UTF-8 is treated as absent.
fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION)?.to_str().ok()
}
