use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use gatehouse_auth::AuthError;

/// Fixed body for every failed login, whatever the internal reason.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid login credentials.";

pub fn auth_error_to_response(err: AuthError) -> axum::response::Response {
    match err {
        AuthError::Unauthenticated => {
            json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "unauthenticated")
        }
        AuthError::InvalidCredentials => json_error(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            INVALID_CREDENTIALS_MESSAGE,
        ),
        AuthError::Unauthorized(e) => json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()),
        AuthError::NotFound(what) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
        }
        AuthError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        AuthError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        AuthError::Storage(e) => {
            tracing::error!(error = %e, "storage failure while serving request");
            internal_error()
        }
        AuthError::PasswordHash(msg) => {
            tracing::error!(error = %msg, "password hashing failure while serving request");
            internal_error()
        }
    }
}

fn internal_error() -> axum::response::Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal error",
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path/body identifier, answering 400 on garbage.
pub fn parse_id<T: std::str::FromStr>(raw: &str) -> Result<T, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid identifier"))
}
