//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend selection (Postgres or in-memory), audit sink, seeding
//! - `routes/`: HTTP handlers, one file per resource
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    Router::new()
        .merge(routes::public())
        .merge(routes::optional_auth(services.clone()))
        .merge(routes::protected(services.clone()))
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
