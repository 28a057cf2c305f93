//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (repositories, task transport, workflows)
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, InMemoryBackends};

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
