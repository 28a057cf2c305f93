use axum::{
    routing::{get, post},
    Router,
};

pub mod orders;
pub mod payments;
pub mod posts;
pub mod system;
pub mod tasks;

/// Router for every endpoint except `/health`.
pub fn router() -> Router {
    Router::new()
        .route("/link-order", post(payments::link_order))
        .route("/check-status", get(payments::check_status))
        .route("/update-scheduled-status", post(posts::update_scheduled_status))
        .nest("/orders", orders::router())
        .nest("/posts", posts::router())
        .nest("/tasks", tasks::router())
}
