//! Minimal order endpoints so callers (and tests) can seed and inspect the
//! payment-relevant part of an order.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use marketdesk_core::OrderId;
use marketdesk_orders::Order;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order))
        .route("/:id", get(get_order))
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateOrderRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let order_id = match body.order_id.parse() {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let order = Order::pending(order_id, Utc::now());
    match services.orders.insert(&order).await {
        Ok(()) => (StatusCode::CREATED, Json(order)).into_response(),
        Err(e) => errors::repository_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match id.parse() {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.orders.get(order_id).await {
        Ok(Some(order)) => Json(order).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("order {order_id} not found")),
        Err(e) => errors::repository_error_to_response(e),
    }
}
