use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Query},
    response::IntoResponse,
    Json,
};

use marketdesk_core::{DomainError, OrderId};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub async fn link_order(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::LinkOrderRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    let (order_id, session, mini_app_id) = match body.validate() {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services
        .reconciliation
        .link_order(order_id, session, mini_app_id)
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

pub async fn check_status(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::CheckStatusQuery>,
) -> axum::response::Response {
    let order_id: OrderId = match query.order_id.as_deref() {
        Some(raw) => match raw.parse() {
            Ok(id) => id,
            Err(e) => return errors::domain_error_to_response(e),
        },
        None => return errors::domain_error_to_response(DomainError::validation("orderId is required")),
    };

    match services.reconciliation.check_status(order_id).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}
