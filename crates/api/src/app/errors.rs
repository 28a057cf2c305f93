use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use marketdesk_core::DomainError;
use marketdesk_infra::repositories::RepositoryError;
use marketdesk_infra::tasks::{DeliveryError, QueueError};
use marketdesk_infra::workflows::WorkflowError;

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound(what) => json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found")),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
    }
}

pub fn repository_error_to_response(err: RepositoryError) -> axum::response::Response {
    match err {
        RepositoryError::NotFound(what) => json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found")),
        RepositoryError::Domain(e) => domain_error_to_response(e),
        RepositoryError::Storage(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg),
    }
}

pub fn workflow_error_to_response(err: WorkflowError) -> axum::response::Response {
    match err {
        WorkflowError::Domain(e) => domain_error_to_response(e),
        WorkflowError::NotFound(what) => json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found")),
        WorkflowError::Storage(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg),
        WorkflowError::Gateway(e) => json_error(StatusCode::BAD_GATEWAY, "payment_provider_error", e.to_string()),
        WorkflowError::Queue(e) => queue_error_to_response(e),
    }
}

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::CancelUnsupported(transport) => json_error(
            StatusCode::NOT_IMPLEMENTED,
            "cancel_unsupported",
            format!("the {transport} transport cannot cancel tasks"),
        ),
        QueueError::NotFound(id) => json_error(StatusCode::NOT_FOUND, "not_found", format!("task {id} not found")),
        QueueError::Unavailable(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", msg),
        QueueError::Serialization(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialization_error", msg),
        QueueError::Storage(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue_error", msg),
    }
}

pub fn delivery_error_to_response(err: DeliveryError) -> axum::response::Response {
    json_error(StatusCode::UNAUTHORIZED, "invalid_signature", err.to_string())
}

/// Malformed or mistyped JSON bodies are client errors (400), not 422.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text())
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
