//! Task endpoints: push-queue delivery callback and cancellation.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;
use tracing::{info, warn};

use marketdesk_core::TaskId;
use marketdesk_infra::tasks::{EnqueueOptions, Task, TaskResult, SIGNATURE_HEADER};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/deliver", post(deliver))
        .route("/:queue/:id/cancel", post(cancel))
}

/// Delivery endpoint for push transports.
///
/// Only deliveries signed by the push service are accepted. Non-2xx responses
/// make the service redeliver, so handler failures answer 500. A task that
/// arrives before its `run_at`, or whose handler defers it, is published
/// again with the remaining delay instead of running.
pub async fn deliver(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let Some(verifier) = services.delivery.as_ref() else {
        return errors::json_error(StatusCode::NOT_FOUND, "delivery_disabled", "push delivery is not enabled");
    };

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = verifier.verify(signature, &body) {
        warn!(error = %e, "rejected task delivery");
        return errors::delivery_error_to_response(e);
    }

    let task: Task = match serde_json::from_slice(&body) {
        Ok(task) => task,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.to_string()),
    };

    let now = services.clock.now();
    if task.run_at > now {
        let remaining = (task.run_at - now).to_std().unwrap_or_default();
        warn!(task_id = %task.id, kind = %task.kind, remaining_ms = remaining.as_millis() as u64, "task delivered early");
        return republish(&services, &task, remaining).await;
    }

    match services.executor.dispatch(&task).await {
        TaskResult::Success => {
            info!(task_id = %task.id, kind = %task.kind, "delivered task completed");
            Json(json!({ "status": "completed" })).into_response()
        }
        TaskResult::RetryAfter(delay) => republish(&services, &task, delay).await,
        TaskResult::Failure(msg) => {
            warn!(task_id = %task.id, kind = %task.kind, error = %msg, "delivered task failed");
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "task_failed", msg)
        }
    }
}

async fn republish(services: &AppServices, task: &Task, delay: Duration) -> axum::response::Response {
    let options = EnqueueOptions::delayed(delay).with_retry_policy(task.retry_policy.clone());
    match services
        .scheduler
        .enqueue(&task.queue, &task.kind, &task.payload, options)
        .await
    {
        Ok(next) => Json(json!({ "status": "deferred", "nextTaskId": next })).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Path((queue, id)): Path<(String, String)>,
) -> axum::response::Response {
    let task_id: TaskId = match id.parse() {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.scheduler.cancel(&queue, task_id).await {
        Ok(cancelled) => Json(json!({ "cancelled": cancelled })).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}
