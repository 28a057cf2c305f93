use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use marketdesk_content::Post;
use marketdesk_core::PostId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_post).get(list_posts))
        .route("/:id", get(get_post))
}

pub async fn create_post(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreatePostRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    let platforms: Vec<&str> = body.platforms.iter().map(String::as_str).collect();
    let post = match Post::schedule(body.title, &platforms, body.scheduled_at, Utc::now()) {
        Ok(p) => p,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.posts.insert(&post).await {
        Ok(()) => (StatusCode::CREATED, Json(post)).into_response(),
        Err(e) => errors::repository_error_to_response(e),
    }
}

pub async fn list_posts(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.posts.list_all().await {
        Ok(posts) => Json(posts).into_response(),
        Err(e) => errors::repository_error_to_response(e),
    }
}

pub async fn get_post(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let post_id: PostId = match id.parse() {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.posts.get(post_id).await {
        Ok(Some(post)) => Json(post).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("post {post_id} not found")),
        Err(e) => errors::repository_error_to_response(e),
    }
}

/// On-demand publisher sweep.
pub async fn update_scheduled_status(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.publisher.sweep().await {
        Ok(report) => Json(serde_json::json!({
            "updatedCount": report.updated_count,
            "failedCount": report.failed_count,
        }))
        .into_response(),
        Err(e) => errors::repository_error_to_response(e),
    }
}
