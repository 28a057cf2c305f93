//! Managed push-queue transport.
//!
//! Tasks are published to an HTTP message service together with a delay; the
//! service calls our delivery endpoint back once the delay has elapsed and
//! retries on non-2xx responses. Publishing is fire-and-forget from our side,
//! so this transport cannot revoke a task once it has been accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use marketdesk_core::{Clock, SystemClock, TaskId};

use super::queue::{QueueError, TaskQueue};
use super::types::{EnqueueOptions, Task};

/// Connection settings for the push service.
#[derive(Debug, Clone)]
pub struct HttpPushConfig {
    /// Base URL of the message service (e.g. "https://qstash.upstash.io").
    pub service_url: String,
    pub token: String,
    /// Public URL of our `POST /tasks/deliver` endpoint.
    pub callback_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    message_id: Option<String>,
}

#[derive(Clone)]
pub struct HttpPushQueue {
    http: reqwest::Client,
    config: HttpPushConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for HttpPushQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPushQueue")
            .field("service_url", &self.config.service_url)
            .field("callback_url", &self.config.callback_url)
            .finish_non_exhaustive()
    }
}

impl HttpPushQueue {
    pub fn new(config: HttpPushConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn publish_url(&self) -> String {
        format!(
            "{}/v2/publish/{}",
            self.config.service_url.trim_end_matches('/'),
            self.config.callback_url
        )
    }
}

/// Whole seconds for the delay header, rounded up so delivery never precedes
/// `run_at`.
fn delay_header_secs(delay: Duration) -> u128 {
    delay.as_millis().div_ceil(1000)
}

#[async_trait]
impl TaskQueue for HttpPushQueue {
    fn name(&self) -> &'static str {
        "http-push"
    }

    #[instrument(skip(self, payload, options), err)]
    async fn enqueue(
        &self,
        queue: &str,
        kind: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<TaskId, QueueError> {
        let delay_secs = delay_header_secs(options.delay);
        let task = Task::new(queue, kind, payload, options, self.clock.now());

        let response = self
            .http
            .post(self.publish_url())
            .bearer_auth(&self.config.token)
            .header("Upstash-Delay", format!("{delay_secs}s"))
            .header("Upstash-Retries", task.retry_policy.max_attempts.saturating_sub(1).to_string())
            .json(&task)
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Unavailable(format!(
                "publish rejected with {status}: {body}"
            )));
        }

        let published: PublishResponse = response
            .json()
            .await
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        debug!(task_id = %task.id, message_id = ?published.message_id, "task published to push queue");

        Ok(task.id)
    }

    fn supports_cancel(&self) -> bool {
        false
    }

    async fn cancel(&self, _queue: &str, _task_id: TaskId) -> Result<bool, QueueError> {
        Err(QueueError::CancelUnsupported(self.name()))
    }
}
