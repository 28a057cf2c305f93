//! Deferred task scheduler facade.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use marketdesk_core::TaskId;

use super::queue::{QueueError, TaskQueue};
use super::types::EnqueueOptions;

/// Entry point for deferring work.
///
/// Constructed once at process start around the configured transport and
/// handed to every component that needs to schedule tasks.
#[derive(Clone)]
pub struct Scheduler {
    transport: Arc<dyn TaskQueue>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("transport", &self.transport.name())
            .finish()
    }
}

impl Scheduler {
    pub fn new(transport: Arc<dyn TaskQueue>) -> Self {
        Self { transport }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Enqueue a task. Transport failures are returned to the caller.
    #[instrument(skip(self, payload, options), fields(transport = self.transport.name(), delay_ms = options.delay.as_millis() as u64), err)]
    pub async fn enqueue<P: Serialize + ?Sized>(
        &self,
        queue: &str,
        kind: &str,
        payload: &P,
        options: EnqueueOptions,
    ) -> Result<TaskId, QueueError> {
        let payload =
            serde_json::to_value(payload).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let task_id = self.transport.enqueue(queue, kind, payload, options).await?;
        info!(queue, kind, task_id = %task_id, "task enqueued");
        Ok(task_id)
    }

    pub fn supports_cancel(&self) -> bool {
        self.transport.supports_cancel()
    }

    /// Best-effort cancellation.
    ///
    /// Returns `Err(QueueError::CancelUnsupported)` when the transport cannot
    /// revoke tasks, and `Ok(false)` when the task was unknown or had already
    /// been handed to a worker. A successful return does not stop an execution
    /// that is already in flight.
    pub async fn cancel(&self, queue: &str, task_id: TaskId) -> Result<bool, QueueError> {
        if !self.transport.supports_cancel() {
            warn!(queue, task_id = %task_id, transport = self.transport.name(), "cancel requested on transport without revocation");
            return Err(QueueError::CancelUnsupported(self.transport.name()));
        }

        let cancelled = self.transport.cancel(queue, task_id).await?;
        info!(queue, task_id = %task_id, cancelled, "task cancel requested");
        Ok(cancelled)
    }
}
