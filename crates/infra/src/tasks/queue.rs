//! Task transport abstractions.
//!
//! A transport is split in two halves: the producer side (`TaskQueue`) that
//! request handlers use to defer work, and the consumer side (`TaskSource`)
//! that workers pull from. Push-style managed queues only implement the
//! producer half; they deliver over HTTP instead of being polled.

use std::time::Duration;

use async_trait::async_trait;

use marketdesk_core::TaskId;

use super::types::{EnqueueOptions, Task};

/// Task transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue transport unavailable: {0}")]
    Unavailable(String),
    #[error("task serialization error: {0}")]
    Serialization(String),
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("cancellation is not supported by the {0} transport")]
    CancelUnsupported(&'static str),
    #[error("queue storage error: {0}")]
    Storage(String),
}

/// Producer half of a deferred-task transport.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Short transport name for logs and errors.
    fn name(&self) -> &'static str;

    /// Queue `kind` on `queue`; it becomes eligible no earlier than
    /// `now + options.delay`.
    async fn enqueue(
        &self,
        queue: &str,
        kind: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<TaskId, QueueError>;

    /// Whether `cancel` can revoke a task at all on this transport.
    fn supports_cancel(&self) -> bool;

    /// Best-effort revocation. `Ok(false)` when the task is unknown or was
    /// already dispatched. Never call on a transport that does not support it.
    async fn cancel(&self, queue: &str, task_id: TaskId) -> Result<bool, QueueError>;
}

/// Consumer half of a deferred-task transport.
///
/// Delivery is at-least-once: a claim whose lease expires before it is
/// acknowledged goes back to the queue, so handlers must be idempotent.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Claim the oldest task of `queue` whose `run_at` has passed.
    async fn claim_next(&self, queue: &str) -> Result<Option<Task>, QueueError>;

    /// Acknowledge successful execution.
    async fn complete(&self, task: &mut Task) -> Result<(), QueueError>;

    /// Record a failure; the task's retry policy decides between a delayed
    /// retry and dead-lettering.
    async fn fail(&self, task: &mut Task, error: String) -> Result<(), QueueError>;

    /// Put the task back, eligible again after `delay`.
    async fn retry_after(&self, task: &mut Task, delay: Duration) -> Result<(), QueueError>;

    /// Return claims with expired leases to the queue. Returns how many.
    async fn requeue_expired(&self, queue: &str) -> Result<usize, QueueError>;
}
