//! Deferred task scheduling with retry, backoff, and dead-letter handling.
//!
//! ## Design
//!
//! - Tasks carry a queue name, a kind, and a JSON payload
//! - A task never runs before its requested delay has elapsed
//! - Delivery is at-least-once; handlers must tolerate duplicates
//! - Failed tasks retry with backoff and are dead-lettered after max attempts
//!
//! ## Components
//!
//! - `Scheduler`: facade every producer enqueues through
//! - `TaskQueue` / `TaskSource`: producer and worker sides of a transport
//! - `InMemoryTaskQueue`, `RedisTaskQueue`, `HttpPushQueue`: transports
//! - `TaskExecutor`: dispatches claimed tasks to registered handlers
//! - `DeliveryVerifier`: authenticates push-queue callbacks

pub mod delivery;
pub mod executor;
pub mod http_push;
pub mod memory;
pub mod queue;
#[cfg(feature = "redis")]
pub mod redis;
pub mod scheduler;
pub mod types;

pub use delivery::{DeliveryClaims, DeliveryError, DeliveryVerifier, SIGNATURE_HEADER};
pub use executor::{
    ExecutionOutcome, ExecutorStats, TaskExecutor, TaskExecutorConfig, TaskExecutorHandle, TaskHandler,
};
pub use http_push::{HttpPushConfig, HttpPushQueue};
pub use memory::{InMemoryTaskQueue, QueueStats};
pub use queue::{QueueError, TaskQueue, TaskSource};
#[cfg(feature = "redis")]
pub use self::redis::RedisTaskQueue;
pub use scheduler::Scheduler;
pub use types::{BackoffStrategy, EnqueueOptions, RetryPolicy, Task, TaskAttemptRecord, TaskResult, TaskStatus};
