//! Redis-backed task transport (durable, at-least-once delivery).
//!
//! Layout per queue `q`:
//! - `marketdesk:tasks:q:ready`: sorted set of task ids scored by `run_at` (ms)
//! - `marketdesk:tasks:q:processing`: sorted set of claimed ids scored by lease deadline (ms)
//! - `marketdesk:tasks:q:data`: hash of task id -> JSON body
//! - `marketdesk:tasks:q:dlq`: list of dead-lettered task bodies
//!
//! Claiming runs as one Lua script (pick + move to processing + read body), so
//! concurrent workers never receive the same claim. A claimed body that does
//! not decode goes straight to the dead-letter list. A crashed worker's claim is
//! returned to `ready` by `requeue_expired` once its lease deadline passes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{instrument, warn};

use marketdesk_core::{Clock, SystemClock, TaskId};

use super::memory::DEFAULT_LEASE;
use super::queue::{QueueError, TaskQueue, TaskSource};
use super::types::{chrono_delay, EnqueueOptions, Task, TaskStatus};

const KEY_PREFIX: &str = "marketdesk:tasks";

const CLAIM_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
  return false
end
redis.call('ZREM', KEYS[1], ids[1])
redis.call('ZADD', KEYS[2], ARGV[2], ids[1])
return {ids[1], redis.call('HGET', KEYS[3], ids[1]) or ''}
"#;

const REQUEUE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(ids) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('ZADD', KEYS[2], ARGV[1], id)
end
return #ids
"#;

#[derive(Clone)]
pub struct RedisTaskQueue {
    client: Arc<redis::Client>,
    clock: Arc<dyn Clock>,
    lease: Duration,
}

impl std::fmt::Debug for RedisTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTaskQueue")
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

struct QueueKeys {
    ready: String,
    processing: String,
    data: String,
    dlq: String,
}

impl QueueKeys {
    fn for_queue(queue: &str) -> Self {
        Self {
            ready: format!("{KEY_PREFIX}:{queue}:ready"),
            processing: format!("{KEY_PREFIX}:{queue}:processing"),
            data: format!("{KEY_PREFIX}:{queue}:data"),
            dlq: format!("{KEY_PREFIX}:{queue}:dlq"),
        }
    }
}

fn map_redis_error(operation: &str, err: redis::RedisError) -> QueueError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        QueueError::Unavailable(format!("{operation}: {err}"))
    } else {
        QueueError::Storage(format!("{operation}: {err}"))
    }
}

fn encode(task: &Task) -> Result<String, QueueError> {
    serde_json::to_string(task).map_err(|e| QueueError::Serialization(e.to_string()))
}

fn decode(body: &str) -> Result<Task, QueueError> {
    serde_json::from_str(body).map_err(|e| QueueError::Serialization(e.to_string()))
}

/// Result of decoding a freshly claimed body.
#[derive(Debug)]
enum Claimed {
    Task(Task),
    /// Body that can never run; it is moved to the dead-letter list as is.
    Poison { id: String, body: String, reason: String },
}

fn decode_claimed(id: String, body: String) -> Claimed {
    match decode(&body) {
        Ok(task) if task.id.to_string() == id => Claimed::Task(task),
        Ok(task) => Claimed::Poison {
            reason: format!("body belongs to task {}", task.id),
            id,
            body,
        },
        Err(e) => Claimed::Poison {
            id,
            body,
            reason: e.to_string(),
        },
    }
}

impl RedisTaskQueue {
    /// Open a client for `redis_url` (e.g. "redis://localhost:6379").
    ///
    /// No connection is made until the first command.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            clock: Arc::new(SystemClock),
            lease: DEFAULT_LEASE,
        })
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| map_redis_error("connect", e))
    }

    /// Persist an updated body and move the id back into `ready` at `run_at`.
    async fn reschedule(&self, task: &Task) -> Result<(), QueueError> {
        let keys = QueueKeys::for_queue(&task.queue);
        let body = encode(task)?;
        let mut conn = self.connection().await?;

        redis::pipe()
            .atomic()
            .hset(&keys.data, task.id.to_string(), body)
            .ignore()
            .zrem(&keys.processing, task.id.to_string())
            .ignore()
            .zadd(&keys.ready, task.id.to_string(), task.run_at.timestamp_millis())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| map_redis_error("reschedule", e))
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    fn name(&self) -> &'static str {
        "redis"
    }

    #[instrument(skip(self, payload, options), err)]
    async fn enqueue(
        &self,
        queue: &str,
        kind: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<TaskId, QueueError> {
        let task = Task::new(queue, kind, payload, options, self.clock.now());
        let keys = QueueKeys::for_queue(queue);
        let body = encode(&task)?;
        let mut conn = self.connection().await?;

        redis::pipe()
            .atomic()
            .hset(&keys.data, task.id.to_string(), body)
            .ignore()
            .zadd(&keys.ready, task.id.to_string(), task.run_at.timestamp_millis())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| map_redis_error("enqueue", e))?;

        Ok(task.id)
    }

    fn supports_cancel(&self) -> bool {
        true
    }

    #[instrument(skip(self), err)]
    async fn cancel(&self, queue: &str, task_id: TaskId) -> Result<bool, QueueError> {
        let keys = QueueKeys::for_queue(queue);
        let mut conn = self.connection().await?;

        // Only ids still waiting in `ready` can be revoked; ZREM arbitrates
        // against a concurrent claim.
        let removed: i64 = redis::cmd("ZREM")
            .arg(&keys.ready)
            .arg(task_id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("cancel", e))?;

        if removed == 0 {
            return Ok(false);
        }

        let _: i64 = redis::cmd("HDEL")
            .arg(&keys.data)
            .arg(task_id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("cancel", e))?;
        Ok(true)
    }
}

#[async_trait]
impl TaskSource for RedisTaskQueue {
    async fn claim_next(&self, queue: &str) -> Result<Option<Task>, QueueError> {
        let keys = QueueKeys::for_queue(queue);
        let now = self.clock.now();
        let lease_deadline = now + chrono_delay(self.lease);
        let mut conn = self.connection().await?;

        loop {
            let claimed: Option<(String, String)> = redis::Script::new(CLAIM_SCRIPT)
                .key(&keys.ready)
                .key(&keys.processing)
                .key(&keys.data)
                .arg(now.timestamp_millis())
                .arg(lease_deadline.timestamp_millis())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| map_redis_error("claim_next", e))?;

            let Some((id, body)) = claimed else {
                return Ok(None);
            };

            let mut task = match decode_claimed(id, body) {
                Claimed::Task(task) => task,
                Claimed::Poison { id, body, reason } => {
                    warn!(queue, task_id = %id, reason = %reason, "undecodable task body dead-lettered");
                    redis::pipe()
                        .atomic()
                        .zrem(&keys.processing, &id)
                        .ignore()
                        .hdel(&keys.data, &id)
                        .ignore()
                        .rpush(&keys.dlq, body)
                        .ignore()
                        .query_async::<_, ()>(&mut conn)
                        .await
                        .map_err(|e| map_redis_error("claim_next", e))?;
                    continue;
                }
            };
            task.mark_running(now, self.lease);

            let _: i64 = redis::cmd("HSET")
                .arg(&keys.data)
                .arg(task.id.to_string())
                .arg(encode(&task)?)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error("claim_next", e))?;

            return Ok(Some(task));
        }
    }

    async fn complete(&self, task: &mut Task) -> Result<(), QueueError> {
        task.mark_completed(self.clock.now());
        let keys = QueueKeys::for_queue(&task.queue);
        let mut conn = self.connection().await?;

        redis::pipe()
            .atomic()
            .zrem(&keys.processing, task.id.to_string())
            .ignore()
            .hdel(&keys.data, task.id.to_string())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| map_redis_error("complete", e))
    }

    async fn fail(&self, task: &mut Task, error: String) -> Result<(), QueueError> {
        task.mark_failed(error, self.clock.now());

        if !matches!(task.status, TaskStatus::DeadLettered { .. }) {
            return self.reschedule(task).await;
        }

        warn!(queue = %task.queue, task_id = %task.id, kind = %task.kind, "task dead-lettered");
        let keys = QueueKeys::for_queue(&task.queue);
        let body = encode(task)?;
        let mut conn = self.connection().await?;

        redis::pipe()
            .atomic()
            .zrem(&keys.processing, task.id.to_string())
            .ignore()
            .hdel(&keys.data, task.id.to_string())
            .ignore()
            .rpush(&keys.dlq, body)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| map_redis_error("dead_letter", e))
    }

    async fn retry_after(&self, task: &mut Task, delay: Duration) -> Result<(), QueueError> {
        task.mark_deferred(delay, self.clock.now());
        self.reschedule(task).await
    }

    async fn requeue_expired(&self, queue: &str) -> Result<usize, QueueError> {
        let keys = QueueKeys::for_queue(queue);
        let now = self.clock.now();
        let mut conn = self.connection().await?;

        // Bodies keep their Running status; the next claim overwrites it.
        let moved: i64 = redis::Script::new(REQUEUE_SCRIPT)
            .key(&keys.processing)
            .key(&keys.ready)
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("requeue_expired", e))?;

        if moved > 0 {
            warn!(queue, moved, "requeued tasks with expired leases");
        }
        Ok(moved.max(0) as usize)
    }
}
