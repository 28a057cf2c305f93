//! Task executor: handler registry and polling worker loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::queue::{QueueError, TaskSource};
use super::types::{Task, TaskResult, TaskStatus};

/// Handler for one task kind. Must tolerate duplicate delivery.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: &Task) -> TaskResult;
}

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct TaskExecutorConfig {
    /// How long to sleep when every queue is empty
    pub poll_interval: Duration,
    /// How often abandoned claims are returned to their queue
    pub lease_check_interval: Duration,
    /// Queues this executor drains
    pub queues: Vec<String>,
    /// Name for logging
    pub name: String,
}

impl Default for TaskExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            lease_check_interval: Duration::from_secs(30),
            queues: Vec::new(),
            name: "task-executor".to_string(),
        }
    }
}

impl TaskExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queues.push(queue.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub tasks_processed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_deferred: u64,
    pub tasks_dead_lettered: u64,
    pub uptime_secs: u64,
}

/// Handle to a running executor loop.
#[derive(Debug)]
pub struct TaskExecutorHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl TaskExecutorHandle {
    /// Request graceful shutdown and wait for the in-flight task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        match self.stats.lock() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// What happened to a claimed task after its handler ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Retrying(String),
    DeadLettered(String),
    Deferred(Duration),
}

/// Dispatches claimed tasks to the handler registered for their kind.
#[derive(Default)]
pub struct TaskExecutor {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a task kind, replacing any previous one.
    pub fn register_handler(&mut self, kind: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    /// Run the handler for `task` and report its result.
    ///
    /// The handler runs on its own tokio task so a panic surfaces as a
    /// failure instead of taking the worker loop down.
    pub async fn dispatch(&self, task: &Task) -> TaskResult {
        let Some(handler) = self.handlers.get(&task.kind).cloned() else {
            warn!(task_id = %task.id, kind = %task.kind, "no handler for task kind");
            return TaskResult::Failure(format!("no handler for task kind: {}", task.kind));
        };

        let owned = task.clone();
        match tokio::spawn(async move { handler.handle(&owned).await }).await {
            Ok(result) => result,
            Err(join_err) => {
                error!(task_id = %task.id, kind = %task.kind, error = %join_err, "task handler panicked");
                TaskResult::Failure(format!("handler panicked: {join_err}"))
            }
        }
    }

    /// Execute a claimed task and acknowledge the result on `source`.
    pub async fn execute_one<S: TaskSource + ?Sized>(
        &self,
        source: &S,
        task: &mut Task,
    ) -> Result<ExecutionOutcome, QueueError> {
        match self.dispatch(task).await {
            TaskResult::Success => {
                source.complete(task).await?;
                debug!(task_id = %task.id, kind = %task.kind, "task completed");
                Ok(ExecutionOutcome::Completed)
            }
            TaskResult::Failure(err) => {
                source.fail(task, err.clone()).await?;
                if matches!(task.status, TaskStatus::DeadLettered { .. }) {
                    warn!(task_id = %task.id, kind = %task.kind, error = %err, "task dead-lettered");
                    Ok(ExecutionOutcome::DeadLettered(err))
                } else {
                    debug!(task_id = %task.id, kind = %task.kind, error = %err, attempt = task.attempt, "task failed; retry scheduled");
                    Ok(ExecutionOutcome::Retrying(err))
                }
            }
            TaskResult::RetryAfter(delay) => {
                source.retry_after(task, delay).await?;
                debug!(task_id = %task.id, kind = %task.kind, delay_secs = delay.as_secs(), "task deferred");
                Ok(ExecutionOutcome::Deferred(delay))
            }
        }
    }

    /// Spawn the polling loop on the tokio runtime.
    pub fn spawn(self: Arc<Self>, source: Arc<dyn TaskSource>, config: TaskExecutorConfig) -> TaskExecutorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));

        let join = tokio::spawn(executor_loop(self, source, config, shutdown_rx, stats.clone()));

        TaskExecutorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }
}

fn record(stats: &Mutex<ExecutorStats>, f: impl FnOnce(&mut ExecutorStats)) {
    if let Ok(mut s) = stats.lock() {
        f(&mut s);
    }
}

async fn executor_loop(
    executor: Arc<TaskExecutor>,
    source: Arc<dyn TaskSource>,
    config: TaskExecutorConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    stats: Arc<Mutex<ExecutorStats>>,
) {
    info!(executor = %config.name, queues = ?config.queues, "task executor started");
    let started = Instant::now();
    let mut last_lease_check: Option<Instant> = None;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        record(&stats, |s| s.uptime_secs = started.elapsed().as_secs());

        if last_lease_check.is_none_or(|at| at.elapsed() >= config.lease_check_interval) {
            for queue in &config.queues {
                if let Err(e) = source.requeue_expired(queue).await {
                    error!(executor = %config.name, queue = %queue, error = %e, "failed to requeue expired claims");
                }
            }
            last_lease_check = Some(Instant::now());
        }

        let mut worked = false;
        for queue in &config.queues {
            let mut task = match source.claim_next(queue).await {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(e) => {
                    error!(executor = %config.name, queue = %queue, error = %e, "failed to claim task");
                    continue;
                }
            };
            worked = true;

            debug!(executor = %config.name, task_id = %task.id, kind = %task.kind, attempt = task.attempt, "claimed task");

            let outcome = executor.execute_one(source.as_ref(), &mut task).await;
            record(&stats, |s| {
                s.tasks_processed += 1;
                match &outcome {
                    Ok(ExecutionOutcome::Completed) => s.tasks_succeeded += 1,
                    Ok(ExecutionOutcome::Retrying(_)) => s.tasks_failed += 1,
                    Ok(ExecutionOutcome::DeadLettered(_)) => {
                        s.tasks_failed += 1;
                        s.tasks_dead_lettered += 1;
                    }
                    Ok(ExecutionOutcome::Deferred(_)) => s.tasks_deferred += 1,
                    Err(_) => s.tasks_failed += 1,
                }
            });

            if let Err(e) = outcome {
                error!(executor = %config.name, task_id = %task.id, error = %e, "failed to acknowledge task");
            }
        }

        if !worked {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
    }

    info!(executor = %config.name, "task executor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use marketdesk_core::FixedClock;

    use crate::tasks::memory::InMemoryTaskQueue;
    use crate::tasks::queue::TaskQueue;
    use crate::tasks::types::{EnqueueOptions, RetryPolicy};

    struct Fixed(TaskResult);

    #[async_trait]
    impl TaskHandler for Fixed {
        async fn handle(&self, _task: &Task) -> TaskResult {
            self.0.clone()
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl TaskHandler for Counting {
        async fn handle(&self, _task: &Task) -> TaskResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            TaskResult::Success
        }
    }

    struct Panicking;

    #[async_trait]
    impl TaskHandler for Panicking {
        async fn handle(&self, _task: &Task) -> TaskResult {
            panic!("handler bug")
        }
    }

    async fn enqueue_and_claim(queue: &InMemoryTaskQueue, kind: &str, options: EnqueueOptions) -> Task {
        queue.enqueue("q", kind, serde_json::json!({}), options).await.unwrap();
        queue.claim_next("q").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn successful_task_is_completed() {
        let queue = InMemoryTaskQueue::new();
        let mut executor = TaskExecutor::new();
        executor.register_handler("test", Arc::new(Fixed(TaskResult::Success)));

        let mut task = enqueue_and_claim(&queue, "test", EnqueueOptions::default()).await;
        let outcome = executor.execute_one(&queue, &mut task).await.unwrap();

        assert_eq!(outcome, ExecutionOutcome::Completed);
        assert_eq!(queue.get(task.id).unwrap().unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn failing_task_retries_then_dead_letters() {
        let queue = InMemoryTaskQueue::new();
        let mut executor = TaskExecutor::new();
        executor.register_handler("test", Arc::new(Fixed(TaskResult::Failure("nope".to_string()))));

        let options = EnqueueOptions::default().with_retry_policy(RetryPolicy::fixed(2, Duration::ZERO));
        let mut task = enqueue_and_claim(&queue, "test", options).await;
        let first = executor.execute_one(&queue, &mut task).await.unwrap();
        assert!(matches!(first, ExecutionOutcome::Retrying(_)));

        let mut task = queue.claim_next("q").await.unwrap().unwrap();
        let second = executor.execute_one(&queue, &mut task).await.unwrap();
        assert!(matches!(second, ExecutionOutcome::DeadLettered(_)));
    }

    #[tokio::test]
    async fn deferral_reschedules_the_same_task() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let queue = InMemoryTaskQueue::with_clock(clock.clone());
        let mut executor = TaskExecutor::new();
        executor.register_handler("test", Arc::new(Fixed(TaskResult::RetryAfter(Duration::from_secs(60)))));

        let mut task = enqueue_and_claim(&queue, "test", EnqueueOptions::default()).await;
        let outcome = executor.execute_one(&queue, &mut task).await.unwrap();

        assert_eq!(outcome, ExecutionOutcome::Deferred(Duration::from_secs(60)));
        assert!(queue.claim_next("q").await.unwrap().is_none());
        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(queue.claim_next("q").await.unwrap().unwrap().id, task.id);
    }

    #[tokio::test]
    async fn missing_handler_and_panics_are_failures() {
        let queue = InMemoryTaskQueue::new();
        let mut executor = TaskExecutor::new();
        executor.register_handler("boom", Arc::new(Panicking));

        let mut orphan = enqueue_and_claim(&queue, "unknown", EnqueueOptions::default()).await;
        assert!(matches!(
            executor.execute_one(&queue, &mut orphan).await.unwrap(),
            ExecutionOutcome::Retrying(_)
        ));

        let mut panicking = enqueue_and_claim(&queue, "boom", EnqueueOptions::default()).await;
        assert!(matches!(
            executor.dispatch(&panicking).await,
            TaskResult::Failure(msg) if msg.contains("panicked")
        ));
        executor.execute_one(&queue, &mut panicking).await.unwrap();
    }

    #[tokio::test]
    async fn handlers_match_the_exact_kind() {
        let mut executor = TaskExecutor::new();
        executor.register_handler("checkPaymentStatus", Arc::new(Fixed(TaskResult::Success)));

        let task = |kind: &str| Task::new("q", kind, serde_json::json!({}), EnqueueOptions::default(), Utc::now());
        assert_eq!(executor.dispatch(&task("checkPaymentStatus")).await, TaskResult::Success);
        assert!(matches!(
            executor.dispatch(&task("checkPaymentStatus.v2")).await,
            TaskResult::Failure(msg) if msg.contains("no handler")
        ));
    }

    #[tokio::test]
    async fn spawned_loop_drains_queue_and_shuts_down() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let mut executor = TaskExecutor::new();
        executor.register_handler("count", Arc::new(Counting(hits.clone())));

        for _ in 0..3 {
            queue.enqueue("q", "count", serde_json::json!({}), EnqueueOptions::default()).await.unwrap();
        }

        let handle = Arc::new(executor).spawn(
            queue.clone(),
            TaskExecutorConfig::default()
                .with_queue("q")
                .with_poll_interval(Duration::from_millis(10)),
        );

        for _ in 0..100 {
            if hits.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(handle.stats().tasks_succeeded, 3);
        handle.shutdown().await;
        assert_eq!(queue.stats("q").unwrap().completed, 3);
    }
}
