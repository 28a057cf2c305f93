//! In-memory task transport for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use marketdesk_core::{Clock, SystemClock, TaskId};

use super::queue::{QueueError, TaskQueue, TaskSource};
use super::types::{EnqueueOptions, Task, TaskStatus};

/// Default claim lease before an unacknowledged task is redelivered.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);

/// Per-status counts, mostly for tests and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub cancelled: usize,
}

/// Finished tasks kept per tail for inspection.
pub const DEFAULT_RETENTION: usize = 1_000;

#[derive(Default)]
struct QueueState {
    /// Tasks that can still run: pending, running, or awaiting a retry.
    live: HashMap<TaskId, Task>,
    /// Completed and cancelled tasks, oldest first.
    finished: VecDeque<Task>,
    dead_letters: VecDeque<Task>,
}

impl QueueState {
    fn all(&self) -> impl Iterator<Item = &Task> {
        self.live.values().chain(self.finished.iter()).chain(self.dead_letters.iter())
    }

    /// Move a task that reached a terminal status out of the live map.
    fn retire(&mut self, task: Task, retention: usize) {
        self.live.remove(&task.id);
        let tail = if matches!(task.status, TaskStatus::DeadLettered { .. }) {
            &mut self.dead_letters
        } else {
            &mut self.finished
        };
        tail.push_back(task);
        while tail.len() > retention {
            tail.pop_front();
        }
    }
}

/// Process-local queue. Claims are serialized by a single write lock, so a
/// task is never handed to two workers at once. Terminal tasks leave the
/// live set and only a bounded tail of them is kept.
pub struct InMemoryTaskQueue {
    state: RwLock<QueueState>,
    clock: Arc<dyn Clock>,
    lease: Duration,
    retention: usize,
}

impl std::fmt::Debug for InMemoryTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTaskQueue")
            .field("lease", &self.lease)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(QueueState::default()),
            clock,
            lease: DEFAULT_LEASE,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn get(&self, task_id: TaskId) -> Result<Option<Task>, QueueError> {
        let state = self.read()?;
        Ok(state.all().find(|t| t.id == task_id).cloned())
    }

    /// Live and retained tasks of a queue ordered by creation time.
    pub fn list(&self, queue: &str) -> Result<Vec<Task>, QueueError> {
        let state = self.read()?;
        let mut result: Vec<Task> = state.all().filter(|t| t.queue == queue).cloned().collect();
        result.sort_by_key(|t| t.created_at);
        Ok(result)
    }

    pub fn dead_letters(&self, queue: &str) -> Result<Vec<Task>, QueueError> {
        let state = self.read()?;
        Ok(state.dead_letters.iter().filter(|t| t.queue == queue).cloned().collect())
    }

    pub fn stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        let state = self.read()?;
        let mut stats = QueueStats::default();
        for task in state.all().filter(|t| t.queue == queue) {
            match &task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed { .. } => stats.failed += 1,
                TaskStatus::DeadLettered { .. } => stats.dead_lettered += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, QueueState>, QueueError> {
        self.state
            .read()
            .map_err(|_| QueueError::Storage("task map lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, QueueState>, QueueError> {
        self.state
            .write()
            .map_err(|_| QueueError::Storage("task map lock poisoned".to_string()))
    }

    /// Write back a task the caller has transitioned.
    fn store(&self, task: &Task) -> Result<(), QueueError> {
        let mut state = self.write()?;
        if !state.live.contains_key(&task.id) {
            return Err(QueueError::NotFound(task.id));
        }
        if task.status.is_terminal() {
            state.retire(task.clone(), self.retention);
        } else {
            state.live.insert(task.id, task.clone());
        }
        Ok(())
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn enqueue(
        &self,
        queue: &str,
        kind: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<TaskId, QueueError> {
        let task = Task::new(queue, kind, payload, options, self.clock.now());
        let id = task.id;
        self.write()?.live.insert(id, task);
        Ok(id)
    }

    fn supports_cancel(&self) -> bool {
        true
    }

    async fn cancel(&self, queue: &str, task_id: TaskId) -> Result<bool, QueueError> {
        let now = self.clock.now();
        let mut state = self.write()?;
        let mut task = match state.live.get(&task_id) {
            Some(task) if task.queue == queue && task.status.is_claimable() => task.clone(),
            _ => return Ok(false),
        };
        task.mark_cancelled(now);
        state.retire(task, self.retention);
        Ok(true)
    }
}

#[async_trait]
impl TaskSource for InMemoryTaskQueue {
    async fn claim_next(&self, queue: &str) -> Result<Option<Task>, QueueError> {
        let now = self.clock.now();
        let mut state = self.write()?;

        let next = state
            .live
            .values()
            .filter(|t| t.queue == queue && t.is_ready(now))
            .min_by_key(|t| (t.run_at, t.created_at))
            .map(|t| t.id);

        Ok(next.and_then(|id| {
            state.live.get_mut(&id).map(|task| {
                task.mark_running(now, self.lease);
                task.clone()
            })
        }))
    }

    async fn complete(&self, task: &mut Task) -> Result<(), QueueError> {
        task.mark_completed(self.clock.now());
        self.store(task)
    }

    async fn fail(&self, task: &mut Task, error: String) -> Result<(), QueueError> {
        task.mark_failed(error, self.clock.now());
        self.store(task)
    }

    async fn retry_after(&self, task: &mut Task, delay: Duration) -> Result<(), QueueError> {
        task.mark_deferred(delay, self.clock.now());
        self.store(task)
    }

    async fn requeue_expired(&self, queue: &str) -> Result<usize, QueueError> {
        let now = self.clock.now();
        let mut state = self.write()?;
        let mut requeued = 0;
        for task in state
            .live
            .values_mut()
            .filter(|t| t.queue == queue && t.lease_expired(now))
        {
            task.release_lease(now);
            requeued += 1;
        }
        Ok(requeued)
    }
}
