//! Core task types and retry policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use marketdesk_core::TaskId;

/// Longest delay a task may carry; larger requests are clamped.
const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Convert a std duration into a chrono one, clamped to `MAX_DELAY`.
pub(crate) fn chrono_delay(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay.min(MAX_DELAY)).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Task execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Queued, waiting for `run_at`
    Pending,
    /// Claimed by a worker
    Running,
    /// Completed successfully
    Completed,
    /// Failed, will be retried
    Failed { error: String, attempt: u32 },
    /// Exhausted retries
    DeadLettered { error: String, attempts: u32 },
    /// Revoked before dispatch
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::DeadLettered { .. } | TaskStatus::Cancelled
        )
    }

    /// Whether a worker may still pick this task up.
    pub fn is_claimable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Failed { .. })
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// base * 2^(attempt-1)
    #[default]
    Exponential,
    /// base * attempt
    Linear,
}

/// Retry policy applied when a handler reports a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts before dead-lettering
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Single attempt; a failure dead-letters immediately.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Delay before the retry that follows `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1).min(30) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        // Deterministic jitter derived from the attempt number.
        let jitter_range = delay_ms * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Options accepted by `enqueue`.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Minimum time before the task becomes eligible.
    pub delay: Duration,
    /// Overrides the queue's default retry policy.
    pub retry_policy: Option<RetryPolicy>,
}

impl EnqueueOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            retry_policy: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

/// A deferred unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    /// Queue grouping related tasks (e.g. "payment-status").
    pub queue: String,
    /// Handler discriminator (e.g. "checkPaymentStatus").
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub retry_policy: RetryPolicy,
    /// Number of times the task has been claimed.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest execution time.
    pub run_at: DateTime<Utc>,
    /// While running: after this instant the claim is considered abandoned.
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub history: Vec<TaskAttemptRecord>,
}

/// Record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Task {
    /// Create a task that becomes eligible at `now + options.delay`.
    pub fn new(
        queue: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
        options: EnqueueOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            queue: queue.into(),
            kind: kind.into(),
            payload,
            status: TaskStatus::Pending,
            retry_policy: options.retry_policy.unwrap_or_default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            run_at: now + chrono_delay(options.delay),
            lease_expires_at: None,
            started_at: None,
            history: Vec::new(),
        }
    }

    /// Eligible for execution: claimable and `run_at` has been reached.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.run_at <= now
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Running && self.lease_expires_at.is_some_and(|at| at <= now)
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>, lease: Duration) {
        self.status = TaskStatus::Running;
        self.attempt += 1;
        self.started_at = Some(now);
        self.lease_expires_at = Some(now + chrono_delay(lease));
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.record_attempt(now, None);
        self.status = TaskStatus::Completed;
        self.lease_expires_at = None;
        self.updated_at = now;
    }

    /// Record a failure and either schedule a retry with backoff or dead-letter.
    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.record_attempt(now, Some(error.clone()));
        self.lease_expires_at = None;
        self.updated_at = now;

        if self.retry_policy.should_retry(self.attempt) {
            let delay = self.retry_policy.delay_for_attempt(self.attempt);
            self.run_at = now + chrono_delay(delay);
            self.status = TaskStatus::Failed {
                error,
                attempt: self.attempt,
            };
        } else {
            self.status = TaskStatus::DeadLettered {
                error,
                attempts: self.attempt,
            };
        }
    }

    /// Put the task back in the queue after `delay` without consuming a retry.
    pub fn mark_deferred(&mut self, delay: Duration, now: DateTime<Utc>) {
        self.record_attempt(now, Some(format!("deferred for {}s", delay.as_secs())));
        self.attempt = self.attempt.saturating_sub(1);
        self.status = TaskStatus::Pending;
        self.run_at = now + chrono_delay(delay);
        self.lease_expires_at = None;
        self.updated_at = now;
    }

    /// Return an abandoned claim to the queue.
    pub fn release_lease(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Pending;
        self.lease_expires_at = None;
        self.run_at = now;
        self.updated_at = now;
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.updated_at = now;
    }

    fn record_attempt(&mut self, now: DateTime<Utc>, error: Option<String>) {
        let started_at = self.started_at.unwrap_or(now);
        self.history.push(TaskAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            success: error.is_none(),
            error,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }
}

/// Outcome a handler reports for one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    Success,
    /// Failed; the task's retry policy decides what happens next.
    Failure(String),
    /// Not done yet; run again after the delay without consuming a retry.
    RetryAfter(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_task(options: EnqueueOptions) -> Task {
        Task::new(
            "payment-status",
            "checkPaymentStatus",
            serde_json::json!({"orderId": 42}),
            options,
            Utc::now(),
        )
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(10));
    }

    #[test]
    fn linear_and_fixed_backoff() {
        let linear = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
            base_delay: Duration::from_millis(100),
            ..Default::default()
        };
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(300));

        let fixed = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(fixed.delay_for_attempt(1), fixed.delay_for_attempt(3));
    }

    #[test]
    fn delay_sets_earliest_execution_time() {
        let task = test_task(EnqueueOptions::delayed(Duration::from_secs(1200)));
        assert_eq!(task.run_at - task.created_at, chrono::Duration::minutes(20));
        assert!(!task.is_ready(task.created_at));
        assert!(!task.is_ready(task.run_at - chrono::Duration::milliseconds(1)));
        assert!(task.is_ready(task.run_at));
    }

    #[test]
    fn task_lifecycle() {
        let mut task = test_task(EnqueueOptions::default());
        let now = task.created_at;

        task.mark_running(now, Duration::from_secs(30));
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.attempt, 1);
        assert!(!task.lease_expired(now));
        assert!(task.lease_expired(now + chrono::Duration::seconds(30)));

        task.mark_completed(now);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.history.len(), 1);
        assert!(task.history[0].success);
    }

    #[test]
    fn failure_retries_then_dead_letters() {
        let mut task =
            test_task(EnqueueOptions::default().with_retry_policy(RetryPolicy::fixed(2, Duration::from_secs(1))));
        let now = task.created_at;

        task.mark_running(now, Duration::from_secs(30));
        task.mark_failed("boom".to_string(), now);
        assert!(matches!(task.status, TaskStatus::Failed { attempt: 1, .. }));
        assert_eq!(task.run_at, now + chrono::Duration::seconds(1));

        task.mark_running(now, Duration::from_secs(30));
        task.mark_failed("boom again".to_string(), now);
        assert!(matches!(task.status, TaskStatus::DeadLettered { attempts: 2, .. }));
    }

    #[test]
    fn deferral_does_not_consume_an_attempt() {
        let mut task = test_task(EnqueueOptions::default().with_retry_policy(RetryPolicy::no_retry()));
        let now = task.created_at;

        task.mark_running(now, Duration::from_secs(30));
        task.mark_deferred(Duration::from_secs(60), now);

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt, 0);
        assert_eq!(task.run_at, now + chrono::Duration::seconds(60));
    }
}
