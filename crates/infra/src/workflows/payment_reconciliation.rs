//! Payment reconciliation: poll the provider for a linked checkout session
//! until the order settles.
//!
//! States per task firing: `pending` → `succeeded` | `failed_terminal` |
//! `rescheduled`. A rescheduled check is a fresh task with the same payload.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use marketdesk_core::{Clock, DomainError, OrderId, SystemClock, TaskId};
use marketdesk_orders::PaymentStatus;

use crate::payments::{GatewayError, PaymentGateway};
use crate::repositories::{OrderRepository, RepositoryError};
use crate::tasks::{EnqueueOptions, QueueError, Scheduler, Task, TaskHandler, TaskResult};

pub const PAYMENT_STATUS_QUEUE: &str = "payment-status";
pub const CHECK_PAYMENT_STATUS: &str = "checkPaymentStatus";
pub const DEFAULT_RECHECK_DELAY: Duration = Duration::from_secs(20 * 60);

/// Task payload for one payment check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCheckPayload {
    pub order_id: OrderId,
    pub checkout_sdk_order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mini_app_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkOrderResponse {
    pub message: String,
    pub order_id: OrderId,
    pub checkout_sdk_order_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationState {
    Pending,
    Succeeded,
    FailedTerminal,
    Rescheduled,
}

/// Structured result of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ReconciliationState>,
}

impl ReconciliationReport {
    fn ok(state: ReconciliationState, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            state: Some(state),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            state: None,
        }
    }

    fn settled(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Success => Self::ok(ReconciliationState::Succeeded, "Payment succeeded"),
            PaymentStatus::Failed => Self::ok(ReconciliationState::FailedTerminal, "Payment failed"),
            PaymentStatus::Pending => Self::ok(ReconciliationState::Pending, "Payment still pending"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("payment provider error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("task queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<RepositoryError> for WorkflowError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => WorkflowError::NotFound(what),
            RepositoryError::Domain(e) => WorkflowError::Domain(e),
            RepositoryError::Storage(msg) => WorkflowError::Storage(msg),
        }
    }
}

pub struct PaymentReconciliation {
    orders: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
    recheck_delay: Duration,
}

impl std::fmt::Debug for PaymentReconciliation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentReconciliation")
            .field("scheduler", &self.scheduler)
            .field("recheck_delay", &self.recheck_delay)
            .finish_non_exhaustive()
    }
}

impl PaymentReconciliation {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            orders,
            gateway,
            scheduler,
            clock: Arc::new(SystemClock),
            recheck_delay: DEFAULT_RECHECK_DELAY,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_recheck_delay(mut self, delay: Duration) -> Self {
        self.recheck_delay = delay;
        self
    }

    pub fn recheck_delay(&self) -> Duration {
        self.recheck_delay
    }

    /// Link a checkout session to a pending order and schedule its first check.
    ///
    /// The link is persisted before the check is enqueued. When the enqueue
    /// fails the order stays linked and `pending` with nothing scheduled;
    /// linking again is allowed while the order is pending and schedules the
    /// check, so callers retry on a queue error.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn link_order(
        &self,
        order_id: OrderId,
        checkout_sdk_order_id: &str,
        mini_app_id: Option<&str>,
    ) -> Result<LinkOrderResponse, WorkflowError> {
        let order = self
            .orders
            .link_checkout(order_id, checkout_sdk_order_id, mini_app_id, self.clock.now())
            .await?;

        let payload = PaymentCheckPayload {
            order_id,
            checkout_sdk_order_id: order.checkout_session_id.clone().unwrap_or_default(),
            mini_app_id: order.mini_app_id.clone(),
        };
        let task_id = self.schedule_check(&payload).await?;
        info!(order_id = %order_id, task_id = %task_id, "checkout session linked");

        Ok(LinkOrderResponse {
            message: "Order linked to checkout session".to_string(),
            order_id,
            checkout_sdk_order_id: payload.checkout_sdk_order_id,
        })
    }

    /// One reconciliation attempt with every error folded into the report.
    pub async fn reconcile(&self, payload: &PaymentCheckPayload) -> ReconciliationReport {
        match self.run(payload).await {
            Ok(report) => report,
            Err(err) => {
                error!(order_id = %payload.order_id, error = %err, "payment reconciliation failed");
                ReconciliationReport::failure(err.to_string())
            }
        }
    }

    /// One reconciliation attempt; a non-terminal answer schedules a new check.
    #[instrument(skip(self, payload), fields(order_id = %payload.order_id), err)]
    pub async fn run(&self, payload: &PaymentCheckPayload) -> Result<ReconciliationReport, WorkflowError> {
        match self.evaluate(payload).await? {
            Some(report) => Ok(report),
            None => {
                let task_id = self.schedule_check(payload).await?;
                info!(order_id = %payload.order_id, task_id = %task_id, "payment still pending; check rescheduled");
                Ok(ReconciliationReport::ok(
                    ReconciliationState::Rescheduled,
                    "Payment check scheduled",
                ))
            }
        }
    }

    /// On-demand check for an order's linked session. Never schedules.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn check_status(&self, order_id: OrderId) -> Result<ReconciliationReport, WorkflowError> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("order {order_id}")))?;

        let Some(session) = order.checkout_session_id.clone() else {
            if order.payment_status.is_terminal() {
                return Ok(ReconciliationReport::settled(order.payment_status));
            }
            return Err(DomainError::validation(format!(
                "order {order_id} has no linked checkout session"
            ))
            .into());
        };

        let payload = PaymentCheckPayload {
            order_id,
            checkout_sdk_order_id: session,
            mini_app_id: order.mini_app_id,
        };
        match self.evaluate(&payload).await {
            Ok(Some(report)) => Ok(report),
            Ok(None) => Ok(ReconciliationReport::settled(PaymentStatus::Pending)),
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "on-demand payment check failed");
                Ok(ReconciliationReport::failure(err.to_string()))
            }
        }
    }

    /// Query the provider and apply a terminal answer.
    ///
    /// `None` means the payment is still open.
    async fn evaluate(&self, payload: &PaymentCheckPayload) -> Result<Option<ReconciliationReport>, WorkflowError> {
        let order = self
            .orders
            .get(payload.order_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("order {}", payload.order_id)))?;

        if order.payment_status.is_terminal() {
            info!(order_id = %order.id, status = %order.payment_status, "order already settled; provider not queried");
            return Ok(Some(ReconciliationReport::settled(order.payment_status)));
        }

        let check = self
            .gateway
            .check_payment_status(&payload.checkout_sdk_order_id, payload.mini_app_id.as_deref())
            .await?;

        let Some(outcome) = check.outcome() else {
            return Ok(None);
        };

        let settled = self.orders.settle(payload.order_id, outcome, self.clock.now()).await?;
        info!(order_id = %payload.order_id, outcome = ?settled, "payment settled");
        Ok(Some(ReconciliationReport::settled(settled.status())))
    }

    async fn schedule_check(&self, payload: &PaymentCheckPayload) -> Result<TaskId, QueueError> {
        self.scheduler
            .enqueue(
                PAYMENT_STATUS_QUEUE,
                CHECK_PAYMENT_STATUS,
                payload,
                EnqueueOptions::delayed(self.recheck_delay),
            )
            .await
    }
}

/// Task handler for `checkPaymentStatus`.
///
/// Provider outages defer the same task by the recheck delay instead of
/// burning a retry; anything else goes through the queue's retry policy.
pub struct PaymentCheckHandler {
    workflow: Arc<PaymentReconciliation>,
}

impl PaymentCheckHandler {
    pub fn new(workflow: Arc<PaymentReconciliation>) -> Self {
        Self { workflow }
    }
}

#[async_trait]
impl TaskHandler for PaymentCheckHandler {
    async fn handle(&self, task: &Task) -> TaskResult {
        let payload: PaymentCheckPayload = match serde_json::from_value(task.payload.clone()) {
            Ok(p) => p,
            Err(e) => return TaskResult::Failure(format!("invalid payment check payload: {e}")),
        };

        match self.workflow.run(&payload).await {
            Ok(_) => TaskResult::Success,
            Err(WorkflowError::Gateway(err)) => {
                warn!(order_id = %payload.order_id, error = %err, "payment provider unavailable; deferring check");
                TaskResult::RetryAfter(self.workflow.recheck_delay())
            }
            Err(err) => TaskResult::Failure(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketdesk_core::FixedClock;
    use marketdesk_orders::Order;

    use crate::payments::{InMemoryPaymentGateway, PaymentCheck};
    use crate::repositories::InMemoryOrderRepository;
    use crate::tasks::{InMemoryTaskQueue, TaskQueue, TaskSource, TaskStatus};

    struct Fixture {
        clock: Arc<FixedClock>,
        orders: Arc<InMemoryOrderRepository>,
        gateway: Arc<InMemoryPaymentGateway>,
        queue: Arc<InMemoryTaskQueue>,
        workflow: Arc<PaymentReconciliation>,
    }

    fn order_id(n: i64) -> OrderId {
        OrderId::new(n).unwrap()
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let orders = Arc::new(InMemoryOrderRepository::new());
        let gateway = Arc::new(InMemoryPaymentGateway::new());
        let queue = Arc::new(InMemoryTaskQueue::with_clock(clock.clone()));
        let workflow = Arc::new(
            PaymentReconciliation::new(orders.clone(), gateway.clone(), Scheduler::new(queue.clone()))
                .with_clock(clock.clone()),
        );
        orders.insert(&Order::pending(order_id(42), clock.now())).await.unwrap();
        Fixture {
            clock,
            orders,
            gateway,
            queue,
            workflow,
        }
    }

    fn payload() -> PaymentCheckPayload {
        PaymentCheckPayload {
            order_id: order_id(42),
            checkout_sdk_order_id: "cs_123".to_string(),
            mini_app_id: None,
        }
    }

    #[tokio::test]
    async fn link_order_schedules_first_check() {
        let f = fixture().await;
        let response = f.workflow.link_order(order_id(42), "cs_123", Some("app-9")).await.unwrap();

        assert_eq!(response.order_id, order_id(42));
        assert_eq!(response.checkout_sdk_order_id, "cs_123");

        let tasks = f.queue.list(PAYMENT_STATUS_QUEUE).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, CHECK_PAYMENT_STATUS);
        assert_eq!(
            tasks[0].payload,
            serde_json::json!({"orderId": 42, "checkoutSdkOrderId": "cs_123", "miniAppId": "app-9"})
        );
        assert_eq!(tasks[0].run_at - tasks[0].created_at, chrono::Duration::minutes(20));
    }

    #[tokio::test]
    async fn link_order_rejects_bad_input_and_paid_orders() {
        let f = fixture().await;
        assert!(matches!(
            f.workflow.link_order(order_id(42), "  ", None).await,
            Err(WorkflowError::Domain(DomainError::Validation(_)))
        ));
        assert!(matches!(
            f.workflow.link_order(order_id(7), "cs_1", None).await,
            Err(WorkflowError::NotFound(_))
        ));

        f.orders.settle(order_id(42), PaymentStatus::Success, f.clock.now()).await.unwrap();
        assert!(matches!(
            f.workflow.link_order(order_id(42), "cs_2", None).await,
            Err(WorkflowError::Domain(DomainError::Conflict(_)))
        ));
        assert!(f.queue.list(PAYMENT_STATUS_QUEUE).unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_answer_reschedules_with_twenty_minute_delay() {
        let f = fixture().await;
        f.orders.link_checkout(order_id(42), "cs_123", None, f.clock.now()).await.unwrap();
        f.gateway.respond("cs_123", Ok(PaymentCheck::pending()));

        let report = f.workflow.reconcile(&payload()).await;

        assert_eq!(
            report,
            ReconciliationReport {
                success: true,
                message: "Payment check scheduled".to_string(),
                state: Some(ReconciliationState::Rescheduled),
            }
        );
        let tasks = f.queue.list(PAYMENT_STATUS_QUEUE).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!((tasks[0].run_at - tasks[0].created_at).num_milliseconds(), 1_200_000);
        assert_eq!(tasks[0].payload, serde_json::to_value(payload()).unwrap());
        assert_eq!(
            f.orders.get(order_id(42)).await.unwrap().unwrap().payment_status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn terminal_answers_settle_the_order() {
        let f = fixture().await;
        f.gateway.respond("cs_123", Ok(PaymentCheck::succeeded()));

        let report = f.workflow.reconcile(&payload()).await;
        assert!(report.success);
        assert_eq!(report.state, Some(ReconciliationState::Succeeded));
        assert!(f.orders.get(order_id(42)).await.unwrap().unwrap().is_paid());
        assert!(f.queue.list(PAYMENT_STATUS_QUEUE).unwrap().is_empty());

        let f = fixture().await;
        f.gateway.respond("cs_123", Ok(PaymentCheck::failed()));
        let report = f.workflow.reconcile(&payload()).await;
        assert_eq!(report.state, Some(ReconciliationState::FailedTerminal));
    }

    #[tokio::test]
    async fn repeated_delivery_after_settlement_is_a_no_op() {
        let f = fixture().await;
        f.gateway.respond("cs_123", Ok(PaymentCheck::succeeded()));

        f.workflow.reconcile(&payload()).await;
        let updated_at = f.orders.get(order_id(42)).await.unwrap().unwrap().updated_at;
        f.clock.advance(chrono::Duration::minutes(5));
        let again = f.workflow.reconcile(&payload()).await;

        assert_eq!(again.state, Some(ReconciliationState::Succeeded));
        assert_eq!(f.gateway.calls().len(), 1);
        assert_eq!(f.orders.get(order_id(42)).await.unwrap().unwrap().updated_at, updated_at);
    }

    #[tokio::test]
    async fn errors_become_failure_reports() {
        let f = fixture().await;
        f.gateway.respond("cs_123", Err(GatewayError::Network("connection reset".to_string())));

        let report = f.workflow.reconcile(&payload()).await;
        assert!(!report.success);
        assert!(report.message.contains("connection reset"));
        assert!(f.queue.list(PAYMENT_STATUS_QUEUE).unwrap().is_empty());

        let missing = PaymentCheckPayload {
            order_id: order_id(99),
            ..payload()
        };
        assert!(!f.workflow.reconcile(&missing).await.success);
    }

    #[tokio::test]
    async fn check_status_never_schedules() {
        let f = fixture().await;
        assert!(matches!(
            f.workflow.check_status(order_id(42)).await,
            Err(WorkflowError::Domain(DomainError::Validation(_)))
        ));
        assert!(matches!(
            f.workflow.check_status(order_id(5)).await,
            Err(WorkflowError::NotFound(_))
        ));

        f.orders.link_checkout(order_id(42), "cs_123", None, f.clock.now()).await.unwrap();
        let report = f.workflow.check_status(order_id(42)).await.unwrap();
        assert_eq!(report.state, Some(ReconciliationState::Pending));
        assert!(f.queue.list(PAYMENT_STATUS_QUEUE).unwrap().is_empty());
    }

    #[tokio::test]
    async fn handler_defers_on_provider_outage() {
        let f = fixture().await;
        f.gateway.respond("cs_123", Err(GatewayError::Api(503, "down".to_string())));
        let handler = PaymentCheckHandler::new(f.workflow.clone());

        f.workflow
            .scheduler
            .enqueue(PAYMENT_STATUS_QUEUE, CHECK_PAYMENT_STATUS, &payload(), EnqueueOptions::default())
            .await
            .unwrap();
        let task = f.queue.claim_next(PAYMENT_STATUS_QUEUE).await.unwrap().unwrap();

        assert_eq!(handler.handle(&task).await, TaskResult::RetryAfter(DEFAULT_RECHECK_DELAY));
    }

    #[tokio::test]
    async fn handler_rejects_malformed_payload() {
        let f = fixture().await;
        let handler = PaymentCheckHandler::new(f.workflow.clone());
        f.queue
            .enqueue(
                PAYMENT_STATUS_QUEUE,
                CHECK_PAYMENT_STATUS,
                serde_json::json!({"orderId": -1, "checkoutSdkOrderId": "cs_123"}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();
        let task = f.queue.claim_next(PAYMENT_STATUS_QUEUE).await.unwrap().unwrap();

        assert!(matches!(handler.handle(&task).await, TaskResult::Failure(_)));
        assert_eq!(task.status, TaskStatus::Running);
    }

    struct SwitchableQueue {
        inner: Arc<InMemoryTaskQueue>,
        down: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl TaskQueue for SwitchableQueue {
        fn name(&self) -> &'static str {
            "switchable"
        }

        async fn enqueue(
            &self,
            queue: &str,
            kind: &str,
            payload: serde_json::Value,
            options: EnqueueOptions,
        ) -> Result<TaskId, QueueError> {
            if self.down.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(QueueError::Unavailable("broker offline".to_string()));
            }
            self.inner.enqueue(queue, kind, payload, options).await
        }

        fn supports_cancel(&self) -> bool {
            false
        }

        async fn cancel(&self, _queue: &str, _task_id: TaskId) -> Result<bool, QueueError> {
            Err(QueueError::CancelUnsupported(self.name()))
        }
    }

    #[tokio::test]
    async fn link_after_queue_outage_can_be_retried() {
        let f = fixture().await;
        let transport = Arc::new(SwitchableQueue {
            inner: f.queue.clone(),
            down: std::sync::atomic::AtomicBool::new(true),
        });
        let workflow = PaymentReconciliation::new(f.orders.clone(), f.gateway.clone(), Scheduler::new(transport.clone()))
            .with_clock(f.clock.clone());

        assert!(matches!(
            workflow.link_order(order_id(42), "cs_123", None).await,
            Err(WorkflowError::Queue(QueueError::Unavailable(_)))
        ));
        let order = f.orders.get(order_id(42)).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.checkout_session_id.as_deref(), Some("cs_123"));
        assert!(f.queue.list(PAYMENT_STATUS_QUEUE).unwrap().is_empty());

        transport.down.store(false, std::sync::atomic::Ordering::SeqCst);
        workflow.link_order(order_id(42), "cs_123", None).await.unwrap();
        assert_eq!(f.queue.list(PAYMENT_STATUS_QUEUE).unwrap().len(), 1);
    }
}
