//! Application workflows built on the repositories, the payment gateway, and
//! the task scheduler.

pub mod content_publisher;
pub mod payment_reconciliation;

pub use content_publisher::{ScheduledPostPublisher, SweepReport};
pub use payment_reconciliation::{
    LinkOrderResponse, PaymentCheckHandler, PaymentCheckPayload, PaymentReconciliation, ReconciliationReport,
    ReconciliationState, WorkflowError, CHECK_PAYMENT_STATUS, DEFAULT_RECHECK_DELAY, PAYMENT_STATUS_QUEUE,
};
