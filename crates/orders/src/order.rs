use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use marketdesk_core::{DomainError, OrderId};

/// Payment status lifecycle.
///
/// `Pending` is the only non-terminal state. Once an order reaches `Success`
/// or `Failed` it never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(DomainError::validation(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status as reported by the provider for a checkout session.
///
/// Providers are free to report states we do not model; those are kept
/// verbatim in `Unknown` and treated like `Pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderStatus {
    Success,
    Failed,
    Pending,
    Unknown(String),
}

impl ProviderStatus {
    /// The terminal payment status this report settles to, if any.
    pub fn terminal(&self) -> Option<PaymentStatus> {
        match self {
            ProviderStatus::Success => Some(PaymentStatus::Success),
            ProviderStatus::Failed => Some(PaymentStatus::Failed),
            ProviderStatus::Pending | ProviderStatus::Unknown(_) => None,
        }
    }
}

impl From<String> for ProviderStatus {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "success" => ProviderStatus::Success,
            "failed" => ProviderStatus::Failed,
            "pending" => ProviderStatus::Pending,
            _ => ProviderStatus::Unknown(value),
        }
    }
}

impl From<&str> for ProviderStatus {
    fn from(value: &str) -> Self {
        ProviderStatus::from(value.to_string())
    }
}

impl From<ProviderStatus> for String {
    fn from(value: ProviderStatus) -> Self {
        match value {
            ProviderStatus::Success => "success".to_string(),
            ProviderStatus::Failed => "failed".to_string(),
            ProviderStatus::Pending => "pending".to_string(),
            ProviderStatus::Unknown(s) => s,
        }
    }
}

/// Result of applying a terminal payment outcome to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The order moved out of `Pending`.
    Applied(PaymentStatus),
    /// The order was already terminal; nothing changed.
    AlreadySettled(PaymentStatus),
}

impl SettleOutcome {
    pub fn status(&self) -> PaymentStatus {
        match self {
            SettleOutcome::Applied(s) | SettleOutcome::AlreadySettled(s) => *s,
        }
    }
}

/// Order, restricted to the fields the payment flow reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub payment_status: PaymentStatus,
    /// External checkout-session identifier (`checkoutSdkOrderId`).
    pub checkout_session_id: Option<String>,
    pub mini_app_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A fresh order awaiting payment.
    pub fn pending(id: OrderId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            payment_status: PaymentStatus::Pending,
            checkout_session_id: None,
            mini_app_id: None,
            updated_at: now,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Success
    }

    /// Attach a provider checkout session to this order.
    ///
    /// Re-linking a pending order replaces the previous session.
    pub fn link_checkout(
        &mut self,
        checkout_session_id: &str,
        mini_app_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let session = checkout_session_id.trim();
        if session.is_empty() {
            return Err(DomainError::validation("checkoutSdkOrderId is required"));
        }

        match self.payment_status {
            PaymentStatus::Success => {
                return Err(DomainError::conflict(format!(
                    "order {} already paid",
                    self.id
                )));
            }
            PaymentStatus::Failed => {
                return Err(DomainError::conflict(format!(
                    "order {} payment already failed",
                    self.id
                )));
            }
            PaymentStatus::Pending => {}
        }

        self.checkout_session_id = Some(session.to_string());
        self.mini_app_id = mini_app_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        self.updated_at = now;
        Ok(())
    }

    /// Guarded transition out of `Pending`.
    ///
    /// Applying the same (or a different, stale) terminal outcome to an
    /// already-settled order is a no-op that reports the current status.
    pub fn settle(
        &mut self,
        outcome: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<SettleOutcome, DomainError> {
        if !outcome.is_terminal() {
            return Err(DomainError::invariant(
                "an order can only be settled to success or failed",
            ));
        }

        if self.payment_status.is_terminal() {
            return Ok(SettleOutcome::AlreadySettled(self.payment_status));
        }

        self.payment_status = outcome;
        self.updated_at = now;
        Ok(SettleOutcome::Applied(outcome))
    }
}
