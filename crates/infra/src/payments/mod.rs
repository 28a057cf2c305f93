//! Payment provider port.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use marketdesk_orders::{PaymentStatus, ProviderStatus};

pub use http::HttpPaymentGateway;
pub use memory::InMemoryPaymentGateway;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),
    #[error("provider error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
}

fn unknown_status() -> ProviderStatus {
    ProviderStatus::Unknown(String::new())
}

/// Provider answer for one checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCheck {
    pub success: bool,
    #[serde(default = "unknown_status")]
    pub status: ProviderStatus,
}

impl PaymentCheck {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            status: ProviderStatus::Success,
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            status: ProviderStatus::Failed,
        }
    }

    pub fn pending() -> Self {
        Self {
            success: false,
            status: ProviderStatus::Pending,
        }
    }

    /// Terminal payment status implied by this answer, if any.
    ///
    /// `success: true` wins; otherwise only an explicit terminal status counts.
    pub fn outcome(&self) -> Option<PaymentStatus> {
        if self.success {
            return Some(PaymentStatus::Success);
        }
        self.status.terminal()
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    async fn check_payment_status(
        &self,
        checkout_session_id: &str,
        mini_app_id: Option<&str>,
    ) -> Result<PaymentCheck, GatewayError>;
}
