use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{GatewayError, PaymentCheck, PaymentGateway};

/// Scripted gateway for tests/dev.
///
/// Answers are queued per checkout session; once a session's queue holds a
/// single answer, that answer repeats. Unknown sessions report pending.
#[derive(Debug, Default)]
pub struct InMemoryPaymentGateway {
    answers: Mutex<HashMap<String, VecDeque<Result<PaymentCheck, GatewayError>>>>,
    calls: Mutex<Vec<String>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, checkout_session_id: impl Into<String>, answer: Result<PaymentCheck, GatewayError>) {
        if let Ok(mut answers) = self.answers.lock() {
            answers.entry(checkout_session_id.into()).or_default().push_back(answer);
        }
    }

    /// Sessions queried so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn check_payment_status(
        &self,
        checkout_session_id: &str,
        _mini_app_id: Option<&str>,
    ) -> Result<PaymentCheck, GatewayError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(checkout_session_id.to_string());
        }

        let mut answers = self
            .answers
            .lock()
            .map_err(|_| GatewayError::Network("gateway lock poisoned".to_string()))?;
        match answers.get_mut(checkout_session_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| Ok(PaymentCheck::pending())),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| Ok(PaymentCheck::pending())),
            None => Ok(PaymentCheck::pending()),
        }
    }
}
