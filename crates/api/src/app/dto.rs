use chrono::{DateTime, Utc};
use serde::Deserialize;

use marketdesk_core::{DomainError, OrderId};

// -------------------------
// Request DTOs
// -------------------------

/// Order ids arrive either as JSON numbers or as numeric strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawOrderId {
    Number(i64),
    Text(String),
}

impl RawOrderId {
    pub fn parse(&self) -> Result<OrderId, DomainError> {
        match self {
            RawOrderId::Number(n) => OrderId::new(*n),
            RawOrderId::Text(s) => s.parse(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkOrderRequest {
    pub order_id: Option<RawOrderId>,
    pub checkout_sdk_order_id: Option<String>,
    pub mini_app_id: Option<String>,
}

impl LinkOrderRequest {
    /// Required-field checks with the messages callers see.
    pub fn validate(&self) -> Result<(OrderId, &str, Option<&str>), DomainError> {
        let order_id = self
            .order_id
            .as_ref()
            .ok_or_else(|| DomainError::validation("orderId is required"))?
            .parse()?;
        let session = self
            .checkout_sdk_order_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DomainError::validation("checkoutSdkOrderId is required"))?;
        Ok((order_id, session, self.mini_app_id.as_deref()))
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckStatusQuery {
    #[serde(rename = "orderId")]
    pub order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub order_id: RawOrderId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub title: String,
    pub platforms: Vec<String>,
    pub scheduled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: serde_json::Value) -> LinkOrderRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn order_id_accepts_numbers_and_strings() {
        let req = request(serde_json::json!({
            "orderId": "42",
            "checkoutSdkOrderId": " cs_123 ",
        }));
        let (id, session, app) = req
        .validate()
        .unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(session, "cs_123");
        assert_eq!(app, None);

        let req = request(serde_json::json!({
            "orderId": 7,
            "checkoutSdkOrderId": "cs",
            "miniAppId": "app-1",
        }));
        let (id, _, app) = req
        .validate()
        .unwrap();
        assert_eq!(id.get(), 7);
        assert_eq!(app, Some("app-1"));
    }

    #[test]
    fn missing_or_bad_fields_are_rejected() {
        assert!(matches!(
            request(serde_json::json!({"checkoutSdkOrderId": "cs"})).validate(),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            request(serde_json::json!({"orderId": 42})).validate(),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            request(serde_json::json!({"orderId": -3, "checkoutSdkOrderId": "cs"})).validate(),
            Err(DomainError::InvalidId(_))
        ));
    }
}
