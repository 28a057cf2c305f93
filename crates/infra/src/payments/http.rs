use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{GatewayError, PaymentCheck, PaymentGateway};

/// HTTP client for the payment provider's checkout status endpoint.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpPaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentGateway")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl HttpPaymentGateway {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// `{api_url}/checkout/{session}/status` with the session id escaped as a
    /// single path segment.
    fn status_url(&self, checkout_session_id: &str) -> Result<reqwest::Url, GatewayError> {
        let mut url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| GatewayError::Network(format!("invalid provider url {}: {e}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Network(format!("provider url {} cannot take a path", self.api_url)))?
            .pop_if_empty()
            .extend(["checkout", checkout_session_id, "status"]);
        Ok(url)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self), err)]
    async fn check_payment_status(
        &self,
        checkout_session_id: &str,
        mini_app_id: Option<&str>,
    ) -> Result<PaymentCheck, GatewayError> {
        let url = self.status_url(checkout_session_id)?;
        let mut req = self.http.get(url);
        if let Some(app) = mini_app_id {
            req = req.query(&[("miniAppId", app)]);
        }
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| GatewayError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GatewayError::Api(
                resp.status().as_u16(),
                resp.text().await.unwrap_or_default(),
            ));
        }

        let check: PaymentCheck = resp.json().await.map_err(|e| GatewayError::Parse(e.to_string()))?;
        debug!(checkout_session_id, success = check.success, status = ?check.status, "payment status fetched");
        Ok(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketdesk_orders::ProviderStatus;
    use mockito::Matcher;

    #[tokio::test]
    async fn parses_provider_answer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/checkout/cs_123/status")
            .match_query(Matcher::UrlEncoded("miniAppId".into(), "app-9".into()))
            .match_header("authorization", "Bearer key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": false, "status": "pending"}"#)
            .create_async()
            .await;

        let gateway = HttpPaymentGateway::new(server.url()).with_api_key("key");
        let check = gateway.check_payment_status("cs_123", Some("app-9")).await.unwrap();

        assert!(!check.success);
        assert_eq!(check.status, ProviderStatus::Pending);
        mock.assert_async().await;
    }

    #[test]
    fn session_id_stays_one_path_segment() {
        let gateway = HttpPaymentGateway::new("https://pay.example.com/api/");
        assert_eq!(
            gateway.status_url("cs_123").unwrap().as_str(),
            "https://pay.example.com/api/checkout/cs_123/status"
        );
        assert_eq!(
            gateway.status_url("cs_1/status?miniAppId=evil#").unwrap().as_str(),
            "https://pay.example.com/api/checkout/cs_1%2Fstatus%3FminiAppId=evil%23/status"
        );
    }

    #[tokio::test]
    async fn hostile_session_id_cannot_redirect_the_request() {
        let mut server = mockito::Server::new_async().await;
        let hijacked = server
            .mock("GET", "/checkout/cs_1/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "status": "success"}"#)
            .expect(0)
            .create_async()
            .await;

        let gateway = HttpPaymentGateway::new(server.url()).with_api_key("key");
        let result = gateway.check_payment_status("cs_1/status?miniAppId=evil#", None).await;

        assert!(matches!(result, Err(GatewayError::Api(..))));
        hijacked.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_an_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/checkout/cs_404/status")
            .with_status(404)
            .with_body("no such session")
            .create_async()
            .await;

        let gateway = HttpPaymentGateway::new(server.url());
        let err = gateway.check_payment_status("cs_404", None).await.unwrap_err();
        assert_eq!(err, GatewayError::Api(404, "no such session".to_string()));
    }

    #[tokio::test]
    async fn malformed_body_is_a_parse_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/checkout/cs_1/status")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let gateway = HttpPaymentGateway::new(server.url());
        assert!(matches!(
            gateway.check_payment_status("cs_1", None).await,
            Err(GatewayError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_network_error() {
        let gateway = HttpPaymentGateway::new("http://127.0.0.1:1");
        assert!(matches!(
            gateway.check_payment_status("cs_1", None).await,
            Err(GatewayError::Network(_))
        ));
    }
}
