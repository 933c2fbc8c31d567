//! Hosted-checkout payment gateway client.
//!
//! The gateway is an external collaborator reached over HTTPS; everything the
//! rest of the crate needs from it sits behind the [`PaymentGateway`] trait so
//! tests can substitute a scripted implementation.

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::errors::ServiceError;

/// Charge parameters for a new hosted-checkout session.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Public order number, doubles as the gateway-side order id.
    pub order_number: String,
    pub gross_amount: Decimal,
    pub customer_id: Uuid,
    /// Hours until the unpaid session expires gateway-side.
    pub expiry_hours: u32,
}

/// A created checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayTransaction {
    pub token: String,
    pub redirect_url: String,
    #[serde(skip)]
    pub gateway_order_id: String,
}

/// Transaction state as reported by the gateway, either in a webhook payload
/// or from an explicit status poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub order_id: String,
    pub transaction_status: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub status_message: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a checkout session and returns its token and redirect URL.
    async fn create_transaction(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayTransaction, ServiceError>;

    /// Polls the current state of a transaction.
    async fn check_status(&self, gateway_order_id: &str) -> Result<GatewayStatus, ServiceError>;

    /// Issues a (possibly partial) refund against a settled transaction.
    async fn refund(
        &self,
        gateway_order_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<(), ServiceError>;
}

/// Production gateway client speaking the Snap HTTP API.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    server_key: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("gateway client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            server_key: config.server_key.clone(),
        })
    }

    fn gateway_error(context: &str, err: reqwest::Error) -> ServiceError {
        if err.is_timeout() {
            ServiceError::GatewayError(format!("{}: gateway timed out", context))
        } else {
            ServiceError::GatewayError(format!("{}: {}", context, err))
        }
    }

    async fn fail_on_status(
        context: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ServiceError::GatewayError(format!(
            "{}: gateway returned {} ({})",
            context, status, body
        )))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self), fields(order_number = %request.order_number))]
    async fn create_transaction(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayTransaction, ServiceError> {
        let url = format!("{}/snap/v1/transactions", self.base_url);
        let payload = json!({
            "transaction_details": {
                "order_id": request.order_number,
                "gross_amount": request.gross_amount,
            },
            "customer_details": {
                "customer_id": request.customer_id,
            },
            "expiry": {
                "unit": "hours",
                "duration": request.expiry_hours,
            },
        });

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.server_key, Some(""))
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::gateway_error("create transaction", e))?;
        let response = Self::fail_on_status("create transaction", response).await?;

        let mut transaction: GatewayTransaction = response
            .json()
            .await
            .map_err(|e| Self::gateway_error("create transaction", e))?;
        transaction.gateway_order_id = request.order_number.clone();
        debug!(order_number = %request.order_number, "checkout session created");
        Ok(transaction)
    }

    #[instrument(skip(self))]
    async fn check_status(&self, gateway_order_id: &str) -> Result<GatewayStatus, ServiceError> {
        let url = format!("{}/v2/{}/status", self.base_url, gateway_order_id);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.server_key, Some(""))
            .send()
            .await
            .map_err(|e| Self::gateway_error("check status", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(format!(
                "Gateway has no transaction for '{}'",
                gateway_order_id
            )));
        }
        let response = Self::fail_on_status("check status", response).await?;
        response
            .json()
            .await
            .map_err(|e| Self::gateway_error("check status", e))
    }

    #[instrument(skip(self))]
    async fn refund(
        &self,
        gateway_order_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<(), ServiceError> {
        let url = format!("{}/v2/{}/refund", self.base_url, gateway_order_id);
        let payload = json!({
            "refund_amount": amount,
            "reason": reason,
        });
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.server_key, Some(""))
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::gateway_error("refund", e))?;
        Self::fail_on_status("refund", response).await?;
        Ok(())
    }
}
