//! services/api/src/adapters/payment.rs
//!
//! A `PaymentProcessor` that talks to an HTTP payment gateway.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use ride_platform_core::domain::Money;
use ride_platform_core::ports::{PaymentError, PaymentProcessor, PaymentReceipt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Serialize)]
struct ChargeRequest<'a> {
    customer_id: Uuid,
    amount: i64,
    currency: &'a str,
    payment_method: Option<&'a str>,
    description: &'a str,
}

#[derive(Deserialize)]
struct ChargeResponse {
    transaction_id: String,
}

#[derive(Deserialize, Default)]
struct GatewayError {
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentGateway {
    /// `timeout` bounds each request at the socket level; callers add their own deadline on top.
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

/// Client errors mean the gateway refused the charge; anything else may succeed later.
fn classify(status: StatusCode, message: String) -> PaymentError {
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        PaymentError::Declined(message)
    } else {
        PaymentError::Transient(format!("gateway returned {}: {}", status, message))
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentGateway {
    async fn charge_subscription(
        &self,
        user_id: Uuid,
        amount: Money,
        currency: &str,
        payment_method: Option<&str>,
    ) -> Result<PaymentReceipt, PaymentError> {
        let body = ChargeRequest {
            customer_id: user_id,
            amount: amount.minor(),
            currency,
            payment_method,
            description: "ride subscription",
        };
        let res = self
            .client
            .post(format!("{}/v1/charges", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PaymentError::Transient(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let err: GatewayError = res.json().await.unwrap_or_default();
            let message = err.message.unwrap_or_else(|| "charge refused".to_string());
            warn!(user_id = %user_id, status = %status, "Payment gateway rejected charge");
            return Err(classify(status, message));
        }

        let charge: ChargeResponse = res
            .json()
            .await
            .map_err(|e| PaymentError::Transient(format!("unreadable gateway response: {}", e)))?;
        info!(user_id = %user_id, transaction_id = %charge.transaction_id, amount = %amount, "Charge captured");
        Ok(PaymentReceipt {
            transaction_id: charge.transaction_id,
            amount,
            currency: currency.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declines_and_outages_are_told_apart() {
        assert!(matches!(
            classify(StatusCode::PAYMENT_REQUIRED, "card declined".into()),
            PaymentError::Declined(m) if m == "card declined"
        ));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, "slow down".into()),
            PaymentError::Transient(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, "upstream".into()),
            PaymentError::Transient(_)
        ));
    }
}
