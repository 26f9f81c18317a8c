use crate::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError},
    config::PaymentGatewayConfig,
    errors::ServiceError,
    metrics,
};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{error, info, instrument};

type HmacSha256 = Hmac<Sha256>;

/// Order created on the gateway side; the customer pays against its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
}

/// External payment provider used for online orders.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers a payable order for `amount` minor units.
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: String,
    ) -> Result<GatewayOrder, ServiceError>;

    /// Checks the signature the gateway handed to the client after payment.
    fn verify_signature(&self, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool;
}

/// Hex HMAC-SHA256 of `"{gateway_order_id}|{payment_id}"`.
pub fn sign_payment(secret: &str, gateway_order_id: &str, payment_id: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(format!("{}|{}", gateway_order_id, payment_id).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_payment_signature(
    secret: &str,
    gateway_order_id: &str,
    payment_id: &str,
    signature: &str,
) -> bool {
    let expected = sign_payment(secret, gateway_order_id, payment_id);
    !expected.is_empty() && constant_time_eq(&expected, signature)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Deserialize)]
struct CreateOrderReply {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    receipt: Option<String>,
}

/// Razorpay-compatible REST client guarded by a circuit breaker.
#[derive(Clone)]
pub struct RazorpayGateway {
    client: reqwest::Client,
    config: PaymentGatewayConfig,
    breaker: CircuitBreaker,
}

impl RazorpayGateway {
    pub fn new(config: PaymentGatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        let breaker = CircuitBreaker::new(
            "payment_gateway",
            CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker_failure_threshold,
                timeout: Duration::from_secs(config.circuit_breaker_timeout_secs),
                success_threshold: 1,
            },
        );
        Ok(Self {
            client,
            config,
            breaker,
        })
    }

    async fn post_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<CreateOrderReply, String> {
        let url = format!("{}/orders", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&CreateOrderBody {
                amount,
                currency,
                receipt,
            })
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("gateway returned {}: {}", status, body));
        }
        response
            .json::<CreateOrderReply>()
            .await
            .map_err(|e| format!("malformed gateway reply: {}", e))
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    #[instrument(skip(self))]
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: String,
    ) -> Result<GatewayOrder, ServiceError> {
        let reply = self
            .breaker
            .call(|| self.post_order(amount, currency, &receipt))
            .await
            .map_err(|err| {
                metrics::GATEWAY_FAILURES
                    .with_label_values(&["create_order"])
                    .inc();
                match err {
                    CircuitBreakerError::CircuitOpen => ServiceError::CircuitBreakerOpen,
                    CircuitBreakerError::Inner(msg) => {
                        error!(error = %msg, "payment gateway create_order failed");
                        ServiceError::ExternalServiceError(msg)
                    }
                }
            })?;

        info!(gateway_order_id = %reply.id, amount, "gateway order created");
        Ok(GatewayOrder {
            id: reply.id,
            amount: reply.amount,
            currency: reply.currency,
            receipt: reply.receipt.unwrap_or(receipt),
        })
    }

    fn verify_signature(&self, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_payment_signature(&self.config.key_secret, gateway_order_id, payment_id, signature)
    }
}
