//! Prometheus counters for the fulfilment engine.
//!
//! All collectors live in a crate-private registry exposed in text format at `/metrics`.

use axum::{http::header, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref ORDERS_PLACED: IntCounterVec = IntCounterVec::new(
        Opts::new("orders_placed_total", "Orders placed, by payment method"),
        &["payment_method"]
    )
    .expect("metric can be created");
    pub static ref ORDER_CANCELLATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "order_cancellations_total",
            "Whole-order and per-item cancellations"
        ),
        &["scope"]
    )
    .expect("metric can be created");
    pub static ref ORDER_RETURNS: IntCounterVec = IntCounterVec::new(
        Opts::new("order_returns_total", "Return decisions, by scope and outcome"),
        &["scope", "outcome"]
    )
    .expect("metric can be created");
    pub static ref REFUNDS_ISSUED: IntCounter =
        IntCounter::new("refunds_issued_total", "Wallet refunds credited")
            .expect("metric can be created");
    pub static ref REFUNDED_AMOUNT: IntCounter = IntCounter::new(
        "refunded_amount_minor_total",
        "Sum of refunded amounts in minor currency units"
    )
    .expect("metric can be created");
    pub static ref WALLET_DEBITS: IntCounter =
        IntCounter::new("wallet_debits_total", "Wallet debits recorded")
            .expect("metric can be created");
    pub static ref COUPON_REDEMPTIONS: IntCounter =
        IntCounter::new("coupon_redemptions_total", "Coupons consumed by placed orders")
            .expect("metric can be created");
    pub static ref STOCK_CONFLICTS: IntCounter = IntCounter::new(
        "stock_conflicts_total",
        "Placements rejected for insufficient stock"
    )
    .expect("metric can be created");
    pub static ref GATEWAY_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("payment_gateway_failures_total", "Payment gateway failures"),
        &["operation"]
    )
    .expect("metric can be created");
}

/// Registers every collector with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ORDERS_PLACED.clone()),
        Box::new(ORDER_CANCELLATIONS.clone()),
        Box::new(ORDER_RETURNS.clone()),
        Box::new(REFUNDS_ISSUED.clone()),
        Box::new(REFUNDED_AMOUNT.clone()),
        Box::new(WALLET_DEBITS.clone()),
        Box::new(COUPON_REDEMPTIONS.clone()),
        Box::new(STOCK_CONFLICTS.clone()),
        Box::new(GATEWAY_FAILURES.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                error!(error = %e, "failed to register metric");
            }
        }
    }
}

pub fn record_refund(amount: i64) {
    REFUNDS_ISSUED.inc();
    if amount > 0 {
        REFUNDED_AMOUNT.inc_by(amount as u64);
    }
}

/// Renders the registry in Prometheus text exposition format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub async fn metrics_handler() -> impl IntoResponse {
    match render() {
        Ok(body) => (
            axum::http::StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                String::new(),
            )
        }
    }
}
