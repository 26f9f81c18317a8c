//! Cart to order translation: offer pricing, coupon attribution, delivery charge and the
//! placement transaction.

use crate::{
    config::OrderPolicyConfig,
    db::DbPool,
    entities::{
        order::{self, OrderStatus, PaymentMethod},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics, money,
    services::{
        cart::{CartLine, CartService},
        catalog::{CatalogLookup, OfferBreakdown},
        coupons::{AppliedCoupon, CouponEngine},
        orders::{OrderDetails, OrderService},
        payment_gateway::GatewayOrder,
        stock::StockReconciler,
        wallet::{reference, LedgerEntry, WalletLedger},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// One cart line priced for checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedLine {
    pub book_id: Uuid,
    pub category_id: Uuid,
    pub title: String,
    pub unit_price: i64,
    pub quantity: i32,
    pub line_subtotal: i64,
    pub product_discount: i64,
    pub category_discount: i64,
    /// `line_subtotal - product_discount - category_discount`
    pub total: i64,
    pub coupon_share: i64,
    pub return_window_days: i32,
}

/// Applies the better of the product and category offers. Ties go to the product offer.
pub fn price_line(line: &CartLine, offers: OfferBreakdown, default_return_window_days: i32) -> PricedLine {
    let line_subtotal = line.line_subtotal();
    let product = money::percent_of(line_subtotal, Decimal::from(offers.product_offer_percent));
    let category = money::percent_of(line_subtotal, Decimal::from(offers.category_offer_percent));
    let (product_discount, category_discount) = if product >= category {
        (product, 0)
    } else {
        (0, category)
    };

    PricedLine {
        book_id: line.book.id,
        category_id: line.book.category_id,
        title: line.book.title.clone(),
        unit_price: line.book.price,
        quantity: line.item.quantity,
        line_subtotal,
        product_discount,
        category_discount,
        total: line_subtotal - product_discount - category_discount,
        coupon_share: 0,
        return_window_days: line
            .book
            .return_window_days
            .unwrap_or(default_return_window_days),
    }
}

/// Checkout preview; placement persists exactly these numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub lines: Vec<PricedLine>,
    pub subtotal: i64,
    pub product_discount: i64,
    pub category_discount: i64,
    pub coupon: Option<AppliedCoupon>,
    pub coupon_discount: i64,
    pub final_total: i64,
    pub delivery_charge: i64,
    pub total_with_delivery: i64,
    /// Why the selected coupon would be refused, if it would be
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_error: Option<String>,
}

/// Aggregates priced lines and spreads the coupon discount over them in proportion to each
/// line's post-offer total.
pub fn build_quote(
    mut lines: Vec<PricedLine>,
    coupon: Option<AppliedCoupon>,
    policy: &OrderPolicyConfig,
) -> Quote {
    let subtotal: i64 = lines.iter().map(|l| l.line_subtotal).sum();
    let product_discount: i64 = lines.iter().map(|l| l.product_discount).sum();
    let category_discount: i64 = lines.iter().map(|l| l.category_discount).sum();
    let after_offers = subtotal - product_discount - category_discount;

    let coupon_discount = coupon
        .as_ref()
        .map_or(0, |c| c.discount.clamp(0, after_offers.max(0)));
    let weights: Vec<i64> = lines.iter().map(|l| l.total).collect();
    let shares = money::allocate_proportionally(coupon_discount, &weights);
    for (line, share) in lines.iter_mut().zip(shares) {
        line.coupon_share = share;
    }

    let final_total = after_offers - coupon_discount;
    let delivery_charge = policy.delivery_charge_for(final_total);
    Quote {
        lines,
        subtotal,
        product_discount,
        category_discount,
        coupon,
        coupon_discount,
        final_total,
        delivery_charge,
        total_with_delivery: final_total + delivery_charge,
        coupon_error: None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    pub address_id: Uuid,
    /// Address snapshot printed on the invoice
    #[validate(length(max = 1000))]
    pub shipping_address: Option<String>,
    pub payment_method: PaymentMethod,
}

/// Result of a placement. Online orders carry the gateway order the client pays against.
///
/// When the gateway is unreachable the order is still placed; `payment_retry` then says where
/// to obtain a gateway order later.
#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    #[serde(flatten)]
    pub details: OrderDetails,
    pub gateway_order: Option<GatewayOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_retry: Option<PendingPayment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingPayment {
    pub reason: String,
    pub retry_path: String,
}

/// Checkout orchestration over the cart, catalog, coupon, stock, wallet and order services.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    cart: Arc<CartService>,
    catalog: Arc<dyn CatalogLookup>,
    coupons: Arc<CouponEngine>,
    stock: Arc<StockReconciler>,
    wallet: Arc<WalletLedger>,
    orders: Arc<OrderService>,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        cart: Arc<CartService>,
        catalog: Arc<dyn CatalogLookup>,
        coupons: Arc<CouponEngine>,
        stock: Arc<StockReconciler>,
        wallet: Arc<WalletLedger>,
        orders: Arc<OrderService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            cart,
            catalog,
            coupons,
            stock,
            wallet,
            orders,
        }
    }

    /// Prices the user's cart; fails on an empty cart or an unavailable book.
    async fn priced_lines(&self, user_id: Uuid) -> Result<Vec<PricedLine>, ServiceError> {
        let lines = self.cart.lines(user_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }

        let default_window = self.orders.policy().default_return_window_days;
        let mut priced = Vec::with_capacity(lines.len());
        for line in &lines {
            if !line.book.is_active {
                return Err(ServiceError::ValidationError(format!(
                    "'{}' is no longer available",
                    line.book.title
                )));
            }
            let offers = self
                .catalog
                .offer_breakdown(line.book.id, line.book.category_id)
                .await?;
            priced.push(price_line(line, offers, default_window));
        }
        Ok(priced)
    }

    /// Checkout preview without side effects.
    #[instrument(skip(self))]
    pub async fn quote(&self, user_id: Uuid) -> Result<Quote, ServiceError> {
        let lines = self.priced_lines(user_id).await?;
        let subtotal: i64 = lines.iter().map(|l| l.line_subtotal).sum();

        let (coupon, coupon_error) = match self
            .coupons
            .resolve(&*self.db, user_id, subtotal, Utc::now())
            .await
        {
            Ok(coupon) => (coupon, None),
            Err(e) if e.kind() == crate::errors::ErrorKind::Internal => return Err(e),
            Err(e) => (None, Some(e.to_string())),
        };

        let mut quote = build_quote(lines, coupon, self.orders.policy());
        quote.coupon_error = coupon_error;
        Ok(quote)
    }

    /// Turns the user's cart into an order.
    ///
    /// Stock, coupon consumption, the cart and the wallet debit all move in one transaction. For
    /// online payment the gateway order is created after commit.
    #[instrument(skip(self, request), fields(user_id = %user_id, payment_method = ?request.payment_method))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        request: PlaceOrderRequest,
    ) -> Result<PlacedOrder, ServiceError> {
        request.validate()?;
        let lines = self.priced_lines(user_id).await?;
        let subtotal: i64 = lines.iter().map(|l| l.line_subtotal).sum();
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let method = request.payment_method;

        let txn = self.db.begin().await?;

        let mut stock_levels = Vec::with_capacity(lines.len());
        for line in &lines {
            match self.stock.decrement(&txn, line.book_id, line.quantity).await {
                Ok(level) => stock_levels.push(level),
                Err(e) => {
                    if matches!(e, ServiceError::InsufficientStock(_)) {
                        metrics::STOCK_CONFLICTS.inc();
                    }
                    return Err(e);
                }
            }
        }

        let coupon = self.coupons.resolve(&txn, user_id, subtotal, now).await?;
        let quote = build_quote(lines, coupon, self.orders.policy());
        if method == PaymentMethod::Online && quote.final_total <= 0 {
            return Err(ServiceError::ValidationError(
                "Nothing to pay online; choose wallet or cash on delivery".to_string(),
            ));
        }

        let status = match method {
            PaymentMethod::Online => OrderStatus::PaymentPending,
            PaymentMethod::Cod | PaymentMethod::Wallet => OrderStatus::Placed,
        };
        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            address_id: Set(request.address_id),
            shipping_address: Set(request.shipping_address),
            status: Set(status),
            payment_method: Set(method),
            subtotal: Set(quote.subtotal),
            product_discount: Set(quote.product_discount),
            category_discount: Set(quote.category_discount),
            coupon_discount: Set(quote.coupon_discount),
            coupon_code: Set(quote.coupon.as_ref().map(|c| c.code.clone())),
            coupon_id: Set(quote.coupon.as_ref().map(|c| c.coupon_id)),
            delivery_charge: Set(quote.delivery_charge),
            final_total: Set(quote.final_total),
            total_with_delivery: Set(quote.total_with_delivery),
            refund_status: Set(None),
            refund_amount: Set(0),
            refunded_at: Set(None),
            cancellation_reason: Set(None),
            return_reason: Set(None),
            rejection_reason: Set(None),
            has_pending_item_cancellations: Set(false),
            has_pending_item_returns: Set(false),
            gateway_order_id: Set(None),
            payment_id: Set(None),
            paid_at: Set((method == PaymentMethod::Wallet).then_some(now)),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(quote.lines.len());
        for line in &quote.lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                book_id: Set(line.book_id),
                category_id: Set(line.category_id),
                title: Set(line.title.clone()),
                unit_price: Set(line.unit_price),
                quantity: Set(line.quantity),
                product_discount: Set(line.product_discount),
                category_discount: Set(line.category_discount),
                coupon_discount_share: Set(line.coupon_share),
                total: Set(line.total),
                return_window_days: Set(line.return_window_days),
                cancellation_requested: Set(false),
                cancellation_status: Set(None),
                cancellation_reason: Set(None),
                return_requested: Set(false),
                return_status: Set(None),
                return_reason: Set(None),
                rejection_reason: Set(None),
                refund_status: Set(None),
                refund_amount: Set(0),
                refunded_at: Set(None),
                stock_restored: Set(false),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        if let Some(coupon) = &quote.coupon {
            self.coupons
                .consume(&txn, user_id, coupon.coupon_id, order_id)
                .await?;
        }
        self.cart.clear(&txn, user_id).await?;

        let mut debit = None;
        if method == PaymentMethod::Wallet && quote.final_total > 0 {
            let wallet = self.wallet.get_or_create(&txn, user_id).await?;
            let entry = LedgerEntry::new(
                quote.final_total,
                "Payment for order",
                reference::order_payment(order_id),
            )
            .for_order(order_id);
            debit = Some(self.wallet.debit(&txn, wallet.id, entry).await?);
        }

        txn.commit().await?;

        metrics::ORDERS_PLACED
            .with_label_values(&[method.as_str()])
            .inc();
        info!(
            order_id = %order_id,
            final_total = %money::format_minor(order.final_total),
            coupon_discount = order.coupon_discount,
            "order placed"
        );
        for level in stock_levels {
            self.event_sender
                .send_or_log(Event::StockAdjusted {
                    book_id: level.book_id,
                    delta: level.current - level.previous,
                    stock: level.current,
                })
                .await;
        }
        if let Some(entry) = &debit {
            self.wallet.publish(entry).await;
        }
        if let Some(coupon) = &quote.coupon {
            self.coupons
                .publish_consumed(user_id, coupon.coupon_id, order_id)
                .await;
        }
        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id,
                user_id,
                payment_method: method.as_str().to_string(),
                final_total: order.final_total,
            })
            .await;

        if method != PaymentMethod::Online {
            return Ok(PlacedOrder {
                details: OrderDetails::new(order, items),
                gateway_order: None,
                payment_retry: None,
            });
        }

        // the order is committed as PaymentPending either way
        match self.orders.attach_gateway_order(order.clone()).await {
            Ok((order, gateway_order)) => Ok(PlacedOrder {
                details: OrderDetails::new(order, items),
                gateway_order: Some(gateway_order),
                payment_retry: None,
            }),
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "order placed without gateway order");
                Ok(PlacedOrder {
                    details: OrderDetails::new(order, items),
                    gateway_order: None,
                    payment_retry: Some(PendingPayment {
                        reason: e.to_string(),
                        retry_path: format!("/api/v1/orders/{}/payment/retry", order_id),
                    }),
                })
            }
        }
    }
}
