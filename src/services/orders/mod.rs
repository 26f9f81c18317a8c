//! Order lifecycle: cancellations, returns, admin reviews, fulfilment progression and online
//! payment confirmation. Placement itself lives in the checkout service.

pub mod settlement;
pub mod transitions;

pub use settlement::{refund_decision, OrderTotals};
pub use transitions::{can_transition, ensure_transition};

use self::{
    settlement::{Effects, ItemExit},
    transitions::{ensure_cancellation_transition, ensure_return_transition},
};
use crate::{
    config::OrderPolicyConfig,
    db::DbPool,
    entities::{
        order::{self, OrderStatus, PaymentMethod},
        order_item::{self, ItemCancellationStatus, ItemReturnStatus},
        wallet_transaction::TransactionType,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
    services::{
        payment_gateway::{GatewayOrder, PaymentGateway},
        stock::StockReconciler,
        wallet::{reference, LedgerEntry, WalletLedger},
    },
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Admin decision on a pending item request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
}

/// Order header with its items.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    /// Human-readable refund outcome, e.g. "No refund applicable for COD orders"
    pub refund_description: Option<String>,
    pub items: Vec<order_item::Model>,
}

impl OrderDetails {
    pub fn new(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            refund_description: order.refund_status.map(|s| s.description().to_string()),
            order,
            items,
        }
    }

    pub fn item(&self, item_id: Uuid) -> Option<&order_item::Model> {
        self.items.iter().find(|i| i.id == item_id)
    }
}

/// Proof of payment handed back by the gateway checkout widget.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PaymentConfirmation {
    #[validate(length(min = 1, max = 128))]
    pub gateway_order_id: String,
    #[validate(length(min = 1, max = 128))]
    pub payment_id: String,
    #[validate(length(min = 1, max = 256))]
    pub signature: String,
}

fn ensure_owner(order: &order::Model, user_id: Uuid) -> Result<(), ServiceError> {
    // other users' orders are indistinguishable from missing ones
    if order.user_id != user_id {
        return Err(ServiceError::NotFound(format!("Order {} not found", order.id)));
    }
    Ok(())
}

fn clean_reason(reason: Option<String>) -> Option<String> {
    reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
}

fn required_reason(reason: Option<String>, what: &str) -> Result<String, ServiceError> {
    clean_reason(reason)
        .ok_or_else(|| ServiceError::ValidationError(format!("A reason is required to {}", what)))
}

fn return_deadline(order: &order::Model, window_days: i32) -> Result<DateTime<Utc>, ServiceError> {
    let delivered_at = order.delivered_at.ok_or_else(|| {
        ServiceError::Conflict(format!("Order {} has no delivery date", order.id))
    })?;
    Ok(delivered_at + Duration::days(i64::from(window_days)))
}

/// Owns the order and order item state machines.
///
/// Every mutation locks the order row, re-checks the current state inside the transaction and
/// runs stock and wallet movements on the same connection. Events go out after commit.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    stock: Arc<StockReconciler>,
    wallet: Arc<WalletLedger>,
    gateway: Arc<dyn PaymentGateway>,
    policy: OrderPolicyConfig,
    currency: String,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        stock: Arc<StockReconciler>,
        wallet: Arc<WalletLedger>,
        gateway: Arc<dyn PaymentGateway>,
        policy: OrderPolicyConfig,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            stock,
            wallet,
            gateway,
            policy,
            currency,
        }
    }

    pub fn policy(&self) -> &OrderPolicyConfig {
        &self.policy
    }

    fn ensure_self_service_window(
        &self,
        order: &order::Model,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if !transitions::is_self_cancellable(order.status) {
            return Err(ServiceError::NotCancellable {
                order_id: order.id,
                reason: format!("order is {}", order.status),
            });
        }
        let deadline = order.created_at + self.policy.cancel_window();
        if now > deadline {
            return Err(ServiceError::NotCancellable {
                order_id: order.id,
                reason: format!(
                    "the {}-minute cancellation window closed at {}",
                    self.policy.cancel_window_minutes,
                    deadline.to_rfc3339()
                ),
            });
        }
        Ok(())
    }

    async fn publish(&self, effects: Effects) {
        for level in effects.stock {
            self.event_sender
                .send_or_log(Event::StockAdjusted {
                    book_id: level.book_id,
                    delta: level.current - level.previous,
                    stock: level.current,
                })
                .await;
        }
        for entry in &effects.ledger {
            if entry.transaction_type == TransactionType::Credit {
                metrics::record_refund(entry.amount);
            }
            self.wallet.publish(entry).await;
        }
        for event in effects.events {
            self.event_sender.send_or_log(event).await;
        }
    }

    /// Closes every live item of the order and refunds the outstanding `final_total`.
    async fn close_order<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        order: order::Model,
        target: OrderStatus,
        reason: Option<String>,
        effects: &mut Effects,
    ) -> Result<(order::Model, i64), ServiceError> {
        let now = Utc::now();
        let returning = target == OrderStatus::ReturnCompleted;

        for item in self.items_of(conn, order.id).await? {
            if item.is_removed() {
                continue;
            }
            if returning {
                ensure_return_transition(&item, ItemReturnStatus::Approved)?;
            } else {
                ensure_cancellation_transition(&item, ItemCancellationStatus::Cancelled)?;
            }
            self.restore_stock(conn, &item, effects).await?;

            let mut active: order_item::ActiveModel = item.clone().into();
            if returning {
                active.return_status = Set(Some(ItemReturnStatus::Approved));
            } else {
                active.cancellation_status = Set(Some(ItemCancellationStatus::Cancelled));
            }
            active.stock_restored = Set(true);
            active.updated_at = Set(now);
            active.update(conn).await?;
        }

        let amount = order.final_total;
        let (description, reference) = if returning {
            ("Refund for returned order", reference::return_refund(order.id))
        } else {
            ("Refund for cancelled order", reference::order_refund(order.id))
        };
        let entry = LedgerEntry::new(amount, description, reference).for_order(order.id);
        let (refund_status, refunded) = self.refund(conn, &order, amount, entry, effects).await?;
        let (pending_cancellations, pending_returns) = self.pending_flags(conn, order.id).await?;

        let mut active: order::ActiveModel = order.clone().into();
        active.status = Set(target);
        active.refund_status = Set(Some(refund_status));
        active.refund_amount = Set(order.refund_amount + refunded);
        if refunded > 0 {
            active.refunded_at = Set(Some(now));
        }
        if !returning {
            active.cancellation_reason = Set(reason);
        }
        active.has_pending_item_cancellations = Set(pending_cancellations);
        active.has_pending_item_returns = Set(pending_returns);
        active.updated_at = Set(now);
        let updated = active.update(conn).await?;

        effects.events.push(Event::OrderStatusChanged {
            order_id: order.id,
            old_status: order.status.to_string(),
            new_status: target.to_string(),
        });
        Ok((updated, refunded))
    }

    /// Self-service cancellation of the whole order inside the cancellation window.
    #[instrument(skip(self, reason), fields(order_id = %order_id, user_id = %user_id))]
    pub async fn cancel_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        let now = Utc::now();
        let mut effects = Effects::default();

        let txn = self.db.begin().await?;
        let order = self.lock_order(&txn, order_id).await?;
        ensure_owner(&order, user_id)?;
        if let Err(e) = self.ensure_self_service_window(&order, now) {
            warn!(error = %e, "order cancellation refused");
            return Err(e);
        }
        ensure_transition(order.status, OrderStatus::Cancelled)?;

        let (order, refunded) = self
            .close_order(&txn, order, OrderStatus::Cancelled, clean_reason(reason), &mut effects)
            .await?;
        let items = self.items_of(&txn, order_id).await?;
        txn.commit().await?;

        metrics::ORDER_CANCELLATIONS.with_label_values(&["order"]).inc();
        info!(refunded, refund_status = ?order.refund_status, "order cancelled");
        effects.events.push(Event::OrderCancelled { order_id, refunded });
        self.publish(effects).await;
        Ok(OrderDetails::new(order, items))
    }

    /// Self-service cancellation of a single item inside the cancellation window.
    #[instrument(skip(self, reason), fields(order_id = %order_id, item_id = %item_id))]
    pub async fn cancel_order_item(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        item_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        let now = Utc::now();
        let mut effects = Effects::default();

        let txn = self.db.begin().await?;
        let order = self.lock_order(&txn, order_id).await?;
        ensure_owner(&order, user_id)?;
        if let Err(e) = self.ensure_self_service_window(&order, now) {
            warn!(error = %e, "item cancellation refused");
            return Err(e);
        }

        let item = self.lock_item(&txn, order_id, item_id).await?;
        ensure_cancellation_transition(&item, ItemCancellationStatus::Cancelled)?;

        let mut active: order_item::ActiveModel = item.clone().into();
        active.cancellation_requested = Set(true);
        active.cancellation_reason = Set(clean_reason(reason));
        let item = active.update(&txn).await?;

        let settled = self
            .settle_item(&txn, order, item, ItemExit::SelfCancelled, &mut effects)
            .await?;
        let items = self.items_of(&txn, order_id).await?;
        txn.commit().await?;

        metrics::ORDER_CANCELLATIONS.with_label_values(&["item"]).inc();
        effects.events.push(Event::OrderItemCancelled {
            order_id,
            item_id,
            refunded: settled.refunded,
        });
        self.publish(effects).await;
        Ok(OrderDetails::new(settled.order, items))
    }

    /// Asks an admin to cancel an item once the self-service window has passed.
    #[instrument(skip(self, reason), fields(order_id = %order_id, item_id = %item_id))]
    pub async fn request_item_cancellation(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        item_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        let reason = required_reason(reason, "request a cancellation")?;

        let txn = self.db.begin().await?;
        let order = self.lock_order(&txn, order_id).await?;
        ensure_owner(&order, user_id)?;
        if !order.status.is_pre_delivery() {
            return Err(ServiceError::NotCancellable {
                order_id,
                reason: format!("order is {}", order.status),
            });
        }

        let item = self.lock_item(&txn, order_id, item_id).await?;
        ensure_cancellation_transition(&item, ItemCancellationStatus::Pending)?;

        let now = Utc::now();
        let mut active: order_item::ActiveModel = item.into();
        active.cancellation_requested = Set(true);
        active.cancellation_status = Set(Some(ItemCancellationStatus::Pending));
        active.cancellation_reason = Set(Some(reason));
        active.updated_at = Set(now);
        active.update(&txn).await?;

        let mut order_active: order::ActiveModel = order.into();
        order_active.has_pending_item_cancellations = Set(true);
        order_active.updated_at = Set(now);
        let order = order_active.update(&txn).await?;
        let items = self.items_of(&txn, order_id).await?;
        txn.commit().await?;

        info!("item cancellation requested");
        self.event_sender
            .send_or_log(Event::ItemCancellationRequested { order_id, item_id })
            .await;
        Ok(OrderDetails::new(order, items))
    }

    /// Opens a return for one item of a delivered order inside the item's return window.
    #[instrument(skip(self, reason), fields(order_id = %order_id, item_id = %item_id))]
    pub async fn request_item_return(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        item_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        let reason = required_reason(reason, "request a return")?;
        let now = Utc::now();

        let txn = self.db.begin().await?;
        let order = self.lock_order(&txn, order_id).await?;
        ensure_owner(&order, user_id)?;
        if order.status != OrderStatus::Delivered {
            return Err(ServiceError::Conflict(format!(
                "Returns require a delivered order; order {} is {}",
                order_id, order.status
            )));
        }

        let item = self.lock_item(&txn, order_id, item_id).await?;
        ensure_return_transition(&item, ItemReturnStatus::Pending)?;
        let deadline = return_deadline(&order, item.return_window_days)?;
        if now > deadline {
            warn!(deadline = %deadline, "return window closed");
            return Err(ServiceError::Conflict(format!(
                "The {}-day return window for item {} closed at {}",
                item.return_window_days,
                item_id,
                deadline.to_rfc3339()
            )));
        }

        let mut active: order_item::ActiveModel = item.into();
        active.return_requested = Set(true);
        active.return_status = Set(Some(ItemReturnStatus::Pending));
        active.return_reason = Set(Some(reason));
        active.updated_at = Set(now);
        active.update(&txn).await?;

        let mut order_active: order::ActiveModel = order.into();
        order_active.has_pending_item_returns = Set(true);
        order_active.updated_at = Set(now);
        let order = order_active.update(&txn).await?;
        let items = self.items_of(&txn, order_id).await?;
        txn.commit().await?;

        info!("item return requested");
        self.event_sender
            .send_or_log(Event::ItemReturnRequested { order_id, item_id })
            .await;
        Ok(OrderDetails::new(order, items))
    }

    /// Admin decision on a pending item cancellation.
    #[instrument(skip(self, reason), fields(order_id = %order_id, item_id = %item_id, action = ?action))]
    pub async fn review_item_cancellation(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        action: ReviewAction,
        reason: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        let reason = match action {
            ReviewAction::Reject => Some(required_reason(reason, "reject a cancellation")?),
            ReviewAction::Approve => clean_reason(reason),
        };
        let mut effects = Effects::default();

        let txn = self.db.begin().await?;
        let order = self.lock_order(&txn, order_id).await?;
        let item = self.lock_item(&txn, order_id, item_id).await?;
        ensure_cancellation_transition(
            &item,
            match action {
                ReviewAction::Approve => ItemCancellationStatus::Approved,
                ReviewAction::Reject => ItemCancellationStatus::Rejected,
            },
        )?;

        let (order, refunded) = match action {
            ReviewAction::Approve => {
                if !order.status.is_pre_delivery() {
                    return Err(ServiceError::NotCancellable {
                        order_id,
                        reason: format!("order is {}", order.status),
                    });
                }
                let settled = self
                    .settle_item(&txn, order, item, ItemExit::CancellationApproved, &mut effects)
                    .await?;
                (settled.order, settled.refunded)
            }
            ReviewAction::Reject => {
                let now = Utc::now();
                let mut active: order_item::ActiveModel = item.into();
                active.cancellation_status = Set(Some(ItemCancellationStatus::Rejected));
                active.rejection_reason = Set(reason);
                active.updated_at = Set(now);
                active.update(&txn).await?;

                let (pending_cancellations, pending_returns) =
                    self.pending_flags(&txn, order_id).await?;
                let mut order_active: order::ActiveModel = order.into();
                order_active.has_pending_item_cancellations = Set(pending_cancellations);
                order_active.has_pending_item_returns = Set(pending_returns);
                order_active.updated_at = Set(now);
                (order_active.update(&txn).await?, 0)
            }
        };
        let items = self.items_of(&txn, order_id).await?;
        txn.commit().await?;

        let approved = action == ReviewAction::Approve;
        if approved {
            metrics::ORDER_CANCELLATIONS.with_label_values(&["item"]).inc();
            effects.events.push(Event::OrderItemCancelled {
                order_id,
                item_id,
                refunded,
            });
        }
        effects.events.push(Event::ItemReviewed {
            order_id,
            item_id,
            kind: "cancellation".to_string(),
            approved,
        });
        info!(approved, refunded, "item cancellation reviewed");
        self.publish(effects).await;
        Ok(OrderDetails::new(order, items))
    }

    /// Admin decision on a pending item return.
    #[instrument(skip(self, reason), fields(order_id = %order_id, item_id = %item_id, action = ?action))]
    pub async fn review_item_return(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        action: ReviewAction,
        reason: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        let reason = match action {
            ReviewAction::Reject => Some(required_reason(reason, "reject a return")?),
            ReviewAction::Approve => clean_reason(reason),
        };
        let mut effects = Effects::default();

        let txn = self.db.begin().await?;
        let order = self.lock_order(&txn, order_id).await?;
        let item = self.lock_item(&txn, order_id, item_id).await?;
        ensure_return_transition(
            &item,
            match action {
                ReviewAction::Approve => ItemReturnStatus::Approved,
                ReviewAction::Reject => ItemReturnStatus::Rejected,
            },
        )?;

        let (order, refunded) = match action {
            ReviewAction::Approve => {
                if order.status != OrderStatus::Delivered {
                    return Err(ServiceError::Conflict(format!(
                        "Order {} is {}; item returns settle only on delivered orders",
                        order_id, order.status
                    )));
                }
                let settled = self
                    .settle_item(&txn, order, item, ItemExit::ReturnApproved, &mut effects)
                    .await?;
                (settled.order, settled.refunded)
            }
            ReviewAction::Reject => {
                let now = Utc::now();
                let mut active: order_item::ActiveModel = item.into();
                active.return_status = Set(Some(ItemReturnStatus::Rejected));
                active.rejection_reason = Set(reason);
                active.updated_at = Set(now);
                active.update(&txn).await?;

                let (pending_cancellations, pending_returns) =
                    self.pending_flags(&txn, order_id).await?;
                let mut order_active: order::ActiveModel = order.into();
                order_active.has_pending_item_cancellations = Set(pending_cancellations);
                order_active.has_pending_item_returns = Set(pending_returns);
                order_active.updated_at = Set(now);
                (order_active.update(&txn).await?, 0)
            }
        };
        let items = self.items_of(&txn, order_id).await?;
        txn.commit().await?;

        let approved = action == ReviewAction::Approve;
        let outcome = if approved { "approved" } else { "rejected" };
        metrics::ORDER_RETURNS
            .with_label_values(&["item", outcome])
            .inc();
        effects.events.push(Event::ItemReviewed {
            order_id,
            item_id,
            kind: "return".to_string(),
            approved,
        });
        info!(approved, refunded, "item return reviewed");
        self.publish(effects).await;
        Ok(OrderDetails::new(order, items))
    }

    /// Requests a return of every remaining item of a delivered order.
    ///
    /// The window is the shortest return window among the live items.
    #[instrument(skip(self, reason), fields(order_id = %order_id, user_id = %user_id))]
    pub async fn return_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        let reason = required_reason(reason, "return an order")?;
        let now = Utc::now();

        let txn = self.db.begin().await?;
        let order = self.lock_order(&txn, order_id).await?;
        ensure_owner(&order, user_id)?;
        ensure_transition(order.status, OrderStatus::ReturnRequested)?;
        let (pending_cancellations, pending_returns) = self.pending_flags(&txn, order_id).await?;
        if pending_cancellations || pending_returns {
            return Err(ServiceError::Conflict(format!(
                "Order {} has item requests awaiting review",
                order_id
            )));
        }

        let items = self.items_of(&txn, order_id).await?;
        let live: Vec<&order_item::Model> = items.iter().filter(|i| !i.is_removed()).collect();
        if let Some(rejected) = live
            .iter()
            .find(|i| i.return_status == Some(ItemReturnStatus::Rejected))
        {
            return Err(ServiceError::Conflict(format!(
                "Return of item {} was rejected; return the remaining items individually",
                rejected.id
            )));
        }
        for item in &live {
            ensure_return_transition(item, ItemReturnStatus::Approved)?;
        }
        let window_days = live
            .iter()
            .map(|i| i.return_window_days)
            .min()
            .ok_or_else(|| {
                ServiceError::Conflict(format!("Order {} has no items left to return", order_id))
            })?;
        let deadline = return_deadline(&order, window_days)?;
        if now > deadline {
            warn!(deadline = %deadline, "return window closed");
            return Err(ServiceError::Conflict(format!(
                "The {}-day return window for order {} closed at {}",
                window_days,
                order_id,
                deadline.to_rfc3339()
            )));
        }

        let previous = order.status;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::ReturnRequested);
        active.return_reason = Set(Some(reason));
        active.updated_at = Set(now);
        let order = active.update(&txn).await?;
        txn.commit().await?;

        info!("order return requested");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: previous.to_string(),
                new_status: order.status.to_string(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::ReturnRequested { order_id })
            .await;
        Ok(OrderDetails::new(order, items))
    }

    /// Approves a whole-order return: restocks live items and refunds the outstanding total.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn approve_order_return(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let mut effects = Effects::default();

        let txn = self.db.begin().await?;
        let order = self.lock_order(&txn, order_id).await?;
        ensure_transition(order.status, OrderStatus::ReturnApproved)?;
        ensure_transition(OrderStatus::ReturnApproved, OrderStatus::ReturnCompleted)?;

        let (order, refunded) = self
            .close_order(&txn, order, OrderStatus::ReturnCompleted, None, &mut effects)
            .await?;
        let items = self.items_of(&txn, order_id).await?;
        txn.commit().await?;

        metrics::ORDER_RETURNS
            .with_label_values(&["order", "approved"])
            .inc();
        info!(refunded, "order return approved");
        effects.events.push(Event::ReturnApproved { order_id, refunded });
        self.publish(effects).await;
        Ok(OrderDetails::new(order, items))
    }

    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn reject_order_return(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderDetails, ServiceError> {
        let reason = required_reason(reason, "reject a return")?;

        let txn = self.db.begin().await?;
        let order = self.lock_order(&txn, order_id).await?;
        ensure_transition(order.status, OrderStatus::ReturnRejected)?;

        let previous = order.status;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::ReturnRejected);
        active.rejection_reason = Set(Some(reason));
        active.updated_at = Set(Utc::now());
        let order = active.update(&txn).await?;
        let items = self.items_of(&txn, order_id).await?;
        txn.commit().await?;

        metrics::ORDER_RETURNS
            .with_label_values(&["order", "rejected"])
            .inc();
        info!("order return rejected");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: previous.to_string(),
                new_status: order.status.to_string(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::ReturnRejected { order_id })
            .await;
        Ok(OrderDetails::new(order, items))
    }

    /// Admin fulfilment progression to `Processing` or `Delivered`.
    ///
    /// Delivery stamps `delivered_at`, which starts the return windows; cash on delivery orders
    /// count as paid from that moment.
    #[instrument(skip(self), fields(order_id = %order_id, status = %status))]
    pub async fn advance_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<OrderDetails, ServiceError> {
        if !matches!(status, OrderStatus::Processing | OrderStatus::Delivered) {
            return Err(ServiceError::ValidationError(format!(
                "Status {} is reached through its own operation",
                status
            )));
        }
        let now = Utc::now();

        let txn = self.db.begin().await?;
        let order = self.lock_order(&txn, order_id).await?;
        ensure_transition(order.status, status)?;
        if status == OrderStatus::Delivered {
            let (pending_cancellations, _) = self.pending_flags(&txn, order_id).await?;
            if pending_cancellations {
                warn!("delivery blocked by pending item cancellations");
                return Err(ServiceError::Conflict(format!(
                    "Order {} has item cancellations awaiting review",
                    order_id
                )));
            }
        }

        let previous = order.status;
        let cod_unpaid = order.payment_method == PaymentMethod::Cod && !order.is_paid();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(status);
        if status == OrderStatus::Delivered {
            active.delivered_at = Set(Some(now));
            if cod_unpaid {
                active.paid_at = Set(Some(now));
            }
        }
        active.updated_at = Set(now);
        let order = active.update(&txn).await?;
        let items = self.items_of(&txn, order_id).await?;
        txn.commit().await?;

        info!(from = %previous, "order status advanced");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: previous.to_string(),
                new_status: status.to_string(),
            })
            .await;
        Ok(OrderDetails::new(order, items))
    }

    /// Registers a payable order with the gateway and stores its id on the order.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn attach_gateway_order(
        &self,
        order: order::Model,
    ) -> Result<(order::Model, GatewayOrder), ServiceError> {
        let gateway_order = self
            .gateway
            .create_order(order.final_total, &self.currency, order.id.to_string())
            .await
            .map_err(|e| {
                warn!(error = %e, "gateway order creation failed; payment can be retried");
                e
            })?;

        let mut active: order::ActiveModel = order.into();
        active.gateway_order_id = Set(Some(gateway_order.id.clone()));
        active.updated_at = Set(Utc::now());
        let order = active.update(&*self.db).await?;
        Ok((order, gateway_order))
    }

    /// Re-creates the gateway order for an online order still awaiting payment.
    #[instrument(skip(self), fields(order_id = %order_id, user_id = %user_id))]
    pub async fn retry_online_payment(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<(order::Model, GatewayOrder), ServiceError> {
        let order = self.find_order(order_id).await?;
        ensure_owner(&order, user_id)?;
        if order.payment_method != PaymentMethod::Online
            || order.status != OrderStatus::PaymentPending
        {
            return Err(ServiceError::Conflict(format!(
                "Order {} is not awaiting online payment (status {})",
                order_id, order.status
            )));
        }
        self.attach_gateway_order(order).await
    }

    /// Verifies the gateway signature, then marks the order paid.
    #[instrument(skip(self, confirmation), fields(order_id = %order_id, user_id = %user_id))]
    pub async fn confirm_payment(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        confirmation: PaymentConfirmation,
    ) -> Result<OrderDetails, ServiceError> {
        confirmation.validate()?;

        let order = self.find_order(order_id).await?;
        ensure_owner(&order, user_id)?;
        if order.payment_method != PaymentMethod::Online {
            return Err(ServiceError::ValidationError(format!(
                "Order {} is not an online payment order",
                order_id
            )));
        }
        if order.gateway_order_id.as_deref() != Some(confirmation.gateway_order_id.as_str()) {
            metrics::GATEWAY_FAILURES
                .with_label_values(&["verify_signature"])
                .inc();
            return Err(ServiceError::PaymentVerificationFailed(format!(
                "Gateway order {} does not belong to order {}",
                confirmation.gateway_order_id, order_id
            )));
        }
        if !self.gateway.verify_signature(
            &confirmation.gateway_order_id,
            &confirmation.payment_id,
            &confirmation.signature,
        ) {
            metrics::GATEWAY_FAILURES
                .with_label_values(&["verify_signature"])
                .inc();
            warn!("payment signature mismatch");
            return Err(ServiceError::PaymentVerificationFailed(
                "Signature does not match".to_string(),
            ));
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;
        let order = self.lock_order(&txn, order_id).await?;
        if order.is_paid() {
            return Err(ServiceError::Conflict(format!(
                "Order {} is already paid",
                order_id
            )));
        }
        ensure_transition(order.status, OrderStatus::Paid)?;

        let previous = order.status;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Paid);
        active.payment_id = Set(Some(confirmation.payment_id.clone()));
        active.paid_at = Set(Some(now));
        active.updated_at = Set(now);
        let order = active.update(&txn).await?;
        let items = self.items_of(&txn, order_id).await?;
        txn.commit().await?;

        info!(payment_id = %confirmation.payment_id, "online payment confirmed");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: previous.to_string(),
                new_status: order.status.to_string(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderPaid {
                order_id,
                payment_id: order.payment_id.clone(),
            })
            .await;
        Ok(OrderDetails::new(order, items))
    }

    async fn find_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Loads an order with its items. `owner` restricts the lookup to that user's orders.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        owner: Option<Uuid>,
    ) -> Result<OrderDetails, ServiceError> {
        let order = self.find_order(order_id).await?;
        if let Some(user_id) = owner {
            ensure_owner(&order, user_id)?;
        }
        let items = self.items_of(&*self.db, order_id).await?;
        Ok(OrderDetails::new(order, items))
    }

    /// Orders newest first; `owner` restricts the listing to that user.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        owner: Option<Uuid>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = order::Entity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(user_id) = owner {
            query = query.filter(order::Column::UserId.eq(user_id));
        }
        let paginator = query.paginate(&*self.db, limit.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }
}
