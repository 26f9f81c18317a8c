//! Money and stock settlement shared by every path that removes items from an order.

use super::{transitions::ensure_transition, OrderService};
use crate::{
    entities::{
        order::{self, OrderStatus, PaymentMethod, RefundStatus},
        order_item::{self, ItemCancellationStatus, ItemReturnStatus},
        wallet_transaction,
    },
    errors::ServiceError,
    events::Event,
    money,
    services::{
        stock::StockLevel,
        wallet::{reference, LedgerEntry},
    },
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use tracing::info;
use uuid::Uuid;

/// Monetary aggregates of an order header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: i64,
    pub product_discount: i64,
    pub category_discount: i64,
    pub coupon_discount: i64,
    pub delivery_charge: i64,
    pub final_total: i64,
    pub total_with_delivery: i64,
}

impl OrderTotals {
    pub fn of(order: &order::Model) -> Self {
        Self {
            subtotal: order.subtotal,
            product_discount: order.product_discount,
            category_discount: order.category_discount,
            coupon_discount: order.coupon_discount,
            delivery_charge: order.delivery_charge,
            final_total: order.final_total,
            total_with_delivery: order.total_with_delivery,
        }
    }

    /// Totals once `item` is taken out of the order. `final_total` drops by exactly what the
    /// customer paid for the item, so the remainder stays refundable.
    pub fn without_item(self, item: &order_item::Model) -> Self {
        let final_total = (self.final_total - item.refundable_amount()).max(0);
        Self {
            subtotal: (self.subtotal - item.line_subtotal()).max(0),
            product_discount: (self.product_discount - item.product_discount).max(0),
            category_discount: (self.category_discount - item.category_discount).max(0),
            coupon_discount: (self.coupon_discount - item.coupon_discount_share).max(0),
            delivery_charge: self.delivery_charge,
            final_total,
            total_with_delivery: final_total + self.delivery_charge,
        }
    }

    pub fn apply(&self, active: &mut order::ActiveModel) {
        active.subtotal = Set(self.subtotal);
        active.product_discount = Set(self.product_discount);
        active.category_discount = Set(self.category_discount);
        active.coupon_discount = Set(self.coupon_discount);
        active.final_total = Set(self.final_total);
        active.total_with_delivery = Set(self.total_with_delivery);
    }
}

/// Refunds go to the wallet only once the order has actually been paid.
pub fn refund_decision(order: &order::Model) -> RefundStatus {
    if order.is_paid() {
        RefundStatus::Completed
    } else if order.payment_method == PaymentMethod::Cod {
        RefundStatus::NotApplicableCod
    } else {
        RefundStatus::NotApplicableUnpaid
    }
}

/// How a single item leaves its order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemExit {
    SelfCancelled,
    CancellationApproved,
    ReturnApproved,
}

/// Side effects gathered inside a transaction and published after commit.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub events: Vec<Event>,
    pub ledger: Vec<wallet_transaction::Model>,
    pub stock: Vec<StockLevel>,
}

pub(crate) struct ItemSettlement {
    pub order: order::Model,
    pub item: order_item::Model,
    pub refunded: i64,
}

impl OrderService {
    pub(super) async fn lock_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .lock_exclusive()
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    pub(super) async fn lock_item<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        item_id: Uuid,
    ) -> Result<order_item::Model, ServiceError> {
        order_item::Entity::find_by_id(item_id)
            .filter(order_item::Column::OrderId.eq(order_id))
            .lock_exclusive()
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Item {} not found in order {}", item_id, order_id))
            })
    }

    pub(super) async fn items_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .order_by_asc(order_item::Column::Id)
            .all(conn)
            .await?)
    }

    /// Counts the order's items still awaiting review: `(cancellations, returns)`.
    pub(super) async fn pending_flags<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<(bool, bool), ServiceError> {
        let cancellations = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .filter(order_item::Column::CancellationStatus.eq(ItemCancellationStatus::Pending))
            .count(conn)
            .await?;
        let returns = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .filter(order_item::Column::ReturnStatus.eq(ItemReturnStatus::Pending))
            .count(conn)
            .await?;
        Ok((cancellations > 0, returns > 0))
    }

    pub(super) async fn restore_stock<C: ConnectionTrait>(
        &self,
        conn: &C,
        item: &order_item::Model,
        effects: &mut Effects,
    ) -> Result<(), ServiceError> {
        if item.stock_restored {
            return Ok(());
        }
        let level = self.stock.increment(conn, item.book_id, item.quantity).await?;
        effects.stock.push(level);
        Ok(())
    }

    /// Credits `amount` to the order owner's wallet when the order was paid.
    pub(super) async fn refund<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &order::Model,
        amount: i64,
        entry: LedgerEntry,
        effects: &mut Effects,
    ) -> Result<(RefundStatus, i64), ServiceError> {
        let decision = refund_decision(order);
        if decision != RefundStatus::Completed || amount <= 0 {
            return Ok((decision, 0));
        }

        let wallet = self.wallet.get_or_create(conn, order.user_id).await?;
        let credited = self.wallet.credit(conn, wallet.id, entry).await?;
        effects.ledger.push(credited);
        Ok((decision, amount))
    }

    /// Removes one item from the order: restores its stock, refunds what was paid for it and
    /// shrinks the order totals. Closes the order once no live items remain.
    pub(super) async fn settle_item<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: order::Model,
        item: order_item::Model,
        exit: ItemExit,
        effects: &mut Effects,
    ) -> Result<ItemSettlement, ServiceError> {
        let now = Utc::now();
        self.restore_stock(conn, &item, effects).await?;

        let amount = item.refundable_amount();
        let description = match exit {
            ItemExit::ReturnApproved => format!("Refund for returned item '{}'", item.title),
            _ => format!("Refund for cancelled item '{}'", item.title),
        };
        let entry = LedgerEntry::new(amount, description, reference::item_refund(order.id, item.id))
            .for_order(order.id);
        let (refund_status, refunded) = self.refund(conn, &order, amount, entry, effects).await?;

        let totals = OrderTotals::of(&order).without_item(&item);

        let mut item_active: order_item::ActiveModel = item.into();
        match exit {
            ItemExit::SelfCancelled => {
                item_active.cancellation_status = Set(Some(ItemCancellationStatus::Cancelled))
            }
            ItemExit::CancellationApproved => {
                item_active.cancellation_status = Set(Some(ItemCancellationStatus::Approved))
            }
            ItemExit::ReturnApproved => {
                item_active.return_status = Set(Some(ItemReturnStatus::Approved))
            }
        }
        item_active.refund_status = Set(Some(refund_status));
        item_active.refund_amount = Set(refunded);
        item_active.refunded_at = Set((refunded > 0).then_some(now));
        item_active.stock_restored = Set(true);
        item_active.updated_at = Set(now);
        let item = item_active.update(conn).await?;

        let items = self.items_of(conn, order.id).await?;
        let (pending_cancellations, pending_returns) = self.pending_flags(conn, order.id).await?;
        let closing_status = if items.iter().all(order_item::Model::is_removed) {
            let target = if items.iter().any(order_item::Model::is_returned) {
                OrderStatus::ReturnCompleted
            } else {
                OrderStatus::Cancelled
            };
            ensure_transition(order.status, target)?;
            Some(target)
        } else {
            None
        };

        let previous_status = order.status;
        let mut order_active: order::ActiveModel = order.clone().into();
        totals.apply(&mut order_active);
        order_active.refund_amount = Set(order.refund_amount + refunded);
        if refunded > 0 {
            order_active.refunded_at = Set(Some(now));
        }
        order_active.has_pending_item_cancellations = Set(pending_cancellations);
        order_active.has_pending_item_returns = Set(pending_returns);
        if let Some(status) = closing_status {
            order_active.status = Set(status);
            order_active.refund_status = Set(Some(refund_status));
            effects.events.push(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: previous_status.to_string(),
                new_status: status.to_string(),
            });
        }
        order_active.updated_at = Set(now);
        let order = order_active.update(conn).await?;

        info!(
            order_id = %order.id,
            item_id = %item.id,
            exit = ?exit,
            refunded = %money::format_minor(refunded),
            final_total = order.final_total,
            "order item settled"
        );
        Ok(ItemSettlement {
            order,
            item,
            refunded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn order(payment_method: PaymentMethod, paid: bool) -> order::Model {
        let now = Utc::now();
        order::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            address_id: Uuid::new_v4(),
            shipping_address: None,
            status: OrderStatus::Placed,
            payment_method,
            subtotal: 1_000,
            product_discount: 0,
            category_discount: 0,
            coupon_discount: 100,
            coupon_code: Some("SAVE10".into()),
            coupon_id: None,
            delivery_charge: 50,
            final_total: 900,
            total_with_delivery: 950,
            refund_status: None,
            refund_amount: 0,
            refunded_at: None,
            cancellation_reason: None,
            return_reason: None,
            rejection_reason: None,
            has_pending_item_cancellations: false,
            has_pending_item_returns: false,
            gateway_order_id: None,
            payment_id: None,
            paid_at: paid.then_some(now),
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn item(total: i64, share: i64) -> order_item::Model {
        let now = Utc::now();
        order_item::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            book_id: Uuid::new_v4(),
            category_id: Uuid::new_v4(),
            title: "Dune".into(),
            unit_price: total,
            quantity: 1,
            product_discount: 0,
            category_discount: 0,
            coupon_discount_share: share,
            total,
            return_window_days: 7,
            cancellation_requested: false,
            cancellation_status: None,
            cancellation_reason: None,
            return_requested: false,
            return_status: None,
            return_reason: None,
            rejection_reason: None,
            refund_status: None,
            refund_amount: 0,
            refunded_at: None,
            stock_restored: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn removing_items_drains_final_total_exactly() {
        let order = order(PaymentMethod::Wallet, true);
        let a = item(300, 30);
        let b = item(700, 70);

        let after_a = OrderTotals::of(&order).without_item(&a);
        assert_eq!(after_a.subtotal, 700);
        assert_eq!(after_a.coupon_discount, 70);
        assert_eq!(after_a.final_total, 630);
        assert_eq!(after_a.total_with_delivery, 680);

        let after_b = after_a.without_item(&b);
        assert_eq!(after_b.final_total, 0);
        assert_eq!(after_b.coupon_discount, 0);
        assert_eq!(after_b.subtotal, 0);
    }

    #[test]
    fn refund_requires_payment() {
        assert_eq!(
            refund_decision(&order(PaymentMethod::Cod, false)),
            RefundStatus::NotApplicableCod
        );
        assert_eq!(
            refund_decision(&order(PaymentMethod::Online, false)),
            RefundStatus::NotApplicableUnpaid
        );
        assert_eq!(
            refund_decision(&order(PaymentMethod::Cod, true)),
            RefundStatus::Completed
        );
        assert_eq!(
            RefundStatus::NotApplicableCod.description(),
            "No refund applicable for COD orders"
        );
    }
}
