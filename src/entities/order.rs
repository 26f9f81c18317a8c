use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order header. Monetary columns are minor units.
///
/// `final_total` is the amount still owed back to the customer on a full refund: it starts as
/// `subtotal - product_discount - category_discount - coupon_discount` and shrinks as items are
/// cancelled or returned.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub address_id: Uuid,
    #[sea_orm(column_type = "Text", nullable)]
    pub shipping_address: Option<String>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,

    pub subtotal: i64,
    pub product_discount: i64,
    pub category_discount: i64,
    pub coupon_discount: i64,
    #[sea_orm(nullable)]
    pub coupon_code: Option<String>,
    #[sea_orm(nullable)]
    pub coupon_id: Option<Uuid>,
    pub delivery_charge: i64,
    pub final_total: i64,
    pub total_with_delivery: i64,

    #[sea_orm(nullable)]
    pub refund_status: Option<RefundStatus>,
    pub refund_amount: i64,
    #[sea_orm(nullable)]
    pub refunded_at: Option<DateTime<Utc>>,

    #[sea_orm(nullable)]
    pub cancellation_reason: Option<String>,
    #[sea_orm(nullable)]
    pub return_reason: Option<String>,
    #[sea_orm(nullable)]
    pub rejection_reason: Option<String>,

    pub has_pending_item_cancellations: bool,
    pub has_pending_item_returns: bool,

    #[sea_orm(nullable)]
    pub gateway_order_id: Option<String>,
    #[sea_orm(nullable)]
    pub payment_id: Option<String>,
    #[sea_orm(nullable)]
    pub paid_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub delivered_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "payment_pending")]
    PaymentPending,
    #[sea_orm(string_value = "placed")]
    Placed,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "return_requested")]
    ReturnRequested,
    #[sea_orm(string_value = "return_approved")]
    ReturnApproved,
    #[sea_orm(string_value = "return_completed")]
    ReturnCompleted,
    #[sea_orm(string_value = "return_rejected")]
    ReturnRejected,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Statuses reached before the parcel leaves the shop.
    pub fn is_pre_delivery(self) -> bool {
        matches!(
            self,
            Self::PaymentPending | Self::Placed | Self::Paid | Self::Processing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PaymentPending => "payment_pending",
            Self::Placed => "placed",
            Self::Paid => "paid",
            Self::Processing => "processing",
            Self::Delivered => "delivered",
            Self::ReturnRequested => "return_requested",
            Self::ReturnApproved => "return_approved",
            Self::ReturnCompleted => "return_completed",
            Self::ReturnRejected => "return_rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "cod")]
    Cod,
    #[sea_orm(string_value = "online")]
    Online,
    #[sea_orm(string_value = "wallet")]
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cod => "cod",
            Self::Online => "online",
            Self::Wallet => "wallet",
        }
    }
}

/// Outcome of a refund attempt, shared by orders and order items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "not_applicable_cod")]
    NotApplicableCod,
    #[sea_orm(string_value = "not_applicable_unpaid")]
    NotApplicableUnpaid,
}

impl RefundStatus {
    pub fn description(self) -> &'static str {
        match self {
            Self::Completed => "Refund credited to wallet",
            Self::NotApplicableCod => "No refund applicable for COD orders",
            Self::NotApplicableUnpaid => "No refund applicable for unpaid orders",
        }
    }
}
