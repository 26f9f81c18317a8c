use super::order::RefundStatus;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Line item snapshot taken at purchase time.
///
/// `total = unit_price * quantity - product_discount - category_discount`; the coupon share is
/// tracked separately so partial refunds never return coupon value twice.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub book_id: Uuid,
    pub category_id: Uuid,
    pub title: String,
    pub unit_price: i64,
    pub quantity: i32,
    pub product_discount: i64,
    pub category_discount: i64,
    pub coupon_discount_share: i64,
    pub total: i64,
    /// Category return window captured at purchase
    pub return_window_days: i32,

    pub cancellation_requested: bool,
    #[sea_orm(nullable)]
    pub cancellation_status: Option<ItemCancellationStatus>,
    #[sea_orm(nullable)]
    pub cancellation_reason: Option<String>,

    pub return_requested: bool,
    #[sea_orm(nullable)]
    pub return_status: Option<ItemReturnStatus>,
    #[sea_orm(nullable)]
    pub return_reason: Option<String>,

    #[sea_orm(nullable)]
    pub rejection_reason: Option<String>,
    #[sea_orm(nullable)]
    pub refund_status: Option<RefundStatus>,
    pub refund_amount: i64,
    #[sea_orm(nullable)]
    pub refunded_at: Option<DateTime<Utc>>,
    pub stock_restored: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn line_subtotal(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }

    /// What the customer actually paid for this line.
    pub fn refundable_amount(&self) -> i64 {
        (self.total - self.coupon_discount_share).max(0)
    }

    /// Item was removed from the order and its money and stock given back.
    pub fn is_removed(&self) -> bool {
        matches!(
            self.cancellation_status,
            Some(ItemCancellationStatus::Cancelled | ItemCancellationStatus::Approved)
        ) || self.return_status == Some(ItemReturnStatus::Approved)
    }

    pub fn is_returned(&self) -> bool {
        self.return_status == Some(ItemReturnStatus::Approved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum ItemCancellationStatus {
    /// Awaiting admin review
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Cancelled by the customer inside the self-service window
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum ItemReturnStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}
