use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum CouponType {
    /// `value` is an amount in minor units
    #[sea_orm(string_value = "flat")]
    Flat,
    /// `value` is a whole percent, capped by `max_discount`
    #[sea_orm(string_value = "percent")]
    Percent,
}

/// Coupon definition. `code` is stored upper-case so lookups are case-insensitive.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    #[sea_orm(nullable)]
    pub description: Option<String>,
    pub coupon_type: CouponType,
    pub value: i64,
    pub min_order_value: i64,
    #[sea_orm(nullable)]
    pub max_discount: Option<i64>,
    pub expiry: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub usage_limit: Option<i32>,
    pub used_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_coupon::Entity")]
    Redemptions,
}

impl Related<super::user_coupon::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Redemptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage_limit
            .map_or(false, |limit| self.used_count >= limit)
    }
}
