use crate::{
    db::DbPool,
    entities::{
        active_coupon,
        coupon::{self, CouponType},
        user_coupon,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics, money,
    services::cart::CartService,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Upper-cases and trims a coupon code; codes are compared case-insensitively.
pub fn normalize_code(code: &str) -> Result<String, ServiceError> {
    let code = code.trim().to_uppercase();
    if code.is_empty() {
        return Err(ServiceError::ValidationError(
            "Coupon code is required".to_string(),
        ));
    }
    Ok(code)
}

/// Discount a coupon yields on `subtotal`.
///
/// Percent coupons take `value`% capped by `max_discount`; flat coupons take `value`. Neither
/// exceeds the subtotal.
pub fn compute_discount(coupon: &coupon::Model, subtotal: i64) -> i64 {
    let raw = match coupon.coupon_type {
        CouponType::Percent => {
            let pct = money::percent_of(subtotal, Decimal::from(coupon.value));
            coupon.max_discount.map_or(pct, |cap| pct.min(cap.max(0)))
        }
        CouponType::Flat => coupon.value,
    };
    raw.clamp(0, subtotal.max(0))
}

/// Runs the eligibility checks in a fixed order so the first failing precondition is reported.
pub fn check_eligibility(
    coupon: &coupon::Model,
    already_used: bool,
    subtotal: i64,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    if !coupon.is_active {
        return Err(ServiceError::CouponInvalid(format!(
            "{} is not active",
            coupon.code
        )));
    }
    if coupon.is_expired_at(now) {
        return Err(ServiceError::CouponExpired(format!(
            "{} expired at {}",
            coupon.code,
            coupon.expiry.to_rfc3339()
        )));
    }
    if coupon.is_exhausted() {
        return Err(ServiceError::UsageLimitReached(coupon.code.clone()));
    }
    if already_used {
        return Err(ServiceError::AlreadyUsed(coupon.code.clone()));
    }
    if subtotal < coupon.min_order_value {
        return Err(ServiceError::BelowMinimum {
            minimum: coupon.min_order_value,
            subtotal,
        });
    }
    Ok(())
}

/// A coupon selection priced against a subtotal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedCoupon {
    pub coupon_id: Uuid,
    pub code: String,
    pub coupon_type: CouponType,
    pub subtotal: i64,
    pub discount: i64,
}

impl AppliedCoupon {
    fn priced(coupon: &coupon::Model, subtotal: i64) -> Self {
        Self {
            coupon_id: coupon.id,
            code: coupon.code.clone(),
            coupon_type: coupon.coupon_type,
            subtotal,
            discount: compute_discount(coupon, subtotal),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewCoupon {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(max = 255))]
    pub description: Option<String>,
    pub coupon_type: CouponType,
    #[validate(range(min = 1))]
    pub value: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub min_order_value: i64,
    pub max_discount: Option<i64>,
    pub expiry: DateTime<Utc>,
    pub usage_limit: Option<i32>,
}

/// Coupon validation, pricing, single-active selection and consumption.
#[derive(Clone)]
pub struct CouponEngine {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    cart: Arc<CartService>,
}

impl CouponEngine {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, cart: Arc<CartService>) -> Self {
        Self {
            db,
            event_sender,
            cart,
        }
    }

    async fn find_by_code<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
    ) -> Result<coupon::Model, ServiceError> {
        let code = normalize_code(code)?;
        coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code.as_str()))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", code)))
    }

    async fn used_by<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        coupon_id: Uuid,
    ) -> Result<bool, ServiceError> {
        Ok(user_coupon::Entity::find()
            .filter(user_coupon::Column::UserId.eq(user_id))
            .filter(user_coupon::Column::CouponId.eq(coupon_id))
            .one(conn)
            .await?
            .is_some())
    }

    /// Validates `code` against the user's current cart and makes it the user's single active
    /// coupon, replacing any earlier selection.
    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<AppliedCoupon, ServiceError> {
        let coupon = self.find_by_code(&*self.db, code).await?;
        let subtotal = self.cart.subtotal(user_id).await?;
        if subtotal <= 0 {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }
        let already_used = self.used_by(&*self.db, user_id, coupon.id).await?;

        if let Err(e) = check_eligibility(&coupon, already_used, subtotal, Utc::now()) {
            warn!(user_id = %user_id, code = %coupon.code, error = %e, "coupon rejected");
            return Err(e);
        }

        let txn = self.db.begin().await?;
        active_coupon::Entity::delete_many()
            .filter(active_coupon::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        active_coupon::ActiveModel {
            user_id: Set(user_id),
            coupon_id: Set(coupon.id),
            applied_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        let applied = AppliedCoupon::priced(&coupon, subtotal);
        info!(user_id = %user_id, code = %applied.code, discount = applied.discount, "coupon applied");
        self.event_sender
            .send_or_log(Event::CouponApplied {
                user_id,
                code: applied.code.clone(),
            })
            .await;
        Ok(applied)
    }

    /// Drops the active selection without consuming the coupon.
    #[instrument(skip(self))]
    pub async fn remove_coupon(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        let res = active_coupon::Entity::delete_by_id(user_id)
            .exec(&*self.db)
            .await?;
        let removed = res.rows_affected > 0;
        if removed {
            self.event_sender
                .send_or_log(Event::CouponRemoved { user_id })
                .await;
        }
        Ok(removed)
    }

    /// The coupon currently selected by the user, if any.
    pub async fn active_selection(
        &self,
        user_id: Uuid,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        let found = active_coupon::Entity::find_by_id(user_id)
            .find_also_related(coupon::Entity)
            .one(&*self.db)
            .await?;
        Ok(found.and_then(|(_, coupon)| coupon))
    }

    /// Prices the active selection against `subtotal` without checking eligibility.
    pub async fn preview(
        &self,
        user_id: Uuid,
        subtotal: i64,
    ) -> Result<Option<AppliedCoupon>, ServiceError> {
        Ok(self
            .active_selection(user_id)
            .await?
            .map(|c| AppliedCoupon::priced(&c, subtotal)))
    }

    /// Re-reads and re-validates the active selection inside the placement transaction.
    pub async fn resolve<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        subtotal: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<AppliedCoupon>, ServiceError> {
        let Some(selection) = active_coupon::Entity::find_by_id(user_id).one(conn).await? else {
            return Ok(None);
        };
        let coupon = coupon::Entity::find_by_id(selection.coupon_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Coupon {} not found", selection.coupon_id))
            })?;
        let already_used = self.used_by(conn, user_id, coupon.id).await?;
        check_eligibility(&coupon, already_used, subtotal, now)?;
        Ok(Some(AppliedCoupon::priced(&coupon, subtotal)))
    }

    /// Converts the selection into a redemption: records the `UserCoupon`, bumps `used_count`
    /// and clears the active selection. The only path that consumes a coupon.
    pub async fn consume<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        coupon_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let inserted = user_coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            coupon_id: Set(coupon_id),
            order_id: Set(order_id),
            used_at: Set(Utc::now()),
        }
        .insert(conn)
        .await;

        if let Err(err) = inserted {
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                return Err(ServiceError::AlreadyUsed(coupon_id.to_string()));
            }
            return Err(err.into());
        }

        let res = coupon::Entity::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Id.eq(coupon_id))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(coupon::Column::UsedCount)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            )
            .exec(conn)
            .await?;
        if res.rows_affected == 0 {
            return Err(ServiceError::UsageLimitReached(coupon_id.to_string()));
        }

        active_coupon::Entity::delete_by_id(user_id).exec(conn).await?;
        metrics::COUPON_REDEMPTIONS.inc();
        Ok(())
    }

    /// Publishes the consumption event after commit.
    pub async fn publish_consumed(&self, user_id: Uuid, coupon_id: Uuid, order_id: Uuid) {
        self.event_sender
            .send_or_log(Event::CouponConsumed {
                user_id,
                coupon_id,
                order_id,
            })
            .await;
    }

    /// Coupons the user could apply right now, ignoring the cart minimum.
    pub async fn list_available(&self, user_id: Uuid) -> Result<Vec<coupon::Model>, ServiceError> {
        let now = Utc::now();
        let used: Vec<Uuid> = user_coupon::Entity::find()
            .filter(user_coupon::Column::UserId.eq(user_id))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|u| u.coupon_id)
            .collect();

        Ok(coupon::Entity::find()
            .filter(coupon::Column::IsActive.eq(true))
            .order_by_asc(coupon::Column::Code)
            .all(&*self.db)
            .await?
            .into_iter()
            .filter(|c| !c.is_expired_at(now) && !c.is_exhausted() && !used.contains(&c.id))
            .collect())
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(&self, input: NewCoupon) -> Result<coupon::Model, ServiceError> {
        input.validate()?;
        let code = normalize_code(&input.code)?;
        if input.coupon_type == CouponType::Percent && input.value > 100 {
            return Err(ServiceError::ValidationError(
                "Percent coupons cannot exceed 100".to_string(),
            ));
        }
        if let Some(limit) = input.usage_limit {
            if limit <= 0 {
                return Err(ServiceError::ValidationError(
                    "usage_limit must be positive".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let created = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            description: Set(input.description),
            coupon_type: Set(input.coupon_type),
            value: Set(input.value),
            min_order_value: Set(input.min_order_value),
            max_discount: Set(input.max_discount),
            expiry: Set(input.expiry),
            usage_limit: Set(input.usage_limit),
            used_count: Set(0),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(|err| match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::Conflict(format!("Coupon {} already exists", code))
            }
            _ => err.into(),
        })?;

        info!(coupon_id = %created.id, "coupon created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn deactivate_coupon(&self, code: &str) -> Result<coupon::Model, ServiceError> {
        let existing = self.find_by_code(&*self.db, code).await?;
        let mut active: coupon::ActiveModel = existing.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;

    fn coupon(kind: CouponType, value: i64) -> coupon::Model {
        let now = Utc::now();
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            description: None,
            coupon_type: kind,
            value,
            min_order_value: 10_000,
            max_discount: Some(20_000),
            expiry: now + Duration::days(1),
            usage_limit: Some(100),
            used_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn percent_discount_is_capped() {
        let c = coupon(CouponType::Percent, 10);
        assert_eq!(compute_discount(&c, 120_000), 12_000);
        assert_eq!(compute_discount(&c, 500_000), 20_000);
    }

    #[test]
    fn flat_discount_never_exceeds_subtotal() {
        let c = coupon(CouponType::Flat, 5_000);
        assert_eq!(compute_discount(&c, 12_000), 5_000);
        assert_eq!(compute_discount(&c, 3_000), 3_000);
    }

    #[test]
    fn eligibility_reports_first_failure() {
        let now = Utc::now();
        let mut c = coupon(CouponType::Percent, 10);
        c.is_active = false;
        c.used_count = 100;
        assert_matches!(
            check_eligibility(&c, true, 0, now),
            Err(ServiceError::CouponInvalid(_))
        );

        c.is_active = true;
        c.expiry = now - Duration::seconds(1);
        assert_matches!(
            check_eligibility(&c, true, 0, now),
            Err(ServiceError::CouponExpired(_))
        );

        c.expiry = now + Duration::days(1);
        assert_matches!(
            check_eligibility(&c, true, 0, now),
            Err(ServiceError::UsageLimitReached(_))
        );

        c.used_count = 0;
        assert_matches!(
            check_eligibility(&c, true, 0, now),
            Err(ServiceError::AlreadyUsed(_))
        );
        assert_matches!(
            check_eligibility(&c, false, 9_999, now),
            Err(ServiceError::BelowMinimum { minimum: 10_000, subtotal: 9_999 })
        );
        assert!(check_eligibility(&c, false, 10_000, now).is_ok());
    }

    #[test]
    fn codes_are_normalized() {
        assert_eq!(normalize_code("  save10 ").unwrap(), "SAVE10");
        assert_matches!(normalize_code("   "), Err(ServiceError::ValidationError(_)));
    }
}
