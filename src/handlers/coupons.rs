use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};

use super::common::{created_response, AuthUser};
use crate::{
    entities::coupon,
    errors::ServiceError,
    services::coupons::{AppliedCoupon, NewCoupon},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize)]
pub struct ApplyCouponRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ActiveCouponView {
    pub coupon: Option<coupon::Model>,
    /// The selection priced against the current cart
    pub preview: Option<AppliedCoupon>,
}

/// POST /api/v1/coupons/apply
pub async fn apply_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ApplyCouponRequest>,
) -> ApiResult<AppliedCoupon> {
    let applied = state
        .services
        .coupons
        .apply_coupon(user.user_id, &body.code)
        .await?;
    Ok(Json(ApiResponse::success(applied)))
}

/// DELETE /api/v1/coupons/active
pub async fn remove_coupon(State(state): State<AppState>, user: AuthUser) -> ApiResult<bool> {
    let removed = state.services.coupons.remove_coupon(user.user_id).await?;
    Ok(Json(ApiResponse::success(removed)))
}

/// GET /api/v1/coupons/active
pub async fn active_coupon(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<ActiveCouponView> {
    let coupons = &state.services.coupons;
    let coupon = coupons.active_selection(user.user_id).await?;
    let preview = match coupon {
        Some(_) => {
            let subtotal = state.services.cart.subtotal(user.user_id).await?;
            coupons.preview(user.user_id, subtotal).await?
        }
        None => None,
    };
    Ok(Json(ApiResponse::success(ActiveCouponView { coupon, preview })))
}

/// GET /api/v1/coupons/available
pub async fn available_coupons(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<coupon::Model>> {
    let coupons = state.services.coupons.list_available(user.user_id).await?;
    Ok(Json(ApiResponse::success(coupons)))
}

/// POST /api/v1/admin/coupons
pub async fn create_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<NewCoupon>,
) -> Result<Response, ServiceError> {
    user.require_admin()?;
    let created = state.services.coupons.create_coupon(body).await?;
    Ok(created_response(created))
}

/// POST /api/v1/admin/coupons/:code/deactivate
pub async fn deactivate_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Path(code): Path<String>,
) -> ApiResult<coupon::Model> {
    user.require_admin()?;
    let coupon = state.services.coupons.deactivate_coupon(&code).await?;
    Ok(Json(ApiResponse::success(coupon)))
}
