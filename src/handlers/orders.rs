use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::common::{AuthUser, ReasonBody};
use crate::{
    entities::order::{self, OrderStatus},
    services::{
        orders::{OrderDetails, PaymentConfirmation, ReviewAction},
        payment_gateway::GatewayOrder,
    },
    ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse,
};

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub action: ReviewAction,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, serde::Serialize)]
pub struct PaymentRetryResponse {
    pub order: order::Model,
    pub gateway_order: GatewayOrder,
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<PaginatedResponse<order::Model>> {
    let (orders, total) = state
        .services
        .orders
        .list_orders(user.owner_scope(), query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        orders,
        total,
        query.page,
        query.limit,
    ))))
}

/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderDetails> {
    let details = state
        .services
        .orders
        .get_order(order_id, user.owner_scope())
        .await?;
    Ok(Json(ApiResponse::success(details)))
}

/// POST /api/v1/orders/:id/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    body: Option<Json<ReasonBody>>,
) -> ApiResult<OrderDetails> {
    let reason = body.and_then(|Json(b)| b.reason);
    let details = state
        .services
        .orders
        .cancel_order(user.user_id, order_id, reason)
        .await?;
    Ok(Json(ApiResponse::success(details)))
}

/// POST /api/v1/orders/:id/items/:item_id/cancel
pub async fn cancel_order_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<ReasonBody>>,
) -> ApiResult<OrderDetails> {
    let reason = body.and_then(|Json(b)| b.reason);
    let details = state
        .services
        .orders
        .cancel_order_item(user.user_id, order_id, item_id, reason)
        .await?;
    Ok(Json(ApiResponse::success(details)))
}

/// POST /api/v1/orders/:id/items/:item_id/cancellation-request
pub async fn request_item_cancellation(
    State(state): State<AppState>,
    user: AuthUser,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<OrderDetails> {
    let details = state
        .services
        .orders
        .request_item_cancellation(user.user_id, order_id, item_id, body.reason)
        .await?;
    Ok(Json(ApiResponse::success(details)))
}

/// POST /api/v1/orders/:id/items/:item_id/return-request
pub async fn request_item_return(
    State(state): State<AppState>,
    user: AuthUser,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<OrderDetails> {
    let details = state
        .services
        .orders
        .request_item_return(user.user_id, order_id, item_id, body.reason)
        .await?;
    Ok(Json(ApiResponse::success(details)))
}

/// POST /api/v1/orders/:id/return
pub async fn return_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<OrderDetails> {
    let details = state
        .services
        .orders
        .return_order(user.user_id, order_id, body.reason)
        .await?;
    Ok(Json(ApiResponse::success(details)))
}

/// POST /api/v1/orders/:id/payment/confirm
pub async fn confirm_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(body): Json<PaymentConfirmation>,
) -> ApiResult<OrderDetails> {
    let details = state
        .services
        .orders
        .confirm_payment(user.user_id, order_id, body)
        .await?;
    Ok(Json(ApiResponse::success(details)))
}

/// POST /api/v1/orders/:id/payment/retry
pub async fn retry_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<PaymentRetryResponse> {
    let (order, gateway_order) = state
        .services
        .orders
        .retry_online_payment(user.user_id, order_id)
        .await?;
    Ok(Json(ApiResponse::success(PaymentRetryResponse {
        order,
        gateway_order,
    })))
}

/// POST /api/v1/admin/orders/:id/items/:item_id/cancellation-review
pub async fn review_item_cancellation(
    State(state): State<AppState>,
    user: AuthUser,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ReviewRequest>,
) -> ApiResult<OrderDetails> {
    user.require_admin()?;
    let details = state
        .services
        .orders
        .review_item_cancellation(order_id, item_id, body.action, body.reason)
        .await?;
    Ok(Json(ApiResponse::success(details)))
}

/// POST /api/v1/admin/orders/:id/items/:item_id/return-review
pub async fn review_item_return(
    State(state): State<AppState>,
    user: AuthUser,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ReviewRequest>,
) -> ApiResult<OrderDetails> {
    user.require_admin()?;
    let details = state
        .services
        .orders
        .review_item_return(order_id, item_id, body.action, body.reason)
        .await?;
    Ok(Json(ApiResponse::success(details)))
}

/// POST /api/v1/admin/orders/:id/return/approve
pub async fn approve_order_return(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderDetails> {
    user.require_admin()?;
    let details = state.services.orders.approve_order_return(order_id).await?;
    Ok(Json(ApiResponse::success(details)))
}

/// POST /api/v1/admin/orders/:id/return/reject
pub async fn reject_order_return(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<OrderDetails> {
    user.require_admin()?;
    let details = state
        .services
        .orders
        .reject_order_return(order_id, body.reason)
        .await?;
    Ok(Json(ApiResponse::success(details)))
}

/// POST /api/v1/admin/orders/:id/status
pub async fn advance_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(body): Json<AdvanceStatusRequest>,
) -> ApiResult<OrderDetails> {
    user.require_admin()?;
    let details = state
        .services
        .orders
        .advance_status(order_id, body.status)
        .await?;
    Ok(Json(ApiResponse::success(details)))
}
