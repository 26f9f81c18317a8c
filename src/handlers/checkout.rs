use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::common::{created_response, AuthUser};
use crate::{
    entities::cart_item,
    errors::ServiceError,
    services::checkout::{PlaceOrderRequest, Quote},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, Validate)]
pub struct AddCartItemRequest {
    pub book_id: Uuid,
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct CartView {
    pub items: Vec<cart_item::Model>,
    pub subtotal: i64,
}

/// GET /api/v1/cart
pub async fn get_cart(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartView> {
    let cart = &state.services.cart;
    let items = cart.items(user.user_id).await?;
    let subtotal = cart.subtotal(user.user_id).await?;
    Ok(Json(ApiResponse::success(CartView { items, subtotal })))
}

/// POST /api/v1/cart/items
pub async fn add_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<AddCartItemRequest>,
) -> Result<Response, ServiceError> {
    body.validate()?;
    let line = state
        .services
        .cart
        .add_item(user.user_id, body.book_id, body.quantity)
        .await?;
    Ok(created_response(line))
}

/// DELETE /api/v1/cart/items/:book_id
pub async fn remove_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(book_id): Path<Uuid>,
) -> ApiResult<bool> {
    let removed = state
        .services
        .cart
        .remove_item(user.user_id, book_id)
        .await?;
    if !removed {
        return Err(ServiceError::NotFound(format!(
            "Book {} is not in the cart",
            book_id
        )));
    }
    Ok(Json(ApiResponse::success(true)))
}

#[derive(Debug, Serialize)]
pub struct StockView {
    pub book_id: Uuid,
    pub stock: i32,
}

/// GET /api/v1/books/:book_id/stock
pub async fn book_stock(
    State(state): State<AppState>,
    Path(book_id): Path<Uuid>,
) -> ApiResult<StockView> {
    let stock = state.services.stock.available(book_id).await?;
    Ok(Json(ApiResponse::success(StockView { book_id, stock })))
}

/// GET /api/v1/checkout/quote
pub async fn quote(State(state): State<AppState>, user: AuthUser) -> ApiResult<Quote> {
    let quote = state.services.checkout.quote(user.user_id).await?;
    Ok(Json(ApiResponse::success(quote)))
}

/// POST /api/v1/checkout/orders
pub async fn place_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<PlaceOrderRequest>,
) -> Result<Response, ServiceError> {
    let placed = state
        .services
        .checkout
        .place_order(user.user_id, body)
        .await?;
    Ok(created_response(placed))
}
