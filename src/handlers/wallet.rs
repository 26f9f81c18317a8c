use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use super::common::AuthUser;
use crate::{
    entities::{wallet, wallet_transaction},
    services::wallet::Reconciliation,
    ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse,
};

/// GET /api/v1/wallet
pub async fn get_wallet(State(state): State<AppState>, user: AuthUser) -> ApiResult<wallet::Model> {
    let wallet = state.services.wallet.wallet_for_user(user.user_id).await?;
    Ok(Json(ApiResponse::success(wallet)))
}

/// GET /api/v1/wallet/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<PaginatedResponse<wallet_transaction::Model>> {
    let ledger = &state.services.wallet;
    let wallet = ledger.wallet_for_user(user.user_id).await?;
    let (entries, total) = ledger.history(wallet.id, query.page, query.limit).await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        entries,
        total,
        query.page,
        query.limit,
    ))))
}

/// GET /api/v1/admin/wallets/:id/reconcile
pub async fn reconcile_wallet(
    State(state): State<AppState>,
    user: AuthUser,
    Path(wallet_id): Path<Uuid>,
) -> ApiResult<Reconciliation> {
    user.require_admin()?;
    let report = state.services.wallet.reconcile(wallet_id).await?;
    Ok(Json(ApiResponse::success(report)))
}
