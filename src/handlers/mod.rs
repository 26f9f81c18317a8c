pub mod checkout;
pub mod common;
pub mod coupons;
pub mod orders;
pub mod wallet;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        cart::CartService,
        catalog::{CatalogLookup, DbCatalog},
        checkout::CheckoutService,
        coupons::CouponEngine,
        orders::OrderService,
        payment_gateway::PaymentGateway,
        stock::StockReconciler,
        wallet::WalletLedger,
    },
};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<dyn CatalogLookup>,
    pub cart: Arc<CartService>,
    pub stock: Arc<StockReconciler>,
    pub wallet: Arc<WalletLedger>,
    pub coupons: Arc<CouponEngine>,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
}

impl AppServices {
    /// Wires every service over one pool and event channel.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let catalog: Arc<dyn CatalogLookup> = Arc::new(DbCatalog::new(db_pool.clone()));
        let cart = Arc::new(CartService::new(db_pool.clone(), catalog.clone()));
        let stock = Arc::new(StockReconciler::new(db_pool.clone()));
        let wallet = Arc::new(WalletLedger::new(
            db_pool.clone(),
            event_sender.clone(),
            config.currency.clone(),
        ));
        let coupons = Arc::new(CouponEngine::new(
            db_pool.clone(),
            event_sender.clone(),
            cart.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            event_sender.clone(),
            stock.clone(),
            wallet.clone(),
            gateway,
            config.orders.clone(),
            config.currency.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db_pool,
            event_sender,
            cart.clone(),
            catalog.clone(),
            coupons.clone(),
            stock.clone(),
            wallet.clone(),
            orders.clone(),
        ));

        Self {
            catalog,
            cart,
            stock,
            wallet,
            coupons,
            orders,
            checkout,
        }
    }
}

/// Customer and admin routes mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    let cart_routes = Router::new()
        .route("/cart", get(checkout::get_cart))
        .route("/cart/items", post(checkout::add_cart_item))
        .route("/cart/items/:book_id", delete(checkout::remove_cart_item))
        .route("/books/:book_id/stock", get(checkout::book_stock));

    let checkout_routes = Router::new()
        .route("/checkout/quote", get(checkout::quote))
        .route("/checkout/orders", post(checkout::place_order));

    let orders_routes = Router::new()
        .route("/orders", get(orders::list_orders))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/cancel", post(orders::cancel_order))
        .route("/orders/:id/return", post(orders::return_order))
        .route("/orders/:id/payment/confirm", post(orders::confirm_payment))
        .route("/orders/:id/payment/retry", post(orders::retry_payment))
        .route(
            "/orders/:id/items/:item_id/cancel",
            post(orders::cancel_order_item),
        )
        .route(
            "/orders/:id/items/:item_id/cancellation-request",
            post(orders::request_item_cancellation),
        )
        .route(
            "/orders/:id/items/:item_id/return-request",
            post(orders::request_item_return),
        );

    let coupons_routes = Router::new()
        .route("/coupons/apply", post(coupons::apply_coupon))
        .route(
            "/coupons/active",
            get(coupons::active_coupon).delete(coupons::remove_coupon),
        )
        .route("/coupons/available", get(coupons::available_coupons));

    let wallet_routes = Router::new()
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/transactions", get(wallet::list_transactions));

    let admin_routes = Router::new()
        .route("/admin/orders/:id/status", post(orders::advance_status))
        .route(
            "/admin/orders/:id/items/:item_id/cancellation-review",
            post(orders::review_item_cancellation),
        )
        .route(
            "/admin/orders/:id/items/:item_id/return-review",
            post(orders::review_item_return),
        )
        .route(
            "/admin/orders/:id/return/approve",
            post(orders::approve_order_return),
        )
        .route(
            "/admin/orders/:id/return/reject",
            post(orders::reject_order_return),
        )
        .route("/admin/coupons", post(coupons::create_coupon))
        .route(
            "/admin/coupons/:code/deactivate",
            post(coupons::deactivate_coupon),
        )
        .route(
            "/admin/wallets/:id/reconcile",
            get(wallet::reconcile_wallet),
        );

    Router::new()
        .merge(cart_routes)
        .merge(checkout_routes)
        .merge(orders_routes)
        .merge(coupons_routes)
        .merge(wallet_routes)
        .merge(admin_routes)
}
