#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use bookstore_fulfillment::{
    build_router,
    config::AppConfig,
    db,
    entities::{
        book, category,
        coupon::{self, CouponType},
        order::{self, PaymentMethod},
        wallet,
    },
    errors::ServiceError,
    events::{self, EventSender},
    handlers::{
        common::{USER_ID_HEADER, USER_ROLE_HEADER},
        AppServices,
    },
    services::{
        checkout::{PlaceOrderRequest, PlacedOrder},
        coupons::NewCoupon,
        payment_gateway::{verify_payment_signature, GatewayOrder, PaymentGateway},
        wallet::LedgerEntry,
    },
    AppState,
};
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const GATEWAY_SECRET: &str = "test-secret";

/// In-process stand-in for the payment provider. Signs with [`GATEWAY_SECRET`].
#[derive(Default)]
pub struct FakeGateway {
    unavailable: AtomicBool,
    created: AtomicU64,
}

impl FakeGateway {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn orders_created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: String,
    ) -> Result<GatewayOrder, ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "payment gateway unreachable".to_string(),
            ));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayOrder {
            id: format!("order_test_{}", n),
            amount,
            currency: currency.to_string(),
            receipt,
        })
    }

    fn verify_signature(&self, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_payment_signature(GATEWAY_SECRET, gateway_order_id, payment_id, signature)
    }
}

/// Application state over a fresh in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // one connection keeps every query on the same in-memory database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_sender, event_rx) = EventSender::channel(256);
        let event_sender = Arc::new(event_sender);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::default());
        let services =
            AppServices::new(db_arc.clone(), event_sender.clone(), &cfg, gateway.clone());

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            router: build_router(state.clone()),
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn services(&self) -> &AppServices {
        &self.state.services
    }

    // ==================== Seeding ====================

    pub async fn seed_category(&self, offer_percent: i32, return_window_days: Option<i32>) -> category::Model {
        category::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("Category {}", &Uuid::new_v4().to_string()[..8])),
            offer_percent: Set(offer_percent),
            return_window_days: Set(return_window_days),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed category")
    }

    pub async fn seed_book(
        &self,
        category_id: Uuid,
        price: i64,
        stock: i32,
        offer_percent: i32,
    ) -> book::Model {
        let now = Utc::now();
        book::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(format!("Book {}", &Uuid::new_v4().to_string()[..8])),
            author: Set("Test Author".to_string()),
            category_id: Set(category_id),
            price: Set(price),
            stock: Set(stock),
            offer_percent: Set(offer_percent),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed book")
    }

    /// A book in a category without offers and the default return window.
    pub async fn seed_plain_book(&self, price: i64, stock: i32) -> book::Model {
        let category = self.seed_category(0, None).await;
        self.seed_book(category.id, price, stock, 0).await
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        coupon_type: CouponType,
        value: i64,
        min_order_value: i64,
        usage_limit: Option<i32>,
    ) -> coupon::Model {
        self.services()
            .coupons
            .create_coupon(NewCoupon {
                code: code.to_string(),
                description: None,
                coupon_type,
                value,
                min_order_value,
                max_discount: None,
                expiry: Utc::now() + Duration::days(30),
                usage_limit,
            })
            .await
            .expect("seed coupon")
    }

    pub async fn fund_wallet(&self, user_id: Uuid, amount: i64) -> wallet::Model {
        let ledger = &self.services().wallet;
        let txn = self.state.db.begin().await.expect("begin");
        let wallet = ledger.get_or_create(&txn, user_id).await.expect("wallet");
        ledger
            .credit(
                &txn,
                wallet.id,
                LedgerEntry::new(amount, "Top-up", format!("TOPUP-{}", Uuid::new_v4())),
            )
            .await
            .expect("credit wallet");
        txn.commit().await.expect("commit");
        self.wallet(user_id).await
    }

    pub async fn add_to_cart(&self, user_id: Uuid, book_id: Uuid, quantity: i32) {
        self.services()
            .cart
            .add_item(user_id, book_id, quantity)
            .await
            .expect("add to cart");
    }

    pub async fn place(
        &self,
        user_id: Uuid,
        payment_method: PaymentMethod,
    ) -> Result<PlacedOrder, ServiceError> {
        self.services()
            .checkout
            .place_order(
                user_id,
                PlaceOrderRequest {
                    address_id: Uuid::new_v4(),
                    shipping_address: Some("221B Baker Street".to_string()),
                    payment_method,
                },
            )
            .await
    }

    // ==================== Time travel ====================

    pub async fn backdate_order(&self, order_id: Uuid, minutes: i64) {
        let order = self.order(order_id).await;
        let mut active: order::ActiveModel = order.into();
        active.created_at = Set(Utc::now() - Duration::minutes(minutes));
        active.update(&*self.state.db).await.expect("backdate order");
    }

    pub async fn backdate_delivery(&self, order_id: Uuid, days: i64) {
        let order = self.order(order_id).await;
        let mut active: order::ActiveModel = order.into();
        active.delivered_at = Set(Some(Utc::now() - Duration::days(days)));
        active.update(&*self.state.db).await.expect("backdate delivery");
    }

    // ==================== Reads ====================

    pub async fn order(&self, order_id: Uuid) -> order::Model {
        order::Entity::find_by_id(order_id)
            .one(&*self.state.db)
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn stock_of(&self, book_id: Uuid) -> i32 {
        self.services()
            .stock
            .available(book_id)
            .await
            .expect("stock lookup")
    }

    pub async fn wallet(&self, user_id: Uuid) -> wallet::Model {
        self.services()
            .wallet
            .wallet_for_user(user_id)
            .await
            .expect("wallet lookup")
    }

    pub async fn balance(&self, user_id: Uuid) -> i64 {
        self.wallet(user_id).await.balance
    }

    // ==================== HTTP ====================

    /// Sends a request through the full router. `caller` is `(user id, role)`.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        caller: Option<(Uuid, &str)>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((user_id, role)) = caller {
            builder = builder
                .header(USER_ID_HEADER, user_id.to_string())
                .header(USER_ROLE_HEADER, role);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        self.send(builder.body(body).expect("failed to build request"))
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
