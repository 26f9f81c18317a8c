//! Checkout placement: pricing, coupon attribution, payment methods and rollback.

mod common;

use assert_matches::assert_matches;
use bookstore_fulfillment::{
    entities::{
        coupon::{self, CouponType},
        order::{OrderStatus, PaymentMethod},
    },
    errors::{ErrorKind, ServiceError},
    services::{
        coupons::NewCoupon,
        orders::PaymentConfirmation,
        payment_gateway::sign_payment,
        wallet::reference,
    },
};
use chrono::{Duration, Utc};
use common::{TestApp, GATEWAY_SECRET};
use sea_orm::EntityTrait;
use uuid::Uuid;

#[tokio::test]
async fn save10_coupon_discounts_ten_percent_of_subtotal() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let book = app.seed_plain_book(600, 10).await;
    app.services()
        .coupons
        .create_coupon(NewCoupon {
            code: "SAVE10".to_string(),
            description: Some("10% off".to_string()),
            coupon_type: CouponType::Percent,
            value: 10,
            min_order_value: 100,
            max_discount: Some(200),
            expiry: Utc::now() + Duration::days(7),
            usage_limit: None,
        })
        .await
        .unwrap();

    app.add_to_cart(user, book.id, 2).await;
    let applied = app.services().coupons.apply_coupon(user, "save10").await.unwrap();
    assert_eq!(applied.code, "SAVE10");
    assert_eq!(applied.discount, 120);

    let placed = app.place(user, PaymentMethod::Cod).await.unwrap();
    let order = &placed.details.order;
    assert_eq!(order.subtotal, 1200);
    assert_eq!(order.coupon_discount, 120);
    assert_eq!(order.final_total, 1200 - order.product_discount - 120);
    assert_eq!(order.coupon_code.as_deref(), Some("SAVE10"));
    assert_eq!(order.status, OrderStatus::Placed);

    // the selection is consumed by placement
    assert!(app
        .services()
        .coupons
        .active_selection(user)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn coupon_discount_is_shared_in_proportion_to_line_totals() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let a = app.seed_plain_book(300, 5).await;
    let b = app.seed_plain_book(700, 5).await;
    app.seed_coupon("FLAT100", CouponType::Flat, 100, 0, None).await;

    app.add_to_cart(user, a.id, 1).await;
    app.add_to_cart(user, b.id, 1).await;
    app.services().coupons.apply_coupon(user, "FLAT100").await.unwrap();
    let placed = app.place(user, PaymentMethod::Cod).await.unwrap();

    let share = |book_id: Uuid| {
        placed
            .details
            .items
            .iter()
            .find(|i| i.book_id == book_id)
            .map(|i| (i.total, i.coupon_discount_share))
            .unwrap()
    };
    assert_eq!(share(a.id), (300, 30));
    assert_eq!(share(b.id), (700, 70));
    assert_eq!(placed.details.order.final_total, 900);
}

#[tokio::test]
async fn better_of_product_and_category_offer_applies_per_line() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let category = app.seed_category(10, Some(14)).await;
    let product_wins = app.seed_book(category.id, 1_000, 5, 15).await;
    let category_wins = app.seed_book(category.id, 2_000, 5, 5).await;

    app.add_to_cart(user, product_wins.id, 1).await;
    app.add_to_cart(user, category_wins.id, 1).await;
    let quote = app.services().checkout.quote(user).await.unwrap();

    assert_eq!(quote.subtotal, 3_000);
    assert_eq!(quote.product_discount, 150);
    assert_eq!(quote.category_discount, 200);
    assert_eq!(quote.final_total, 2_650);
    assert_eq!(quote.delivery_charge, app.state.config.orders.delivery_charge);
    assert!(quote.lines.iter().all(|l| l.return_window_days == 14));

    let placed = app.place(user, PaymentMethod::Cod).await.unwrap();
    assert_eq!(placed.details.order.final_total, quote.final_total);
    assert_eq!(
        placed.details.order.total_with_delivery,
        quote.final_total + quote.delivery_charge
    );
}

#[tokio::test]
async fn wallet_payment_debits_final_total_and_clears_cart() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let book = app.seed_plain_book(2_500, 4).await;
    app.fund_wallet(user, 10_000).await;

    app.add_to_cart(user, book.id, 2).await;
    let placed = app.place(user, PaymentMethod::Wallet).await.unwrap();
    let order = &placed.details.order;

    assert_eq!(order.status, OrderStatus::Placed);
    assert!(order.paid_at.is_some());
    assert_eq!(app.balance(user).await, 5_000);
    assert_eq!(app.stock_of(book.id).await, 2);
    assert!(app.services().cart.items(user).await.unwrap().is_empty());

    let debits = app
        .services()
        .wallet
        .entries_with_reference(&reference::order_payment(order.id))
        .await
        .unwrap();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].amount, 5_000);
    assert_eq!(debits[0].order_id, Some(order.id));
}

#[tokio::test]
async fn insufficient_balance_rolls_back_stock_coupon_and_cart() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let book = app.seed_plain_book(5_000, 3).await;
    let coupon = app.seed_coupon("FIFTY", CouponType::Flat, 50, 0, Some(10)).await;
    app.fund_wallet(user, 1_000).await;

    app.add_to_cart(user, book.id, 1).await;
    app.services().coupons.apply_coupon(user, "FIFTY").await.unwrap();
    let err = app.place(user, PaymentMethod::Wallet).await.unwrap_err();

    assert_matches!(
        err,
        ServiceError::InsufficientBalance {
            required: 4_950,
            available: 1_000
        }
    );
    assert_eq!(err.kind(), ErrorKind::InsufficientResource);
    assert_eq!(app.stock_of(book.id).await, 3);
    assert_eq!(app.balance(user).await, 1_000);
    assert_eq!(app.services().cart.items(user).await.unwrap().len(), 1);

    let coupon = coupon::Entity::find_by_id(coupon.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coupon.used_count, 0);
    assert!(app
        .services()
        .coupons
        .active_selection(user)
        .await
        .unwrap()
        .is_some());

    let (orders, total) = app
        .services()
        .orders
        .list_orders(Some(user), 1, 20)
        .await
        .unwrap();
    assert!(orders.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn insufficient_stock_fails_the_whole_order() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let plenty = app.seed_plain_book(1_000, 10).await;
    let scarce = app.seed_plain_book(1_000, 1).await;

    app.add_to_cart(user, plenty.id, 3).await;
    app.add_to_cart(user, scarce.id, 2).await;
    let err = app.place(user, PaymentMethod::Cod).await.unwrap_err();

    assert_matches!(err, ServiceError::InsufficientStock(_));
    assert_eq!(app.stock_of(plenty.id).await, 10);
    assert_eq!(app.stock_of(scarce.id).await, 1);
}

#[tokio::test]
async fn empty_cart_cannot_be_placed() {
    let app = TestApp::new().await;
    let err = app
        .place(Uuid::new_v4(), PaymentMethod::Cod)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn quote_reports_an_ineligible_coupon_without_side_effects() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let cheap = app.seed_plain_book(400, 5).await;
    let pricey = app.seed_plain_book(1_600, 5).await;
    app.seed_coupon("BIG", CouponType::Flat, 300, 1_500, None).await;

    app.add_to_cart(user, cheap.id, 1).await;
    app.add_to_cart(user, pricey.id, 1).await;
    app.services().coupons.apply_coupon(user, "BIG").await.unwrap();
    app.services().cart.remove_item(user, pricey.id).await.unwrap();

    let quote = app.services().checkout.quote(user).await.unwrap();
    assert!(quote.coupon.is_none());
    assert_eq!(quote.coupon_discount, 0);
    assert!(quote.coupon_error.is_some());
    assert_eq!(app.stock_of(cheap.id).await, 5);

    // placement refuses rather than silently dropping the coupon
    let err = app.place(user, PaymentMethod::Cod).await.unwrap_err();
    assert_matches!(err, ServiceError::BelowMinimum { minimum: 1_500, subtotal: 400 });
    assert_eq!(app.stock_of(cheap.id).await, 5);
}

#[tokio::test]
async fn online_order_is_paid_after_verified_confirmation() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let book = app.seed_plain_book(1_500, 2).await;

    app.add_to_cart(user, book.id, 1).await;
    let placed = app.place(user, PaymentMethod::Online).await.unwrap();
    let order_id = placed.details.order.id;
    let gateway_order = placed.gateway_order.expect("gateway order");

    assert_eq!(placed.details.order.status, OrderStatus::PaymentPending);
    assert_eq!(gateway_order.amount, 1_500);
    assert_eq!(gateway_order.receipt, order_id.to_string());
    assert_eq!(app.stock_of(book.id).await, 1);

    let confirmation = PaymentConfirmation {
        gateway_order_id: gateway_order.id.clone(),
        payment_id: "pay_001".to_string(),
        signature: sign_payment(GATEWAY_SECRET, &gateway_order.id, "pay_001"),
    };
    let paid = app
        .services()
        .orders
        .confirm_payment(user, order_id, confirmation.clone())
        .await
        .unwrap();
    assert_eq!(paid.order.status, OrderStatus::Paid);
    assert_eq!(paid.order.payment_id.as_deref(), Some("pay_001"));
    assert!(paid.order.paid_at.is_some());

    let again = app
        .services()
        .orders
        .confirm_payment(user, order_id, confirmation)
        .await
        .unwrap_err();
    assert_matches!(again, ServiceError::Conflict(_));
}

#[tokio::test]
async fn forged_signature_leaves_order_awaiting_payment() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let book = app.seed_plain_book(1_500, 2).await;

    app.add_to_cart(user, book.id, 1).await;
    let placed = app.place(user, PaymentMethod::Online).await.unwrap();
    let gateway_order = placed.gateway_order.unwrap();

    let err = app
        .services()
        .orders
        .confirm_payment(
            user,
            placed.details.order.id,
            PaymentConfirmation {
                gateway_order_id: gateway_order.id.clone(),
                payment_id: "pay_001".to_string(),
                signature: sign_payment("wrong-secret", &gateway_order.id, "pay_001"),
            },
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::PaymentVerificationFailed(_));
    assert!(err.is_retryable());
    let order = app.order(placed.details.order.id).await;
    assert_eq!(order.status, OrderStatus::PaymentPending);
    assert!(order.paid_at.is_none());
}

#[tokio::test]
async fn gateway_outage_still_places_the_order_with_a_retry_hint() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let book = app.seed_plain_book(1_500, 2).await;

    app.add_to_cart(user, book.id, 1).await;
    app.gateway.set_unavailable(true);
    let placed = app.place(user, PaymentMethod::Online).await.unwrap();
    let order_id = placed.details.order.id;

    assert!(placed.gateway_order.is_none());
    let retry = placed.payment_retry.expect("retry hint");
    assert_eq!(retry.retry_path, format!("/api/v1/orders/{}/payment/retry", order_id));
    assert_eq!(placed.details.order.status, OrderStatus::PaymentPending);
    assert!(placed.details.order.gateway_order_id.is_none());
    assert_eq!(app.stock_of(book.id).await, 1);
    assert!(app.services().cart.items(user).await.unwrap().is_empty());

    app.gateway.set_unavailable(false);
    let (order, gateway_order) = app
        .services()
        .orders
        .retry_online_payment(user, order_id)
        .await
        .unwrap();
    assert_eq!(order.gateway_order_id.as_deref(), Some(gateway_order.id.as_str()));
    assert_eq!(app.gateway.orders_created(), 1);
}

#[tokio::test]
async fn online_payment_requires_something_to_pay() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let book = app.seed_plain_book(100, 2).await;
    app.seed_coupon("FREEBIE", CouponType::Flat, 500, 0, None).await;

    app.add_to_cart(user, book.id, 1).await;
    app.services().coupons.apply_coupon(user, "FREEBIE").await.unwrap();
    let err = app.place(user, PaymentMethod::Online).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert_eq!(app.stock_of(book.id).await, 2);
}
