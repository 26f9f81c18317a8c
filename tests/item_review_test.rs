//! Item-level cancellation and return requests and their admin review.

mod common;

use assert_matches::assert_matches;
use bookstore_fulfillment::{
    entities::{
        order::{OrderStatus, PaymentMethod, RefundStatus},
        order_item::{ItemCancellationStatus, ItemReturnStatus},
    },
    errors::ServiceError,
    services::{orders::ReviewAction, wallet::reference},
};
use common::TestApp;
use uuid::Uuid;

struct TwoBookOrder {
    user: Uuid,
    order_id: Uuid,
    first: (Uuid, Uuid),
    second: (Uuid, Uuid),
}

/// Wallet-paid order of two books (1_000 and 3_000) in a category with the given return window.
async fn two_book_order(app: &TestApp, return_window_days: Option<i32>) -> TwoBookOrder {
    let user = Uuid::new_v4();
    let category = app.seed_category(0, return_window_days).await;
    let first = app.seed_book(category.id, 1_000, 4, 0).await;
    let second = app.seed_book(category.id, 3_000, 4, 0).await;
    app.fund_wallet(user, 4_000).await;

    app.add_to_cart(user, first.id, 1).await;
    app.add_to_cart(user, second.id, 1).await;
    let placed = app.place(user, PaymentMethod::Wallet).await.unwrap();
    let item_for = |book_id: Uuid| {
        placed
            .details
            .items
            .iter()
            .find(|i| i.book_id == book_id)
            .map(|i| i.id)
            .unwrap()
    };

    TwoBookOrder {
        user,
        order_id: placed.details.order.id,
        first: (first.id, item_for(first.id)),
        second: (second.id, item_for(second.id)),
    }
}

#[tokio::test]
async fn approved_item_cancellation_refunds_and_clears_pending_flag() {
    let app = TestApp::new().await;
    let o = two_book_order(&app, None).await;
    app.backdate_order(o.order_id, 45).await;
    let orders = &app.services().orders;

    let err = orders
        .cancel_order_item(o.user, o.order_id, o.first.1, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotCancellable { .. });

    let err = orders
        .request_item_cancellation(o.user, o.order_id, o.first.1, Some("  ".into()))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let requested = orders
        .request_item_cancellation(o.user, o.order_id, o.first.1, Some("ordered twice".into()))
        .await
        .unwrap();
    assert!(requested.order.has_pending_item_cancellations);
    let item = requested.item(o.first.1).unwrap();
    assert!(item.cancellation_requested);
    assert_eq!(item.cancellation_status, Some(ItemCancellationStatus::Pending));
    assert_eq!(app.stock_of(o.first.0).await, 3);
    assert_eq!(app.balance(o.user).await, 0);

    let approved = orders
        .review_item_cancellation(o.order_id, o.first.1, ReviewAction::Approve, None)
        .await
        .unwrap();
    let item = approved.item(o.first.1).unwrap();
    assert_eq!(item.cancellation_status, Some(ItemCancellationStatus::Approved));
    assert_eq!(item.refund_status, Some(RefundStatus::Completed));
    assert_eq!(item.refund_amount, 1_000);
    assert!(!approved.order.has_pending_item_cancellations);
    assert_eq!(approved.order.final_total, 3_000);
    assert_eq!(approved.order.status, OrderStatus::Placed);
    assert_eq!(app.stock_of(o.first.0).await, 4);
    assert_eq!(app.balance(o.user).await, 1_000);

    let err = orders
        .review_item_cancellation(o.order_id, o.first.1, ReviewAction::Approve, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    let credits = app
        .services()
        .wallet
        .entries_with_reference(&reference::item_refund(o.order_id, o.first.1))
        .await
        .unwrap();
    assert_eq!(credits.len(), 1);
}

#[tokio::test]
async fn rejected_item_cancellation_needs_reason_and_moves_no_money() {
    let app = TestApp::new().await;
    let o = two_book_order(&app, None).await;
    let orders = &app.services().orders;

    orders
        .request_item_cancellation(o.user, o.order_id, o.second.1, Some("found it cheaper".into()))
        .await
        .unwrap();

    let err = orders
        .review_item_cancellation(o.order_id, o.second.1, ReviewAction::Reject, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let rejected = orders
        .review_item_cancellation(
            o.order_id,
            o.second.1,
            ReviewAction::Reject,
            Some("already packed".into()),
        )
        .await
        .unwrap();
    let item = rejected.item(o.second.1).unwrap();
    assert_eq!(item.cancellation_status, Some(ItemCancellationStatus::Rejected));
    assert_eq!(item.rejection_reason.as_deref(), Some("already packed"));
    assert!(!rejected.order.has_pending_item_cancellations);
    assert_eq!(rejected.order.final_total, 4_000);
    assert_eq!(app.stock_of(o.second.0).await, 3);
    assert_eq!(app.balance(o.user).await, 0);

    // a decided cancellation cannot be requested again
    let err = orders
        .request_item_cancellation(o.user, o.order_id, o.second.1, Some("please".into()))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn approving_every_item_cancellation_cancels_the_order() {
    let app = TestApp::new().await;
    let o = two_book_order(&app, None).await;
    let orders = &app.services().orders;

    for item_id in [o.first.1, o.second.1] {
        orders
            .request_item_cancellation(o.user, o.order_id, item_id, Some("not needed".into()))
            .await
            .unwrap();
    }
    orders
        .review_item_cancellation(o.order_id, o.first.1, ReviewAction::Approve, None)
        .await
        .unwrap();
    let last = orders
        .review_item_cancellation(o.order_id, o.second.1, ReviewAction::Approve, None)
        .await
        .unwrap();

    assert_eq!(last.order.status, OrderStatus::Cancelled);
    assert_eq!(last.order.final_total, 0);
    assert_eq!(last.order.refund_amount, 4_000);
    assert_eq!(app.balance(o.user).await, 4_000);
    assert_eq!(app.stock_of(o.first.0).await, 4);
    assert_eq!(app.stock_of(o.second.0).await, 4);
}

#[tokio::test]
async fn item_returns_settle_and_complete_the_order() {
    let app = TestApp::new().await;
    let o = two_book_order(&app, Some(10)).await;
    let orders = &app.services().orders;

    let err = orders
        .request_item_return(o.user, o.order_id, o.first.1, Some("torn page".into()))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    orders
        .advance_status(o.order_id, OrderStatus::Delivered)
        .await
        .unwrap();
    app.backdate_delivery(o.order_id, 9).await;

    for item_id in [o.first.1, o.second.1] {
        let requested = orders
            .request_item_return(o.user, o.order_id, item_id, Some("torn page".into()))
            .await
            .unwrap();
        assert!(requested.order.has_pending_item_returns);
    }

    // whole-order return waits for pending item reviews
    let err = orders
        .return_order(o.user, o.order_id, Some("everything".into()))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let first = orders
        .review_item_return(o.order_id, o.first.1, ReviewAction::Approve, None)
        .await
        .unwrap();
    assert_eq!(first.order.status, OrderStatus::Delivered);
    assert!(first.order.has_pending_item_returns);
    assert_eq!(
        first.item(o.first.1).unwrap().return_status,
        Some(ItemReturnStatus::Approved)
    );

    let second = orders
        .review_item_return(o.order_id, o.second.1, ReviewAction::Approve, None)
        .await
        .unwrap();
    assert_eq!(second.order.status, OrderStatus::ReturnCompleted);
    assert!(!second.order.has_pending_item_returns);
    assert_eq!(second.order.refund_status, Some(RefundStatus::Completed));
    assert_eq!(app.balance(o.user).await, 4_000);
    assert_eq!(app.stock_of(o.first.0).await, 4);
    assert_eq!(app.stock_of(o.second.0).await, 4);
}

#[tokio::test]
async fn item_return_respects_category_window() {
    let app = TestApp::new().await;
    let o = two_book_order(&app, Some(3)).await;
    let orders = &app.services().orders;

    orders
        .advance_status(o.order_id, OrderStatus::Delivered)
        .await
        .unwrap();
    app.backdate_delivery(o.order_id, 4).await;

    let err = orders
        .request_item_return(o.user, o.order_id, o.first.1, Some("late".into()))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    assert!(!app.order(o.order_id).await.has_pending_item_returns);
}

#[tokio::test]
async fn rejected_item_return_keeps_order_delivered() {
    let app = TestApp::new().await;
    let o = two_book_order(&app, None).await;
    let orders = &app.services().orders;

    orders
        .advance_status(o.order_id, OrderStatus::Delivered)
        .await
        .unwrap();
    orders
        .request_item_return(o.user, o.order_id, o.second.1, Some("not as described".into()))
        .await
        .unwrap();

    let rejected = orders
        .review_item_return(
            o.order_id,
            o.second.1,
            ReviewAction::Reject,
            Some("matches the listing".into()),
        )
        .await
        .unwrap();
    assert_eq!(rejected.order.status, OrderStatus::Delivered);
    assert!(!rejected.order.has_pending_item_returns);
    assert_eq!(
        rejected.item(o.second.1).unwrap().return_status,
        Some(ItemReturnStatus::Rejected)
    );
    assert_eq!(app.balance(o.user).await, 0);

    let err = orders
        .request_item_return(o.user, o.order_id, o.second.1, Some("again".into()))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn pending_item_cancellation_blocks_delivery() {
    let app = TestApp::new().await;
    let o = two_book_order(&app, None).await;
    let orders = &app.services().orders;

    orders
        .request_item_cancellation(o.user, o.order_id, o.first.1, Some("gift fell through".into()))
        .await
        .unwrap();

    let err = orders
        .advance_status(o.order_id, OrderStatus::Delivered)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    let order = app.order(o.order_id).await;
    assert_eq!(order.status, OrderStatus::Placed);
    assert!(order.delivered_at.is_none());
    assert!(order.has_pending_item_cancellations);

    orders
        .review_item_cancellation(
            o.order_id,
            o.first.1,
            ReviewAction::Reject,
            Some("already shipped".into()),
        )
        .await
        .unwrap();
    orders
        .advance_status(o.order_id, OrderStatus::Delivered)
        .await
        .unwrap();

    // a rejected cancellation does not stand in the way of a later return
    orders
        .return_order(o.user, o.order_id, Some("both damaged".into()))
        .await
        .unwrap();
    let returned = orders.approve_order_return(o.order_id).await.unwrap();
    assert_eq!(returned.order.status, OrderStatus::ReturnCompleted);
    for item in &returned.items {
        assert_eq!(item.return_status, Some(ItemReturnStatus::Approved));
        assert_ne!(item.cancellation_status, Some(ItemCancellationStatus::Approved));
        assert_ne!(item.cancellation_status, Some(ItemCancellationStatus::Cancelled));
    }
    assert_eq!(app.balance(o.user).await, 4_000);
    assert_eq!(app.stock_of(o.first.0).await, 4);
    assert_eq!(app.stock_of(o.second.0).await, 4);
}

#[tokio::test]
async fn whole_cancellation_resolves_pending_item_requests() {
    let app = TestApp::new().await;
    let o = two_book_order(&app, None).await;
    let orders = &app.services().orders;

    orders
        .request_item_cancellation(o.user, o.order_id, o.first.1, Some("wrong edition".into()))
        .await
        .unwrap();

    let cancelled = orders
        .cancel_order(o.user, o.order_id, Some("changed my mind".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert!(!cancelled.order.has_pending_item_cancellations);
    for item in &cancelled.items {
        assert_eq!(item.cancellation_status, Some(ItemCancellationStatus::Cancelled));
        assert!(item.return_status.is_none());
    }
    assert_eq!(app.balance(o.user).await, 4_000);

    // the pending request was settled by the whole cancellation
    let err = orders
        .review_item_cancellation(o.order_id, o.first.1, ReviewAction::Approve, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    assert_eq!(app.balance(o.user).await, 4_000);
}

#[tokio::test]
async fn whole_return_refuses_items_whose_return_was_rejected() {
    let app = TestApp::new().await;
    let o = two_book_order(&app, None).await;
    let orders = &app.services().orders;

    orders
        .advance_status(o.order_id, OrderStatus::Delivered)
        .await
        .unwrap();
    orders
        .request_item_return(o.user, o.order_id, o.second.1, Some("cover creased".into()))
        .await
        .unwrap();
    orders
        .review_item_return(
            o.order_id,
            o.second.1,
            ReviewAction::Reject,
            Some("within tolerance".into()),
        )
        .await
        .unwrap();

    let err = orders
        .return_order(o.user, o.order_id, Some("return everything".into()))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
    let order = app.order(o.order_id).await;
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(order.refund_amount, 0);
    assert_eq!(app.balance(o.user).await, 0);
    assert_eq!(app.stock_of(o.first.0).await, 3);
    assert_eq!(app.stock_of(o.second.0).await, 3);

    // the untouched item can still go back on its own
    let requested = orders
        .request_item_return(o.user, o.order_id, o.first.1, Some("duplicate".into()))
        .await
        .unwrap();
    assert!(requested.order.has_pending_item_returns);
}
