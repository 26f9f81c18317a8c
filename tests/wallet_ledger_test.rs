//! Wallet ledger: append-only entries, cached balance and reconciliation.

mod common;

use assert_matches::assert_matches;
use bookstore_fulfillment::{
    entities::wallet_transaction::TransactionType, errors::ServiceError,
    services::wallet::LedgerEntry,
};
use common::TestApp;
use futures::future::join_all;
use sea_orm::TransactionTrait;
use uuid::Uuid;

#[tokio::test]
async fn cached_balance_matches_ledger_after_mixed_movements() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let wallet = app.fund_wallet(user, 5_000).await;
    let ledger = &app.services().wallet;

    let txn = app.state.db.begin().await.unwrap();
    ledger
        .debit(&txn, wallet.id, LedgerEntry::new(1_200, "Order", "PAYMENT-A"))
        .await
        .unwrap();
    ledger
        .credit(&txn, wallet.id, LedgerEntry::new(300, "Refund", "REFUND-A"))
        .await
        .unwrap();
    let last = ledger
        .debit(&txn, wallet.id, LedgerEntry::new(4_100, "Order", "PAYMENT-B"))
        .await
        .unwrap();
    txn.commit().await.unwrap();

    assert_eq!(last.balance_after, 0);
    assert_eq!(app.balance(user).await, 0);

    let report = ledger.reconcile(wallet.id).await.unwrap();
    assert!(report.consistent);
    assert_eq!(report.entries, 4);
    assert_eq!(report.ledger_balance, report.cached_balance);
}

#[tokio::test]
async fn overdraft_is_rejected_without_an_entry() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let wallet = app.fund_wallet(user, 700).await;
    let ledger = &app.services().wallet;

    let txn = app.state.db.begin().await.unwrap();
    let err = ledger
        .debit(&txn, wallet.id, LedgerEntry::new(701, "Order", "PAYMENT-X"))
        .await
        .unwrap_err();
    txn.rollback().await.unwrap();

    assert_matches!(
        err,
        ServiceError::InsufficientBalance { required: 701, available: 700 }
    );
    assert_eq!(app.balance(user).await, 700);
    assert!(ledger
        .entries_with_reference("PAYMENT-X")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn non_positive_amounts_are_rejected() {
    let app = TestApp::new().await;
    let wallet = app.fund_wallet(Uuid::new_v4(), 100).await;
    let ledger = &app.services().wallet;

    let txn = app.state.db.begin().await.unwrap();
    for amount in [0, -50] {
        let err = ledger
            .credit(&txn, wallet.id, LedgerEntry::new(amount, "Bad", "BAD"))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }
    txn.rollback().await.unwrap();
}

#[tokio::test]
async fn history_is_newest_first_with_increasing_sequences() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let wallet = app.fund_wallet(user, 1_000).await;
    app.fund_wallet(user, 2_000).await;
    let ledger = &app.services().wallet;

    let txn = app.state.db.begin().await.unwrap();
    ledger
        .debit(&txn, wallet.id, LedgerEntry::new(500, "Order", "PAYMENT-H"))
        .await
        .unwrap();
    txn.commit().await.unwrap();

    let (entries, total) = ledger.history(wallet.id, 1, 2).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].sequence, 3);
    assert_eq!(entries[0].transaction_type, TransactionType::Debit);
    assert_eq!(entries[0].balance_after, 2_500);
    assert_eq!(entries[1].sequence, 2);

    let (older, _) = ledger.history(wallet.id, 2, 2).await.unwrap();
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].sequence, 1);
    assert_eq!(older[0].balance_after, 1_000);
}

#[tokio::test]
async fn concurrent_credits_serialize_on_the_wallet() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let wallet_id = app.fund_wallet(user, 100).await.id;

    let credits = (0..8).map(|n| {
        let db = app.state.db.clone();
        let ledger = app.services().wallet.clone();
        async move {
            let txn = db.begin().await?;
            ledger
                .credit(
                    &txn,
                    wallet_id,
                    LedgerEntry::new(10, "Cashback", format!("CASHBACK-{}", n)),
                )
                .await?;
            txn.commit().await?;
            Ok::<_, ServiceError>(())
        }
    });
    for result in join_all(credits).await {
        result.unwrap();
    }

    assert_eq!(app.balance(user).await, 180);
    let report = app.services().wallet.reconcile(wallet_id).await.unwrap();
    assert!(report.consistent);
    assert_eq!(report.entries, 9);
}
