use crate::{
    db::DbPool,
    entities::{
        wallet,
        wallet_transaction::{self, TransactionStatus, TransactionType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
};
use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Audit references written on ledger entries.
pub mod reference {
    use uuid::Uuid;

    pub fn order_payment(order_id: Uuid) -> String {
        format!("PAYMENT-ORDER-{}", order_id)
    }

    pub fn order_refund(order_id: Uuid) -> String {
        format!("REFUND-ORDER-{}", order_id)
    }

    pub fn item_refund(order_id: Uuid, item_id: Uuid) -> String {
        format!("REFUND-ORDER-{}-ITEM-{}", order_id, item_id)
    }

    pub fn return_refund(order_id: Uuid) -> String {
        format!("RETURN-REFUND-ORDER-{}", order_id)
    }
}

/// A single ledger movement requested by a caller.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub amount: i64,
    pub description: String,
    pub order_id: Option<Uuid>,
    pub reference: String,
}

impl LedgerEntry {
    pub fn new(amount: i64, description: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            amount,
            description: description.into(),
            order_id: None,
            reference: reference.into(),
        }
    }

    pub fn for_order(mut self, order_id: Uuid) -> Self {
        self.order_id = Some(order_id);
        self
    }
}

/// Outcome of comparing the cached balance against the ledger.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Reconciliation {
    pub wallet_id: Uuid,
    pub cached_balance: i64,
    pub ledger_balance: i64,
    pub entries: u64,
    pub consistent: bool,
}

/// Per-user balance plus an append-only transaction log.
///
/// `credit` and `debit` take the caller's connection; the balance row is locked, the entry is
/// appended with the next sequence number and the cached balance is moved, all in that
/// connection's transaction.
#[derive(Clone)]
pub struct WalletLedger {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    currency: String,
}

impl WalletLedger {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, currency: String) -> Self {
        Self {
            db,
            event_sender,
            currency,
        }
    }

    /// Returns the user's wallet, creating an empty one on first use.
    #[instrument(skip(self, conn))]
    pub async fn get_or_create<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<wallet::Model, ServiceError> {
        if let Some(existing) = wallet::Entity::find()
            .filter(wallet::Column::UserId.eq(user_id))
            .one(conn)
            .await?
        {
            return Ok(existing);
        }

        let now = Utc::now();
        let fresh = wallet::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            balance: Set(0),
            currency: Set(self.currency.clone()),
            last_sequence: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // a concurrent first use may have created it already
        wallet::Entity::insert(fresh)
            .on_conflict(
                OnConflict::column(wallet::Column::UserId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        wallet::Entity::find()
            .filter(wallet::Column::UserId.eq(user_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::InternalError(format!("wallet for {} vanished", user_id)))
    }

    async fn lock_wallet<C: ConnectionTrait>(
        &self,
        conn: &C,
        wallet_id: Uuid,
    ) -> Result<wallet::Model, ServiceError> {
        wallet::Entity::find_by_id(wallet_id)
            .lock_exclusive()
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Wallet {} not found", wallet_id)))
    }

    /// Adds `entry.amount` to the wallet. Fails only for non-positive amounts.
    #[instrument(skip(self, conn), fields(reference = %entry.reference))]
    pub async fn credit<C: ConnectionTrait>(
        &self,
        conn: &C,
        wallet_id: Uuid,
        entry: LedgerEntry,
    ) -> Result<wallet_transaction::Model, ServiceError> {
        self.append(conn, wallet_id, TransactionType::Credit, entry)
            .await
    }

    /// Removes `entry.amount` from the wallet; fails with `InsufficientBalance` when the balance
    /// would go negative.
    #[instrument(skip(self, conn), fields(reference = %entry.reference))]
    pub async fn debit<C: ConnectionTrait>(
        &self,
        conn: &C,
        wallet_id: Uuid,
        entry: LedgerEntry,
    ) -> Result<wallet_transaction::Model, ServiceError> {
        self.append(conn, wallet_id, TransactionType::Debit, entry)
            .await
    }

    async fn append<C: ConnectionTrait>(
        &self,
        conn: &C,
        wallet_id: Uuid,
        kind: TransactionType,
        entry: LedgerEntry,
    ) -> Result<wallet_transaction::Model, ServiceError> {
        if entry.amount <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Wallet amount must be positive, got {}",
                entry.amount
            )));
        }

        let wallet = self.lock_wallet(conn, wallet_id).await?;
        let new_balance = match kind {
            TransactionType::Credit => wallet.balance.checked_add(entry.amount).ok_or_else(|| {
                ServiceError::ValidationError("Wallet balance overflow".to_string())
            })?,
            TransactionType::Debit => {
                if entry.amount > wallet.balance {
                    warn!(
                        wallet_id = %wallet_id,
                        required = entry.amount,
                        available = wallet.balance,
                        "insufficient wallet balance"
                    );
                    return Err(ServiceError::InsufficientBalance {
                        required: entry.amount,
                        available: wallet.balance,
                    });
                }
                wallet.balance - entry.amount
            }
        };

        let now = Utc::now();
        let sequence = wallet.last_sequence + 1;
        let txn_row = wallet_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            wallet_id: Set(wallet_id),
            sequence: Set(sequence),
            amount: Set(entry.amount),
            transaction_type: Set(kind),
            description: Set(entry.description),
            order_id: Set(entry.order_id),
            reference: Set(entry.reference),
            status: Set(TransactionStatus::Completed),
            balance_after: Set(new_balance),
            created_at: Set(now),
        }
        .insert(conn)
        .await?;

        let mut active: wallet::ActiveModel = wallet.into();
        active.balance = Set(new_balance);
        active.last_sequence = Set(sequence);
        active.updated_at = Set(now);
        active.update(conn).await?;

        if kind == TransactionType::Debit {
            metrics::WALLET_DEBITS.inc();
        }
        info!(
            wallet_id = %wallet_id,
            sequence,
            amount = txn_row.amount,
            kind = ?kind,
            balance = new_balance,
            "wallet ledger entry appended"
        );
        Ok(txn_row)
    }

    /// Publishes the event for an entry once the surrounding transaction has committed.
    pub async fn publish(&self, entry: &wallet_transaction::Model) {
        let event = match entry.transaction_type {
            TransactionType::Credit => Event::WalletCredited {
                wallet_id: entry.wallet_id,
                amount: entry.amount,
                reference: entry.reference.clone(),
            },
            TransactionType::Debit => Event::WalletDebited {
                wallet_id: entry.wallet_id,
                amount: entry.amount,
                reference: entry.reference.clone(),
            },
        };
        self.event_sender.send_or_log(event).await;
    }

    /// The user's wallet, created on first access.
    #[instrument(skip(self))]
    pub async fn wallet_for_user(&self, user_id: Uuid) -> Result<wallet::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let wallet = self.get_or_create(&txn, user_id).await?;
        txn.commit().await?;
        Ok(wallet)
    }

    /// Ledger entries newest first.
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        wallet_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<wallet_transaction::Model>, u64), ServiceError> {
        let paginator = wallet_transaction::Entity::find()
            .filter(wallet_transaction::Column::WalletId.eq(wallet_id))
            .order_by_desc(wallet_transaction::Column::Sequence)
            .paginate(&*self.db, limit.max(1));

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    /// Entries carrying the given reference.
    pub async fn entries_with_reference(
        &self,
        reference: &str,
    ) -> Result<Vec<wallet_transaction::Model>, ServiceError> {
        Ok(wallet_transaction::Entity::find()
            .filter(wallet_transaction::Column::Reference.eq(reference))
            .order_by_asc(wallet_transaction::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Recomputes the balance from the ledger and compares it with the cached value.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, wallet_id: Uuid) -> Result<Reconciliation, ServiceError> {
        let wallet = wallet::Entity::find_by_id(wallet_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Wallet {} not found", wallet_id)))?;

        let entries = wallet_transaction::Entity::find()
            .filter(wallet_transaction::Column::WalletId.eq(wallet_id))
            .order_by_asc(wallet_transaction::Column::Sequence)
            .all(&*self.db)
            .await?;

        let ledger_balance: i64 = entries.iter().map(|e| e.signed_amount()).sum();
        let sequences_contiguous = entries
            .iter()
            .enumerate()
            .all(|(idx, e)| e.sequence == idx as i64 + 1);
        let consistent = ledger_balance == wallet.balance
            && sequences_contiguous
            && wallet.last_sequence == entries.len() as i64;

        if !consistent {
            error!(
                wallet_id = %wallet_id,
                cached = wallet.balance,
                ledger = ledger_balance,
                "wallet balance does not match ledger"
            );
        }

        Ok(Reconciliation {
            wallet_id,
            cached_balance: wallet.balance,
            ledger_balance,
            entries: entries.len() as u64,
            consistent,
        })
    }
}
