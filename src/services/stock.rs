use crate::{db::DbPool, entities::book, errors::ServiceError};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Result of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevel {
    pub book_id: Uuid,
    pub previous: i32,
    pub current: i32,
}

/// Atomic increments and decrements of a book's available quantity.
///
/// Every mutation runs on the caller's connection so it commits or rolls back together with the
/// order and wallet changes it accompanies.
#[derive(Clone)]
pub struct StockReconciler {
    db: Arc<DbPool>,
}

impl StockReconciler {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Current stock for a book, read outside any transaction.
    #[instrument(skip(self))]
    pub async fn available(&self, book_id: Uuid) -> Result<i32, ServiceError> {
        book::Entity::find_by_id(book_id)
            .one(&*self.db)
            .await?
            .map(|b| b.stock)
            .ok_or_else(|| ServiceError::NotFound(format!("Book {} not found", book_id)))
    }

    async fn lock_book<C: ConnectionTrait>(
        &self,
        conn: &C,
        book_id: Uuid,
    ) -> Result<book::Model, ServiceError> {
        book::Entity::find_by_id(book_id)
            .lock_exclusive()
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Book {} not found", book_id)))
    }

    /// Removes `qty` units; fails with `InsufficientStock` when fewer are available.
    #[instrument(skip(self, conn))]
    pub async fn decrement<C: ConnectionTrait>(
        &self,
        conn: &C,
        book_id: Uuid,
        qty: i32,
    ) -> Result<StockLevel, ServiceError> {
        validate_quantity(qty)?;
        let book = self.lock_book(conn, book_id).await?;

        if book.stock < qty {
            warn!(book_id = %book_id, available = book.stock, requested = qty, "insufficient stock");
            return Err(ServiceError::InsufficientStock(format!(
                "'{}' has {} in stock, {} requested",
                book.title, book.stock, qty
            )));
        }

        // conditional update guards against a concurrent writer on backends without row locks
        let result = book::Entity::update_many()
            .col_expr(book::Column::Stock, Expr::col(book::Column::Stock).sub(qty))
            .col_expr(book::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(book::Column::Id.eq(book_id))
            .filter(book::Column::Stock.gte(qty))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::InsufficientStock(format!(
                "'{}' sold out while placing the order",
                book.title
            )));
        }

        debug!(book_id = %book_id, qty, "stock decremented");
        Ok(StockLevel {
            book_id,
            previous: book.stock,
            current: book.stock - qty,
        })
    }

    /// Returns `qty` units to stock.
    #[instrument(skip(self, conn))]
    pub async fn increment<C: ConnectionTrait>(
        &self,
        conn: &C,
        book_id: Uuid,
        qty: i32,
    ) -> Result<StockLevel, ServiceError> {
        validate_quantity(qty)?;
        let book = self.lock_book(conn, book_id).await?;
        let current = book.stock.checked_add(qty).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Restoring {} units would overflow the stock of '{}' ({})",
                qty, book.title, book.stock
            ))
        })?;

        book::Entity::update_many()
            .col_expr(book::Column::Stock, Expr::col(book::Column::Stock).add(qty))
            .col_expr(book::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(book::Column::Id.eq(book_id))
            .exec(conn)
            .await?;

        debug!(book_id = %book_id, qty, "stock restored");
        Ok(StockLevel {
            book_id,
            previous: book.stock,
            current,
        })
    }
}

fn validate_quantity(qty: i32) -> Result<(), ServiceError> {
    if qty <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "Quantity must be positive, got {}",
            qty
        )));
    }
    Ok(())
}
