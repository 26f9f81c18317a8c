use crate::{
    db::DbPool,
    entities::{book, category},
    errors::ServiceError,
};
use async_trait::async_trait;
use sea_orm::EntityTrait;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Read-only view of a book as seen by checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookSnapshot {
    pub id: Uuid,
    pub title: String,
    pub price: i64,
    pub stock: i32,
    pub is_active: bool,
    pub category_id: Uuid,
    /// Category return window, if the category sets one
    pub return_window_days: Option<i32>,
}

/// Whole-percent offers that may apply to a book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OfferBreakdown {
    pub product_offer_percent: i32,
    pub category_offer_percent: i32,
}

/// Catalog lookups. The fulfilment core never writes catalog data other than stock.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn get_book(&self, book_id: Uuid) -> Result<Option<BookSnapshot>, ServiceError>;

    async fn offer_breakdown(
        &self,
        book_id: Uuid,
        category_id: Uuid,
    ) -> Result<OfferBreakdown, ServiceError>;
}

/// Catalog backed by the `books` and `categories` tables.
#[derive(Clone)]
pub struct DbCatalog {
    db: Arc<DbPool>,
}

impl DbCatalog {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogLookup for DbCatalog {
    async fn get_book(&self, book_id: Uuid) -> Result<Option<BookSnapshot>, ServiceError> {
        let found = book::Entity::find_by_id(book_id)
            .find_also_related(category::Entity)
            .one(&*self.db)
            .await?;

        Ok(found.map(|(book, category)| BookSnapshot {
            id: book.id,
            title: book.title,
            price: book.price,
            stock: book.stock,
            is_active: book.is_active && category.as_ref().map_or(true, |c| c.is_active),
            category_id: book.category_id,
            return_window_days: category.and_then(|c| c.return_window_days),
        }))
    }

    async fn offer_breakdown(
        &self,
        book_id: Uuid,
        category_id: Uuid,
    ) -> Result<OfferBreakdown, ServiceError> {
        let product_offer_percent = book::Entity::find_by_id(book_id)
            .one(&*self.db)
            .await?
            .map_or(0, |b| b.offer_percent);
        let category_offer_percent = category::Entity::find_by_id(category_id)
            .one(&*self.db)
            .await?
            .filter(|c| c.is_active)
            .map_or(0, |c| c.offer_percent);

        Ok(OfferBreakdown {
            product_offer_percent,
            category_offer_percent,
        })
    }
}
