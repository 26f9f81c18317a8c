use crate::{
    db::DbPool,
    entities::cart_item,
    errors::ServiceError,
    services::catalog::{BookSnapshot, CatalogLookup},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// A cart line joined with its current catalog data.
#[derive(Debug, Clone)]
pub struct CartLine {
    pub item: cart_item::Model,
    pub book: BookSnapshot,
}

impl CartLine {
    pub fn line_subtotal(&self) -> i64 {
        self.book.price * i64::from(self.item.quantity)
    }
}

/// Minimal cart store: the checkout reads it and placement clears it.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
    catalog: Arc<dyn CatalogLookup>,
}

impl CartService {
    pub fn new(db: Arc<DbPool>, catalog: Arc<dyn CatalogLookup>) -> Self {
        Self { db, catalog }
    }

    /// Adds `quantity` of a book, merging with an existing line.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        book_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be positive".to_string(),
            ));
        }
        let book = self
            .catalog
            .get_book(book_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Book {} not found", book_id)))?;
        if !book.is_active {
            return Err(ServiceError::ValidationError(format!(
                "'{}' is not available",
                book.title
            )));
        }

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::BookId.eq(book_id))
            .one(&*self.db)
            .await?;

        let saved = match existing {
            Some(line) => {
                let quantity = line.quantity + quantity;
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(quantity);
                active.update(&*self.db).await?
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    book_id: Set(book_id),
                    quantity: Set(quantity),
                    created_at: Set(Utc::now()),
                }
                .insert(&*self.db)
                .await?
            }
        };

        info!(user_id = %user_id, book_id = %book_id, quantity = saved.quantity, "cart updated");
        Ok(saved)
    }

    pub async fn remove_item(&self, user_id: Uuid, book_id: Uuid) -> Result<bool, ServiceError> {
        let res = cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::BookId.eq(book_id))
            .exec(&*self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    pub async fn items(&self, user_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError> {
        Ok(cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Cart lines with catalog data; books that no longer exist are reported as `NotFound`.
    #[instrument(skip(self))]
    pub async fn lines(&self, user_id: Uuid) -> Result<Vec<CartLine>, ServiceError> {
        let mut lines = Vec::new();
        for item in self.items(user_id).await? {
            let book = self.catalog.get_book(item.book_id).await?.ok_or_else(|| {
                ServiceError::NotFound(format!("Book {} in cart no longer exists", item.book_id))
            })?;
            lines.push(CartLine { item, book });
        }
        Ok(lines)
    }

    /// Gross cart value before any offer or coupon.
    pub async fn subtotal(&self, user_id: Uuid) -> Result<i64, ServiceError> {
        Ok(self
            .lines(user_id)
            .await?
            .iter()
            .map(CartLine::line_subtotal)
            .sum())
    }

    /// Empties the cart inside the caller's transaction.
    pub async fn clear<C: ConnectionTrait>(&self, conn: &C, user_id: Uuid) -> Result<u64, ServiceError> {
        let res = cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(conn)
            .await?;
        Ok(res.rows_affected)
    }
}
