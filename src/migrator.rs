use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_catalog_tables::Migration),
            Box::new(m20240101_000002_create_orders_tables::Migration),
            Box::new(m20240101_000003_create_wallet_tables::Migration),
            Box::new(m20240101_000004_create_coupon_tables::Migration),
        ]
    }
}

mod m20240101_000001_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Categories::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Categories::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Categories::Name).string().not_null())
                        .col(
                            ColumnDef::new(Categories::OfferPercent)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Categories::ReturnWindowDays).integer().null())
                        .col(
                            ColumnDef::new(Categories::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Categories::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Books::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Books::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Books::Title).string().not_null())
                        .col(ColumnDef::new(Books::Author).string().not_null())
                        .col(ColumnDef::new(Books::CategoryId).uuid().not_null())
                        .col(ColumnDef::new(Books::Price).big_integer().not_null())
                        .col(ColumnDef::new(Books::Stock).integer().not_null().default(0))
                        .col(
                            ColumnDef::new(Books::OfferPercent)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Books::IsActive).boolean().not_null().default(true))
                        .col(
                            ColumnDef::new(Books::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Books::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_books_category_id")
                                .from(Books::Table, Books::CategoryId)
                                .to(Categories::Table, Categories::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_books_category_id")
                        .table(Books::Table)
                        .col(Books::CategoryId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CartItems::UserId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::BookId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(CartItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_book_id")
                                .from(CartItems::Table, CartItems::BookId)
                                .to(Books::Table, Books::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_items_user_book")
                        .table(CartItems::Table)
                        .col(CartItems::UserId)
                        .col(CartItems::BookId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Books::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Categories::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Categories {
        Table,
        Id,
        Name,
        OfferPercent,
        ReturnWindowDays,
        IsActive,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Books {
        Table,
        Id,
        Title,
        Author,
        CategoryId,
        Price,
        Stock,
        OfferPercent,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        Id,
        UserId,
        BookId,
        Quantity,
        CreatedAt,
    }
}

mod m20240101_000002_create_orders_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_orders_tables"
        }
    }

    fn money(col: Orders) -> ColumnDef {
        ColumnDef::new(col).big_integer().not_null().default(0).to_owned()
    }

    fn item_money(col: OrderItems) -> ColumnDef {
        ColumnDef::new(col).big_integer().not_null().default(0).to_owned()
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::AddressId).uuid().not_null())
                        .col(ColumnDef::new(Orders::ShippingAddress).text().null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string_len(16).not_null())
                        .col(&mut money(Orders::Subtotal))
                        .col(&mut money(Orders::ProductDiscount))
                        .col(&mut money(Orders::CategoryDiscount))
                        .col(&mut money(Orders::CouponDiscount))
                        .col(ColumnDef::new(Orders::CouponCode).string().null())
                        .col(ColumnDef::new(Orders::CouponId).uuid().null())
                        .col(&mut money(Orders::DeliveryCharge))
                        .col(&mut money(Orders::FinalTotal))
                        .col(&mut money(Orders::TotalWithDelivery))
                        .col(ColumnDef::new(Orders::RefundStatus).string_len(32).null())
                        .col(&mut money(Orders::RefundAmount))
                        .col(
                            ColumnDef::new(Orders::RefundedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::CancellationReason).text().null())
                        .col(ColumnDef::new(Orders::ReturnReason).text().null())
                        .col(ColumnDef::new(Orders::RejectionReason).text().null())
                        .col(
                            ColumnDef::new(Orders::HasPendingItemCancellations)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::HasPendingItemReturns)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Orders::GatewayOrderId).string().null())
                        .col(ColumnDef::new(Orders::PaymentId).string().null())
                        .col(ColumnDef::new(Orders::PaidAt).timestamp_with_time_zone().null())
                        .col(
                            ColumnDef::new(Orders::DeliveredAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OrderItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::BookId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::CategoryId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Title).string().not_null())
                        .col(&mut item_money(OrderItems::UnitPrice))
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(&mut item_money(OrderItems::ProductDiscount))
                        .col(&mut item_money(OrderItems::CategoryDiscount))
                        .col(&mut item_money(OrderItems::CouponDiscountShare))
                        .col(&mut item_money(OrderItems::Total))
                        .col(
                            ColumnDef::new(OrderItems::ReturnWindowDays)
                                .integer()
                                .not_null()
                                .default(7),
                        )
                        .col(
                            ColumnDef::new(OrderItems::CancellationRequested)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(OrderItems::CancellationStatus)
                                .string_len(20)
                                .null(),
                        )
                        .col(ColumnDef::new(OrderItems::CancellationReason).text().null())
                        .col(
                            ColumnDef::new(OrderItems::ReturnRequested)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(OrderItems::ReturnStatus).string_len(20).null())
                        .col(ColumnDef::new(OrderItems::ReturnReason).text().null())
                        .col(ColumnDef::new(OrderItems::RejectionReason).text().null())
                        .col(ColumnDef::new(OrderItems::RefundStatus).string_len(32).null())
                        .col(&mut item_money(OrderItems::RefundAmount))
                        .col(
                            ColumnDef::new(OrderItems::RefundedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::StockRestored)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(OrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden, Clone, Copy)]
    enum Orders {
        Table,
        Id,
        UserId,
        AddressId,
        ShippingAddress,
        Status,
        PaymentMethod,
        Subtotal,
        ProductDiscount,
        CategoryDiscount,
        CouponDiscount,
        CouponCode,
        CouponId,
        DeliveryCharge,
        FinalTotal,
        TotalWithDelivery,
        RefundStatus,
        RefundAmount,
        RefundedAt,
        CancellationReason,
        ReturnReason,
        RejectionReason,
        HasPendingItemCancellations,
        HasPendingItemReturns,
        GatewayOrderId,
        PaymentId,
        PaidAt,
        DeliveredAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden, Clone, Copy)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        BookId,
        CategoryId,
        Title,
        UnitPrice,
        Quantity,
        ProductDiscount,
        CategoryDiscount,
        CouponDiscountShare,
        Total,
        ReturnWindowDays,
        CancellationRequested,
        CancellationStatus,
        CancellationReason,
        ReturnRequested,
        ReturnStatus,
        ReturnReason,
        RejectionReason,
        RefundStatus,
        RefundAmount,
        RefundedAt,
        StockRestored,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_wallet_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_wallet_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Wallets::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Wallets::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Wallets::UserId).uuid().not_null().unique_key())
                        .col(
                            ColumnDef::new(Wallets::Balance)
                                .big_integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(Wallets::Balance).gte(0)),
                        )
                        .col(ColumnDef::new(Wallets::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(Wallets::LastSequence)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Wallets::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Wallets::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(WalletTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WalletTransactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WalletTransactions::WalletId).uuid().not_null())
                        .col(
                            ColumnDef::new(WalletTransactions::Sequence)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WalletTransactions::Amount)
                                .big_integer()
                                .not_null()
                                .check(Expr::col(WalletTransactions::Amount).gt(0)),
                        )
                        .col(
                            ColumnDef::new(WalletTransactions::TransactionType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(WalletTransactions::Description).string().not_null())
                        .col(ColumnDef::new(WalletTransactions::OrderId).uuid().null())
                        .col(ColumnDef::new(WalletTransactions::Reference).string().not_null())
                        .col(
                            ColumnDef::new(WalletTransactions::Status)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WalletTransactions::BalanceAfter)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WalletTransactions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_wallet_transactions_wallet_id")
                                .from(WalletTransactions::Table, WalletTransactions::WalletId)
                                .to(Wallets::Table, Wallets::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_wallet_transactions_wallet_sequence")
                        .table(WalletTransactions::Table)
                        .col(WalletTransactions::WalletId)
                        .col(WalletTransactions::Sequence)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_wallet_transactions_reference")
                        .table(WalletTransactions::Table)
                        .col(WalletTransactions::Reference)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WalletTransactions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Wallets::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Wallets {
        Table,
        Id,
        UserId,
        Balance,
        Currency,
        LastSequence,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum WalletTransactions {
        Table,
        Id,
        WalletId,
        Sequence,
        Amount,
        TransactionType,
        Description,
        OrderId,
        Reference,
        Status,
        BalanceAfter,
        CreatedAt,
    }
}

mod m20240101_000004_create_coupon_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_coupon_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Coupons::Code).string_len(64).not_null().unique_key())
                        .col(ColumnDef::new(Coupons::Description).string().null())
                        .col(ColumnDef::new(Coupons::CouponType).string_len(16).not_null())
                        .col(ColumnDef::new(Coupons::Value).big_integer().not_null())
                        .col(
                            ColumnDef::new(Coupons::MinOrderValue)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Coupons::MaxDiscount).big_integer().null())
                        .col(
                            ColumnDef::new(Coupons::Expiry)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Coupons::UsageLimit).integer().null())
                        .col(ColumnDef::new(Coupons::UsedCount).integer().not_null().default(0))
                        .col(ColumnDef::new(Coupons::IsActive).boolean().not_null().default(true))
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(UserCoupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(UserCoupons::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(UserCoupons::UserId).uuid().not_null())
                        .col(ColumnDef::new(UserCoupons::CouponId).uuid().not_null())
                        .col(ColumnDef::new(UserCoupons::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(UserCoupons::UsedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_user_coupons_coupon_id")
                                .from(UserCoupons::Table, UserCoupons::CouponId)
                                .to(Coupons::Table, Coupons::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_user_coupons_user_coupon")
                        .table(UserCoupons::Table)
                        .col(UserCoupons::UserId)
                        .col(UserCoupons::CouponId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ActiveCoupons::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ActiveCoupons::UserId)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ActiveCoupons::CouponId).uuid().not_null())
                        .col(
                            ColumnDef::new(ActiveCoupons::AppliedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_active_coupons_coupon_id")
                                .from(ActiveCoupons::Table, ActiveCoupons::CouponId)
                                .to(Coupons::Table, Coupons::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ActiveCoupons::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(UserCoupons::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Coupons {
        Table,
        Id,
        Code,
        Description,
        CouponType,
        Value,
        MinOrderValue,
        MaxDiscount,
        Expiry,
        UsageLimit,
        UsedCount,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum UserCoupons {
        Table,
        Id,
        UserId,
        CouponId,
        OrderId,
        UsedAt,
    }

    #[derive(DeriveIden)]
    enum ActiveCoupons {
        Table,
        UserId,
        CouponId,
        AppliedAt,
    }
}
