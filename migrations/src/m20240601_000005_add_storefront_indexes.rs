use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Customer order history, newest first
        manager
            .create_index(
                Index::create()
                    .name("idx_orders_user_created")
                    .table(Orders::Table)
                    .col(Orders::UserId)
                    .col((Orders::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        // Admin listing sorted by creation date
        manager
            .create_index(
                Index::create()
                    .name("idx_orders_created_at")
                    .table(Orders::Table)
                    .col((Orders::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        // Foreign key index for order lines
        manager
            .create_index(
                Index::create()
                    .name("idx_order_items_order_id")
                    .table(OrderItems::Table)
                    .col(OrderItems::OrderId)
                    .to_owned(),
            )
            .await?;

        // Available-coupon listing filters on expiry
        manager
            .create_index(
                Index::create()
                    .name("idx_coupons_expiry_date")
                    .table(Coupons::Table)
                    .col(Coupons::ExpiryDate)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_coupons_expiry_date").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_order_items_order_id").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_orders_created_at").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_orders_user_created").to_owned())
            .await?;

        Ok(())
    }
}

#[derive(Iden)]
enum Orders {
    Table,
    UserId,
    CreatedAt,
}

#[derive(Iden)]
enum OrderItems {
    Table,
    OrderId,
}

#[derive(Iden)]
enum Coupons {
    Table,
    ExpiryDate,
}
