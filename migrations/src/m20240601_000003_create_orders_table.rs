use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

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
                    .col(ColumnDef::new(Orders::FullName).string_len(255).not_null())
                    .col(ColumnDef::new(Orders::Phone).string_len(32).not_null())
                    .col(ColumnDef::new(Orders::Address).string_len(1024).not_null())
                    .col(
                        ColumnDef::new(Orders::PaymentMethod)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Orders::ItemsPrice).big_integer().not_null())
                    .col(
                        ColumnDef::new(Orders::TaxPrice)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Orders::ShippingPrice)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Orders::DiscountAmount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Orders::TotalPrice).big_integer().not_null())
                    .col(ColumnDef::new(Orders::CouponCode).string_len(64).null())
                    .col(
                        ColumnDef::new(Orders::IsPaid)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Orders::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::IsDelivered)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
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
                            .null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Orders {
    Table,
    Id,
    UserId,
    FullName,
    Phone,
    Address,
    PaymentMethod,
    ItemsPrice,
    TaxPrice,
    ShippingPrice,
    DiscountAmount,
    TotalPrice,
    CouponCode,
    IsPaid,
    PaidAt,
    IsDelivered,
    DeliveredAt,
    CreatedAt,
    UpdatedAt,
}
