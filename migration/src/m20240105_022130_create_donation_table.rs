use entity::donation;
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(donation::Entity)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(donation::Column::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(donation::Column::UserId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(donation::Column::ProductId).integer().null())
                    .col(
                        ColumnDef::new(donation::Column::BuyerName)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(donation::Column::BuyerEmail)
                            .string_len(255)
                            .not_null()
                            .default("".to_owned()),
                    )
                    .col(
                        ColumnDef::new(donation::Column::Amount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(donation::Column::Quantity)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(donation::Column::Message)
                            .text()
                            .not_null()
                            .default("".to_owned()),
                    )
                    .col(ColumnDef::new(donation::Column::PaymentId).string_len(32).null())
                    .col(
                        ColumnDef::new(donation::Column::PaymentStatus)
                            .string_len(16)
                            .not_null()
                            .default("pending".to_owned()),
                    )
                    .col(
                        ColumnDef::new(donation::Column::PaymentMethod)
                            .string_len(16)
                            .not_null()
                            .default("qris".to_owned()),
                    )
                    .col(
                        ColumnDef::new(donation::Column::PlatformTradeNo)
                            .string_len(64)
                            .null(),
                    )
                    .col(ColumnDef::new(donation::Column::ProductName).string_len(100).null())
                    .col(ColumnDef::new(donation::Column::ProductEmoji).string_len(16).null())
                    .col(
                        ColumnDef::new(donation::Column::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(donation::Column::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(donation::Column::PaidAt).big_integer().null())
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_donation_payment_id")
                    .col(donation::Column::PaymentId)
                    .table(donation::Entity)
                    .unique()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_donation_user_id")
                    .col(donation::Column::UserId)
                    .table(donation::Entity)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_donation_user_id").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("uq_donation_payment_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(donation::Entity).to_owned())
            .await
    }
}
