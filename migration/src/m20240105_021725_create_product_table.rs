use entity::product;
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(product::Entity)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(product::Column::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(product::Column::UserId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(product::Column::Name).string_len(100).not_null())
                    .col(
                        ColumnDef::new(product::Column::Emoji)
                            .string_len(16)
                            .not_null()
                            .default("".to_owned()),
                    )
                    .col(
                        ColumnDef::new(product::Column::Amount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(product::Column::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(product::Column::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_product_user_id")
                    .col(product::Column::UserId)
                    .table(product::Entity)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_product_user_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(product::Entity).to_owned())
            .await
    }
}
