pub use sea_orm_migration::prelude::*;

mod m20240105_021410_create_user_table;
mod m20240105_021725_create_product_table;
mod m20240105_022130_create_donation_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240105_021410_create_user_table::Migration),
            Box::new(m20240105_021725_create_product_table::Migration),
            Box::new(m20240105_022130_create_donation_table::Migration),
        ]
    }
}
