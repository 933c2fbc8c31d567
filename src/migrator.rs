use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20240101_000001_create_core_tables::Migration)]
    }
}

mod m20240101_000001_create_core_tables {
    use sea_orm::Schema;
    use sea_orm_migration::prelude::*;

    use crate::entities::{design, fabric, garment_template, order, order_fabric, tailor_assignment};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_core_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Tables are derived from the entities so schema and model cannot
            // drift apart.
            let schema = Schema::new(manager.get_database_backend());

            manager
                .create_table(schema.create_table_from_entity(garment_template::Entity))
                .await?;
            manager
                .create_table(schema.create_table_from_entity(fabric::Entity))
                .await?;
            manager
                .create_table(schema.create_table_from_entity(design::Entity))
                .await?;
            manager
                .create_table(schema.create_table_from_entity(order::Entity))
                .await?;
            manager
                .create_table(schema.create_table_from_entity(order_fabric::Entity))
                .await?;
            manager
                .create_table(schema.create_table_from_entity(tailor_assignment::Entity))
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(tailor_assignment::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(order_fabric::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(order::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(design::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(fabric::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(garment_template::Entity).to_owned())
                .await?;
            Ok(())
        }
    }
}
