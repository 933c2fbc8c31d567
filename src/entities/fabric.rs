use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A seller's fabric listing. `stock_meter` is the authoritative available
/// quantity and is only mutated through the stock ledger.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fabrics")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub sku: String,
    pub price_per_meter: Decimal,
    pub discount_price: Option<Decimal>,
    pub stock_meter: Decimal,
    pub min_order_meter: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Effective selling price: discount price when set, list price otherwise.
    pub fn current_price(&self) -> Decimal {
        self.discount_price.unwrap_or(self.price_per_meter)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_fabric::Entity")]
    OrderFabrics,
}

impl Related<super::order_fabric::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderFabrics.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
