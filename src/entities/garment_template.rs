use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MeasurementSet;

/// A reusable garment blueprint: parts, default measurements and base fabric
/// needs per part, plus the fee structure applied to every design built from
/// it.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "garment_templates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    /// Part name -> default measurement (cm); the denominator of the
    /// adjustment factor.
    #[sea_orm(column_type = "Json")]
    pub default_measurements: MeasurementSet,
    /// Part name -> base meters of fabric at default measurements.
    #[sea_orm(column_type = "Json")]
    pub fabric_requirements: MeasurementSet,
    pub base_price: Decimal,
    pub tailor_fee: Decimal,
    pub service_fee: Decimal,
    pub completion_time_days: i32,
    pub usage_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::design::Entity")]
    Designs,
}

impl Related<super::design::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Designs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
