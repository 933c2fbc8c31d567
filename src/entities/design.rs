use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FabricAssignments, FabricRequirements, MeasurementSet};

/// A customer's configured garment: template + fabric choices + measurements,
/// with the computed requirement and cost snapshot.
///
/// Lifecycle `draft -> completed -> ordered`; completed designs are
/// immutable, ordered designs are additionally undeletable and referenced by
/// exactly one order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "designs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub garment_template_id: Uuid,
    pub design_name: String,
    pub special_instructions: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub fabric_assignments: FabricAssignments,
    #[sea_orm(column_type = "Json")]
    pub custom_measurements: MeasurementSet,
    /// Per-part requirement snapshot, computed when the design is costed.
    #[sea_orm(column_type = "Json", nullable)]
    pub fabric_requirements: Option<FabricRequirements>,
    pub fabric_cost: Decimal,
    pub tailoring_cost: Decimal,
    pub total_estimated_cost: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::garment_template::Entity",
        from = "Column::GarmentTemplateId",
        to = "super::garment_template::Column::Id"
    )]
    GarmentTemplate,
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::garment_template::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GarmentTemplate.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
