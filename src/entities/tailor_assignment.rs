use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::WorkSteps;

/// The tailor's work-tracking record for one order, created when the order
/// enters production. At most one per order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tailor_assignments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_id: Uuid,
    pub tailor_id: Uuid,
    pub status: String,
    pub assigned_date: NaiveDate,
    pub deadline: NaiveDate,
    pub completed_date: Option<NaiveDate>,
    pub special_instructions: Option<String>,
    /// Append-only work log.
    #[sea_orm(column_type = "Json")]
    pub work_steps: WorkSteps,
    pub completion_percentage: Decimal,
    pub quality_check_passed: Option<bool>,
    pub quality_notes: Option<String>,
    pub quality_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Days until the deadline; 0 once completed or past due.
    pub fn days_remaining(&self, today: NaiveDate) -> i64 {
        if self.status == "completed" {
            return 0;
        }
        (self.deadline - today).num_days().max(0)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
