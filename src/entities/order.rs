use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// The aggregate root of fulfillment. Monetary fields are snapshotted at
/// creation from the design and template and never recomputed from live
/// catalog prices. `status` and `payment_status` are written exclusively by
/// the order status service.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    #[validate(length(min = 1, max = 50, message = "Order number must be between 1 and 50 characters"))]
    pub order_number: String,

    pub user_id: Uuid,
    pub design_id: Uuid,
    pub tailor_id: Uuid,

    pub customer_notes: Option<String>,
    pub tailor_notes: Option<String>,
    pub preferred_completion_date: Option<NaiveDate>,

    pub fabric_cost: Decimal,
    pub tailoring_cost: Decimal,
    pub service_fee: Decimal,
    pub shipping_cost: Decimal,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,

    pub status: String,
    pub payment_status: String,
    pub payment_method: Option<String>,
    pub gateway_order_id: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub gateway_token: Option<String>,
    pub gateway_redirect_url: Option<String>,

    pub shipping_address: String,
    pub shipping_city: String,
    pub shipping_state: String,
    pub shipping_zip_code: String,
    pub shipping_country: String,
    pub shipping_phone: String,
    pub tracking_number: Option<String>,

    pub paid_at: Option<DateTime<Utc>>,
    pub production_started_at: Option<DateTime<Utc>>,
    pub quality_check_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::design::Entity",
        from = "Column::DesignId",
        to = "super::design::Column::Id"
    )]
    Design,
    #[sea_orm(has_many = "super::order_fabric::Entity")]
    OrderFabrics,
    #[sea_orm(has_one = "super::tailor_assignment::Entity")]
    TailorAssignment,
}

impl Related<super::design::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Design.def()
    }
}

impl Related<super::order_fabric::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderFabrics.def()
    }
}

impl Related<super::tailor_assignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TailorAssignment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
