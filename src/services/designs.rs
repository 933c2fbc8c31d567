//! Design lifecycle: draft, costing and completion.
//!
//! Every save of a draft recomputes the requirement and cost snapshot from
//! the current catalog, so the numbers a customer sees are always the ones
//! that would be charged. Completion freezes the design; ordering it is the
//! order service's job.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{
    design::{self, Entity as DesignEntity, Model as DesignModel},
    fabric::{self, Entity as FabricEntity},
    garment_template::{self, Entity as TemplateEntity, Model as TemplateModel},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{DesignStatus, FabricAssignments, MeasurementSet, Operator};
use crate::services::cost_engine::{self, CostQuote, TemplateInputs};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDesignRequest {
    pub garment_template_id: Uuid,
    #[validate(length(min = 1, max = 100, message = "Design name must be between 1 and 100 characters"))]
    pub design_name: String,
    #[validate(length(max = 1000, message = "Special instructions are limited to 1000 characters"))]
    pub special_instructions: Option<String>,
    pub fabric_assignments: FabricAssignments,
    pub custom_measurements: MeasurementSet,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateDesignRequest {
    #[validate(length(min = 1, max = 100, message = "Design name must be between 1 and 100 characters"))]
    pub design_name: Option<String>,
    #[validate(length(max = 1000, message = "Special instructions are limited to 1000 characters"))]
    pub special_instructions: Option<String>,
    pub fabric_assignments: Option<FabricAssignments>,
    pub custom_measurements: Option<MeasurementSet>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DesignStats {
    pub total: u64,
    pub drafts: u64,
    pub completed: u64,
    pub ordered: u64,
}

#[derive(Clone)]
pub struct DesignService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl DesignService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates a draft design, costed against the current catalog.
    #[instrument(skip(self, operator, request), fields(template_id = %request.garment_template_id))]
    pub async fn create_design(
        &self,
        operator: &Operator,
        request: CreateDesignRequest,
    ) -> Result<DesignModel, ServiceError> {
        request.validate()?;

        let template = self.load_template(request.garment_template_id).await?;
        let quote = self
            .quote(&template, &request.fabric_assignments, &request.custom_measurements)
            .await?;

        let now = Utc::now();
        let design = design::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(operator.id),
            garment_template_id: Set(template.id),
            design_name: Set(request.design_name),
            special_instructions: Set(request.special_instructions),
            fabric_assignments: Set(request.fabric_assignments),
            custom_measurements: Set(request.custom_measurements),
            fabric_requirements: Set(Some(quote.requirements)),
            fabric_cost: Set(quote.fabric_cost),
            tailoring_cost: Set(quote.tailoring_cost),
            total_estimated_cost: Set(quote.total_cost),
            status: Set(DesignStatus::Draft.to_string()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.db)
        .await?;

        info!(design_id = %design.id, "design drafted");
        Ok(design)
    }

    /// Edits a draft and recomputes its snapshot. Completed and ordered
    /// designs are immutable.
    #[instrument(skip(self, operator, request), fields(design_id = %design_id))]
    pub async fn update_design(
        &self,
        operator: &Operator,
        design_id: Uuid,
        request: UpdateDesignRequest,
    ) -> Result<DesignModel, ServiceError> {
        request.validate()?;

        let design = self.load_owned(operator, design_id).await?;
        self.ensure_status(&design, DesignStatus::Draft, "edited")?;

        let template = self.load_template(design.garment_template_id).await?;
        let assignments = request
            .fabric_assignments
            .unwrap_or_else(|| design.fabric_assignments.clone());
        let measurements = request
            .custom_measurements
            .unwrap_or_else(|| design.custom_measurements.clone());
        let quote = self.quote(&template, &assignments, &measurements).await?;

        let mut active: design::ActiveModel = design.into();
        if let Some(name) = request.design_name {
            active.design_name = Set(name);
        }
        if let Some(instructions) = request.special_instructions {
            active.special_instructions = Set(Some(instructions));
        }
        active.fabric_assignments = Set(assignments);
        active.custom_measurements = Set(measurements);
        active.fabric_requirements = Set(Some(quote.requirements));
        active.fabric_cost = Set(quote.fabric_cost);
        active.tailoring_cost = Set(quote.tailoring_cost);
        active.total_estimated_cost = Set(quote.total_cost);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(&*self.db).await?)
    }

    /// Freezes a draft for ordering and counts the template use.
    #[instrument(skip(self, operator), fields(design_id = %design_id))]
    pub async fn complete_design(
        &self,
        operator: &Operator,
        design_id: Uuid,
    ) -> Result<DesignModel, ServiceError> {
        let design = self.load_owned(operator, design_id).await?;
        self.ensure_status(&design, DesignStatus::Draft, "completed")?;

        if design
            .fabric_requirements
            .as_ref()
            .map(|r| r.0.is_empty())
            .unwrap_or(true)
        {
            return Err(ServiceError::ValidationError(
                "Design needs at least one fabric assignment before completion".to_string(),
            ));
        }

        let template_id = design.garment_template_id;
        let mut active: design::ActiveModel = design.into();
        active.status = Set(DesignStatus::Completed.to_string());
        active.updated_at = Set(Some(Utc::now()));
        let design = active.update(&*self.db).await?;

        TemplateEntity::update_many()
            .col_expr(
                garment_template::Column::UsageCount,
                sea_orm::sea_query::Expr::col(garment_template::Column::UsageCount).add(1),
            )
            .filter(garment_template::Column::Id.eq(template_id))
            .exec(&*self.db)
            .await?;

        info!(design_id = %design.id, "design completed");
        self.event_sender
            .send_logged(Event::DesignCompleted(design.id))
            .await;
        Ok(design)
    }

    pub async fn get_design(
        &self,
        operator: &Operator,
        design_id: Uuid,
    ) -> Result<DesignModel, ServiceError> {
        self.load_owned(operator, design_id).await
    }

    /// Pages through the operator's designs, newest first.
    pub async fn list_designs(
        &self,
        operator: &Operator,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<DesignModel>, u64), ServiceError> {
        let per_page = per_page.clamp(1, 100);
        let mut query = DesignEntity::find().order_by_desc(design::Column::CreatedAt);
        if !operator.is_admin() {
            query = query.filter(design::Column::UserId.eq(operator.id));
        }
        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let designs = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((designs, total))
    }

    pub async fn design_stats(&self, operator: &Operator) -> Result<DesignStats, ServiceError> {
        let scoped = |status: Option<DesignStatus>| {
            let mut query = DesignEntity::find();
            if !operator.is_admin() {
                query = query.filter(design::Column::UserId.eq(operator.id));
            }
            if let Some(status) = status {
                query = query.filter(design::Column::Status.eq(status.to_string()));
            }
            query
        };

        Ok(DesignStats {
            total: scoped(None).count(&*self.db).await?,
            drafts: scoped(Some(DesignStatus::Draft)).count(&*self.db).await?,
            completed: scoped(Some(DesignStatus::Completed)).count(&*self.db).await?,
            ordered: scoped(Some(DesignStatus::Ordered)).count(&*self.db).await?,
        })
    }

    /// Deletes a design that was never ordered.
    #[instrument(skip(self, operator), fields(design_id = %design_id))]
    pub async fn delete_design(
        &self,
        operator: &Operator,
        design_id: Uuid,
    ) -> Result<(), ServiceError> {
        let design = self.load_owned(operator, design_id).await?;
        if design.status == DesignStatus::Ordered.to_string() {
            return Err(ServiceError::IllegalTransition(
                "An ordered design cannot be deleted".to_string(),
            ));
        }
        DesignEntity::delete_by_id(design.id).exec(&*self.db).await?;
        Ok(())
    }

    async fn quote(
        &self,
        template: &TemplateModel,
        assignments: &FabricAssignments,
        measurements: &MeasurementSet,
    ) -> Result<CostQuote, ServiceError> {
        let fabric_ids: Vec<Uuid> = assignments.0.values().copied().collect();
        let fabrics = FabricEntity::find()
            .filter(fabric::Column::Id.is_in(fabric_ids))
            .filter(fabric::Column::IsActive.eq(true))
            .all(&*self.db)
            .await?;
        let prices: BTreeMap<Uuid, Decimal> =
            fabrics.iter().map(|f| (f.id, f.current_price())).collect();

        let inputs = TemplateInputs {
            fabric_requirements: template.fabric_requirements.0.clone(),
            default_measurements: template.default_measurements.0.clone(),
            tailor_fee: template.tailor_fee,
            service_fee: template.service_fee,
        };
        cost_engine::compute_quote(assignments, measurements, &inputs, &prices)
    }

    async fn load_template(&self, template_id: Uuid) -> Result<TemplateModel, ServiceError> {
        let template = TemplateEntity::find_by_id(template_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Garment template {} not found", template_id))
            })?;
        if !template.is_active {
            return Err(ServiceError::ValidationError(format!(
                "Garment template '{}' is no longer offered",
                template.name
            )));
        }
        Ok(template)
    }

    async fn load_owned(
        &self,
        operator: &Operator,
        design_id: Uuid,
    ) -> Result<DesignModel, ServiceError> {
        let design = DesignEntity::find_by_id(design_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Design {} not found", design_id)))?;
        if !operator.can_act_for(design.user_id) {
            return Err(ServiceError::Forbidden(
                "Design belongs to another customer".to_string(),
            ));
        }
        Ok(design)
    }

    fn ensure_status(
        &self,
        design: &DesignModel,
        required: DesignStatus,
        action: &str,
    ) -> Result<(), ServiceError> {
        if design.status != required.to_string() {
            return Err(ServiceError::IllegalTransition(format!(
                "Only a {} design can be {} (design is '{}')",
                required, action, design.status
            )));
        }
        Ok(())
    }
}
