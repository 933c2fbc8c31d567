//! Tailor assignment lifecycle and production progress tracking.
//!
//! An assignment is created automatically when every fabric sub-order has
//! reached the tailor. From there the tailor drives it through
//! `assigned -> accepted -> in_progress -> completed`, and a quality check
//! on the finished garment either releases the order for shipping or sends
//! the assignment back into rework.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{
    design::Entity as DesignEntity,
    garment_template::Entity as TemplateEntity,
    order::{Entity as OrderEntity, Model as OrderModel},
    tailor_assignment::{self, Entity as AssignmentEntity, Model as AssignmentModel},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{AssignmentStatus, Operator, OrderStatus, WorkStep, WorkSteps};
use crate::services::order_status::OrderStatusService;

/// Completion percentage an assignment falls back to when a quality check
/// fails and the garment goes back to the needle.
const REWORK_COMPLETION: Decimal = dec!(90);

/// Work log every assignment starts with.
const DEFAULT_WORK_STEPS: [&str; 5] = [
    "Pattern drafting",
    "Fabric cutting",
    "Sewing and assembly",
    "Fitting adjustments",
    "Finishing and pressing",
];

fn parse_assignment_status(raw: &str) -> Result<AssignmentStatus, ServiceError> {
    raw.parse().map_err(|_| {
        ServiceError::InvariantViolation(format!("assignment carries unknown status '{}'", raw))
    })
}

#[derive(Clone)]
pub struct AssignmentService {
    db: Arc<DbPool>,
    order_status: OrderStatusService,
    event_sender: EventSender,
}

impl AssignmentService {
    pub fn new(db: Arc<DbPool>, order_status: OrderStatusService, event_sender: EventSender) -> Self {
        Self {
            db,
            order_status,
            event_sender,
        }
    }

    /// Creates the assignment for an order whose fabrics have all been
    /// delivered, and moves the order into production. The deadline is the
    /// template's completion time counted from today.
    #[instrument(skip(self, conn, order), fields(order_id = %order.id))]
    pub async fn create_for_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderModel,
    ) -> Result<AssignmentModel, ServiceError> {
        if let Some(existing) = AssignmentEntity::find()
            .filter(tailor_assignment::Column::OrderId.eq(order.id))
            .one(conn)
            .await?
        {
            return Ok(existing);
        }

        let design = DesignEntity::find_by_id(order.design_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Design {} not found", order.design_id)))?;
        let template = TemplateEntity::find_by_id(design.garment_template_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Garment template {} not found",
                    design.garment_template_id
                ))
            })?;

        let now = Utc::now();
        let today = now.date_naive();
        let deadline = today + Duration::days(i64::from(template.completion_time_days));

        let steps = WorkSteps(
            DEFAULT_WORK_STEPS
                .iter()
                .map(|description| WorkStep {
                    description: (*description).to_string(),
                    completed: false,
                    completed_at: None,
                })
                .collect(),
        );

        let assignment = tailor_assignment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            tailor_id: Set(order.tailor_id),
            status: Set(AssignmentStatus::Assigned.to_string()),
            assigned_date: Set(today),
            deadline: Set(deadline),
            completed_date: Set(None),
            special_instructions: Set(design.special_instructions.clone()),
            work_steps: Set(steps),
            completion_percentage: Set(Decimal::ZERO),
            quality_check_passed: Set(None),
            quality_notes: Set(None),
            quality_checked_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(conn)
        .await?;

        let tailor_id = order.tailor_id;
        let order_id = order.id;
        self.order_status
            .transition(conn, order, OrderStatus::InProduction)
            .await?;

        info!(order_id = %order_id, tailor_id = %tailor_id, deadline = %deadline, "tailor assignment created");
        self.event_sender
            .send_logged(Event::AssignmentCreated { order_id, tailor_id })
            .await;
        Ok(assignment)
    }

    /// Tailor acknowledges the assignment.
    pub async fn accept(
        &self,
        operator: &Operator,
        assignment_id: Uuid,
    ) -> Result<AssignmentModel, ServiceError> {
        self.simple_transition(operator, assignment_id, AssignmentStatus::Accepted)
            .await
    }

    /// Tailor begins production work.
    pub async fn start(
        &self,
        operator: &Operator,
        assignment_id: Uuid,
    ) -> Result<AssignmentModel, ServiceError> {
        self.simple_transition(operator, assignment_id, AssignmentStatus::InProgress)
            .await
    }

    /// Updates the completion percentage. Values are clamped to `[0, 100]`;
    /// reaching 100 completes the assignment and moves the order into its
    /// quality check.
    #[instrument(skip(self, operator), fields(assignment_id = %assignment_id))]
    pub async fn update_completion(
        &self,
        operator: &Operator,
        assignment_id: Uuid,
        percentage: Decimal,
    ) -> Result<AssignmentModel, ServiceError> {
        let txn = self.db.begin().await?;

        let assignment = self.load_for_tailor(&txn, operator, assignment_id).await?;
        let status = parse_assignment_status(&assignment.status)?;
        if status != AssignmentStatus::InProgress {
            return Err(ServiceError::IllegalTransition(format!(
                "Progress can only be reported on an in-progress assignment, not '{}'",
                status
            )));
        }

        let clamped = percentage.clamp(Decimal::ZERO, dec!(100));
        let finished = clamped >= dec!(100);
        let now = Utc::now();
        let order_id = assignment.order_id;

        let mut active: tailor_assignment::ActiveModel = assignment.into();
        active.completion_percentage = Set(clamped);
        if finished {
            active.status = Set(AssignmentStatus::Completed.to_string());
            active.completed_date = Set(Some(now.date_naive()));
        }
        active.updated_at = Set(Some(now));
        let updated = active.update(&txn).await?;

        if finished {
            let order = OrderEntity::find_by_id(order_id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
            self.order_status
                .transition(&txn, order, OrderStatus::QualityCheck)
                .await?;
        }
        txn.commit().await?;

        if finished {
            self.event_sender
                .send_logged(Event::AssignmentCompleted(updated.id))
                .await;
        }
        Ok(updated)
    }

    /// Appends a step to the work log.
    pub async fn add_work_step(
        &self,
        operator: &Operator,
        assignment_id: Uuid,
        description: String,
    ) -> Result<AssignmentModel, ServiceError> {
        if description.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Work step description cannot be empty".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let assignment = self.load_for_tailor(&txn, operator, assignment_id).await?;
        self.ensure_workable(&assignment)?;

        let mut steps = assignment.work_steps.clone();
        steps.0.push(WorkStep {
            description,
            completed: false,
            completed_at: None,
        });

        let mut active: tailor_assignment::ActiveModel = assignment.into();
        active.work_steps = Set(steps);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;
        txn.commit().await?;
        Ok(updated)
    }

    /// Marks the work-log step at `index` as done. Re-completing a step is
    /// a no-op on its timestamp.
    pub async fn complete_work_step(
        &self,
        operator: &Operator,
        assignment_id: Uuid,
        index: usize,
    ) -> Result<AssignmentModel, ServiceError> {
        let txn = self.db.begin().await?;
        let assignment = self.load_for_tailor(&txn, operator, assignment_id).await?;
        self.ensure_workable(&assignment)?;

        let mut steps = assignment.work_steps.clone();
        let step = steps.0.get_mut(index).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Work step index {} is out of range (log has {} steps)",
                index,
                assignment.work_steps.0.len()
            ))
        })?;
        if !step.completed {
            step.completed = true;
            step.completed_at = Some(Utc::now());
        }

        let mut active: tailor_assignment::ActiveModel = assignment.into();
        active.work_steps = Set(steps);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;
        txn.commit().await?;
        Ok(updated)
    }

    /// Records the quality verdict on a completed assignment. A pass releases
    /// the order for shipping; a failure sends both the order and the
    /// assignment back into production for rework.
    #[instrument(skip(self, operator, notes), fields(assignment_id = %assignment_id, passed))]
    pub async fn record_quality_check(
        &self,
        operator: &Operator,
        assignment_id: Uuid,
        passed: bool,
        notes: Option<String>,
    ) -> Result<AssignmentModel, ServiceError> {
        if !operator.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only platform staff may record a quality verdict".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let assignment = AssignmentEntity::find_by_id(assignment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Assignment {} not found", assignment_id)))?;

        let status = parse_assignment_status(&assignment.status)?;
        if status != AssignmentStatus::Completed {
            return Err(ServiceError::IllegalTransition(format!(
                "Quality can only be checked on a completed assignment, not '{}'",
                status
            )));
        }

        let order = OrderEntity::find_by_id(assignment.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", assignment.order_id))
            })?;
        let order_id = order.id;

        let now = Utc::now();
        let mut active: tailor_assignment::ActiveModel = assignment.into();
        active.quality_check_passed = Set(Some(passed));
        active.quality_notes = Set(notes);
        active.quality_checked_at = Set(Some(now));
        if passed {
            self.order_status
                .transition(&txn, order, OrderStatus::ReadyForShipping)
                .await?;
        } else {
            // Rework: the garment goes back to the tailor, almost finished.
            active.status = Set(AssignmentStatus::InProgress.to_string());
            active.completed_date = Set(None);
            active.completion_percentage = Set(REWORK_COMPLETION);
            self.order_status
                .transition(&txn, order, OrderStatus::InProduction)
                .await?;
        }
        active.updated_at = Set(Some(now));
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_logged(Event::QualityCheckRecorded { order_id, passed })
            .await;
        Ok(updated)
    }

    /// The assignment belonging to an order, if production has started.
    pub async fn find_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<AssignmentModel>, ServiceError> {
        Ok(AssignmentEntity::find()
            .filter(tailor_assignment::Column::OrderId.eq(order_id))
            .one(&*self.db)
            .await?)
    }

    /// A tailor's workload.
    pub async fn list_for_tailor(
        &self,
        tailor_id: Uuid,
    ) -> Result<Vec<AssignmentModel>, ServiceError> {
        Ok(AssignmentEntity::find()
            .filter(tailor_assignment::Column::TailorId.eq(tailor_id))
            .all(&*self.db)
            .await?)
    }

    async fn simple_transition(
        &self,
        operator: &Operator,
        assignment_id: Uuid,
        next: AssignmentStatus,
    ) -> Result<AssignmentModel, ServiceError> {
        let txn = self.db.begin().await?;
        let assignment = self.load_for_tailor(&txn, operator, assignment_id).await?;

        let current = parse_assignment_status(&assignment.status)?;
        if !current.can_transition_to(next) {
            return Err(ServiceError::IllegalTransition(format!(
                "Assignment cannot move from '{}' to '{}'",
                current, next
            )));
        }

        let mut active: tailor_assignment::ActiveModel = assignment.into();
        active.status = Set(next.to_string());
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;
        txn.commit().await?;
        Ok(updated)
    }

    async fn load_for_tailor<C: ConnectionTrait>(
        &self,
        conn: &C,
        operator: &Operator,
        assignment_id: Uuid,
    ) -> Result<AssignmentModel, ServiceError> {
        let assignment = AssignmentEntity::find_by_id(assignment_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Assignment {} not found", assignment_id)))?;
        if !operator.can_act_for(assignment.tailor_id) {
            return Err(ServiceError::Forbidden(
                "Assignment belongs to another tailor".to_string(),
            ));
        }
        Ok(assignment)
    }

    fn ensure_workable(&self, assignment: &AssignmentModel) -> Result<(), ServiceError> {
        let status = parse_assignment_status(&assignment.status)?;
        if status.is_terminal() {
            return Err(ServiceError::IllegalTransition(format!(
                "Work log of a '{}' assignment is frozen",
                status
            )));
        }
        Ok(())
    }
}
