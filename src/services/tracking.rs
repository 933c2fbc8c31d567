//! Customer-facing order tracking projection.
//!
//! Everything here is a read model derived from the order, its fabric
//! sub-orders and the tailor assignment; nothing in this module writes.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{
    order::{Entity as OrderEntity, Model as OrderModel},
    order_fabric::{self, Entity as OrderFabricEntity},
    tailor_assignment::{self, Entity as AssignmentEntity, Model as AssignmentModel},
};
use crate::errors::ServiceError;
use crate::models::{FabricOrderStatus, Operator, OrderStatus};
use crate::services::order_status::OrderStatusService;

/// Overall progress weight of each fulfillment stage.
fn progress_percent(status: OrderStatus) -> u8 {
    match status {
        OrderStatus::Pending => 0,
        OrderStatus::PaymentPending => 5,
        OrderStatus::Paid => 10,
        OrderStatus::FabricOrdering => 20,
        OrderStatus::FabricOrdered => 35,
        OrderStatus::InProduction => 55,
        OrderStatus::QualityCheck => 75,
        OrderStatus::ReadyForShipping => 85,
        OrderStatus::Shipped => 90,
        OrderStatus::Delivered => 100,
        OrderStatus::Completed => 100,
        OrderStatus::Cancelled | OrderStatus::Refunded => 0,
    }
}

fn status_label(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "Awaiting checkout",
        OrderStatus::PaymentPending => "Awaiting payment",
        OrderStatus::Paid => "Payment received",
        OrderStatus::FabricOrdering => "Ordering fabrics",
        OrderStatus::FabricOrdered => "Fabrics on the way",
        OrderStatus::InProduction => "In production",
        OrderStatus::QualityCheck => "Quality check",
        OrderStatus::ReadyForShipping => "Ready for shipping",
        OrderStatus::Shipped => "Shipped",
        OrderStatus::Delivered => "Delivered",
        OrderStatus::Completed => "Completed",
        OrderStatus::Cancelled => "Cancelled",
        OrderStatus::Refunded => "Refunded",
    }
}

fn next_steps(status: OrderStatus) -> Vec<&'static str> {
    match status {
        OrderStatus::Pending => vec!["Complete the payment to start your order"],
        OrderStatus::PaymentPending => vec!["Finish the payment in the checkout window"],
        OrderStatus::Paid | OrderStatus::FabricOrdering => {
            vec!["Fabric sellers are confirming your fabrics"]
        }
        OrderStatus::FabricOrdered => vec!["Fabrics are being cut and shipped to your tailor"],
        OrderStatus::InProduction => vec!["Your tailor is working on the garment"],
        OrderStatus::QualityCheck => vec!["The finished garment is being inspected"],
        OrderStatus::ReadyForShipping => vec!["Your garment will be handed to the courier soon"],
        OrderStatus::Shipped => vec!["Track the parcel with the courier"],
        OrderStatus::Delivered => vec!["Confirm receipt to complete the order"],
        OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded => vec![],
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    pub at: DateTime<Utc>,
    pub event: &'static str,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FabricProgress {
    pub total: usize,
    pub pending: usize,
    pub ordered: usize,
    pub in_transit: usize,
    pub delivered: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TailorProgress {
    pub status: String,
    pub completion_percentage: Decimal,
    pub deadline: NaiveDate,
    pub days_remaining: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderTracking {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub status_label: &'static str,
    pub progress_percent: u8,
    pub next_steps: Vec<&'static str>,
    pub estimated_completion: Option<NaiveDate>,
    pub tracking_number: Option<String>,
    pub timeline: Vec<TimelineEvent>,
    pub fabrics: FabricProgress,
    pub tailor: Option<TailorProgress>,
}

#[derive(Clone)]
pub struct TrackingService {
    db: Arc<DbPool>,
}

impl TrackingService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Builds the tracking projection for one order.
    pub async fn track_order(
        &self,
        operator: &Operator,
        order_id: Uuid,
    ) -> Result<OrderTracking, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if !(operator.is_admin()
            || operator.id == order.user_id
            || operator.id == order.tailor_id)
        {
            return Err(ServiceError::Forbidden(
                "Order is not visible to this account".to_string(),
            ));
        }

        let status = OrderStatusService::current_status(&order)?;

        let fabrics = OrderFabricEntity::find()
            .filter(order_fabric::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;
        let mut fabric_progress = FabricProgress {
            total: fabrics.len(),
            ..FabricProgress::default()
        };
        for row in &fabrics {
            match row.status.parse::<FabricOrderStatus>() {
                Ok(FabricOrderStatus::Pending) => fabric_progress.pending += 1,
                Ok(FabricOrderStatus::Ordered) => fabric_progress.ordered += 1,
                Ok(FabricOrderStatus::Cutting) | Ok(FabricOrderStatus::Shipped) => {
                    fabric_progress.in_transit += 1
                }
                Ok(FabricOrderStatus::Cancelled) => fabric_progress.cancelled += 1,
                Ok(_) => fabric_progress.delivered += 1,
                Err(_) => {}
            }
        }

        let assignment = AssignmentEntity::find()
            .filter(tailor_assignment::Column::OrderId.eq(order.id))
            .one(&*self.db)
            .await?;
        let today = Utc::now().date_naive();
        let tailor = assignment.as_ref().map(|a| TailorProgress {
            status: a.status.clone(),
            completion_percentage: a.completion_percentage,
            deadline: a.deadline,
            days_remaining: a.days_remaining(today),
        });

        Ok(OrderTracking {
            order_id: order.id,
            order_number: order.order_number.clone(),
            status,
            status_label: status_label(status),
            progress_percent: progress_percent(status),
            next_steps: next_steps(status),
            estimated_completion: estimated_completion(&order, assignment.as_ref()),
            tracking_number: order.tracking_number.clone(),
            timeline: timeline(&order),
            fabrics: fabric_progress,
            tailor,
        })
    }
}

/// The assignment deadline once production is planned, otherwise the
/// customer's preferred date.
fn estimated_completion(
    order: &OrderModel,
    assignment: Option<&AssignmentModel>,
) -> Option<NaiveDate> {
    assignment
        .map(|a| a.deadline)
        .or(order.preferred_completion_date)
}

/// Chronological milestones; stages not reached yet are absent.
fn timeline(order: &OrderModel) -> Vec<TimelineEvent> {
    let mut events = vec![TimelineEvent {
        at: order.created_at,
        event: "Order placed",
    }];
    let milestones: [(Option<DateTime<Utc>>, &'static str); 7] = [
        (order.paid_at, "Payment received"),
        (order.production_started_at, "Production started"),
        (order.quality_check_at, "Quality check started"),
        (order.shipped_at, "Shipped"),
        (order.delivered_at, "Delivered"),
        (order.completed_at, "Completed"),
        (order.cancelled_at, "Cancelled"),
    ];
    for (at, event) in milestones {
        if let Some(at) = at {
            events.push(TimelineEvent { at, event });
        }
    }
    events.sort_by_key(|e| e.at);
    events
}
