//! Fabric procurement fulfillment: splits a paid order into per-seller
//! sub-orders and runs each sub-order's status machine.
//!
//! After every sub-order transition the parent order's gating is
//! re-evaluated: once ALL non-cancelled sub-orders are confirmed the order
//! becomes `fabric_ordered`, and once ALL have reached the tailor the
//! assignment is created and production starts.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{
    design,
    fabric::Entity as FabricEntity,
    order::{Entity as OrderEntity, Model as OrderModel},
    order_fabric::{self, Entity as OrderFabricEntity, Model as OrderFabricModel},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{FabricOrderStatus, Operator, OrderStatus};
use crate::services::fabric_stock::FabricStockService;
use crate::services::order_status::OrderStatusService;
use crate::services::tailor_assignments::AssignmentService;

#[derive(Clone)]
pub struct FulfillmentService {
    db: Arc<DbPool>,
    order_status: OrderStatusService,
    stock: FabricStockService,
    assignments: Arc<AssignmentService>,
    event_sender: EventSender,
}

fn parse_fabric_status(raw: &str) -> Result<FabricOrderStatus, ServiceError> {
    raw.parse().map_err(|_| {
        ServiceError::InvariantViolation(format!("fabric sub-order carries unknown status '{}'", raw))
    })
}

impl FulfillmentService {
    pub fn new(
        db: Arc<DbPool>,
        order_status: OrderStatusService,
        stock: FabricStockService,
        assignments: Arc<AssignmentService>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            order_status,
            stock,
            assignments,
            event_sender,
        }
    }

    /// Splits the order into one fabric sub-order per garment part, using the
    /// design's requirement snapshot for amounts and the live fabric record
    /// for seller and price (both snapshotted onto the row from here on).
    ///
    /// Runs on the settlement transaction: a crash rolls back the paid mark
    /// together with these rows.
    #[instrument(skip(self, conn, order, design), fields(order_id = %order.id))]
    pub async fn create_fabric_orders<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &OrderModel,
        design: &design::Model,
    ) -> Result<Vec<OrderFabricModel>, ServiceError> {
        let requirements = design.fabric_requirements.as_ref().ok_or_else(|| {
            ServiceError::InvariantViolation(format!(
                "Design {} was ordered without a requirement snapshot",
                design.id
            ))
        })?;

        let now = Utc::now();
        let mut created = Vec::with_capacity(requirements.0.len());

        for (part, requirement) in &requirements.0 {
            let fabric = FabricEntity::find_by_id(requirement.fabric_id)
                .one(conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Fabric {} for part '{}' no longer exists",
                        requirement.fabric_id, part
                    ))
                })?;

            let price = fabric.current_price();
            let row = order_fabric::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                fabric_id: Set(fabric.id),
                fabric_seller_id: Set(fabric.seller_id),
                garment_part: Set(part.clone()),
                fabric_amount: Set(requirement.adjusted_requirement),
                price_per_meter: Set(price),
                total_price: Set(requirement.adjusted_requirement * price),
                status: Set(FabricOrderStatus::Pending.to_string()),
                seller_notes: Set(None),
                ordered_at: Set(None),
                shipped_at: Set(None),
                delivered_at: Set(None),
                tracking_number: Set(None),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            };
            created.push(row.insert(conn).await?);
        }

        info!(order_id = %order.id, count = created.len(), "fabric sub-orders created");
        self.event_sender
            .send_logged(Event::FabricOrdersCreated {
                order_id: order.id,
                count: created.len(),
            })
            .await;
        Ok(created)
    }

    /// Seller confirms the sub-order. Reserves stock atomically; the order
    /// may advance to `fabric_ordered` as a result.
    #[instrument(skip(self, operator), fields(order_fabric_id = %order_fabric_id))]
    pub async fn mark_ordered(
        &self,
        operator: &Operator,
        order_fabric_id: Uuid,
    ) -> Result<OrderFabricModel, ServiceError> {
        let txn = self.db.begin().await?;

        let row = self.load_for_seller(&txn, operator, order_fabric_id).await?;
        self.ensure_transition(&row, FabricOrderStatus::Ordered)?;

        self.stock.reserve(&txn, row.fabric_id, row.fabric_amount).await?;

        let mut active: order_fabric::ActiveModel = row.into();
        active.status = Set(FabricOrderStatus::Ordered.to_string());
        active.ordered_at = Set(Some(Utc::now()));
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        self.maybe_advance_order(&txn, updated.order_id).await?;
        txn.commit().await?;

        self.emit_status_change(&updated, FabricOrderStatus::Pending).await;
        Ok(updated)
    }

    /// Seller starts cutting the confirmed fabric.
    pub async fn mark_cutting(
        &self,
        operator: &Operator,
        order_fabric_id: Uuid,
    ) -> Result<OrderFabricModel, ServiceError> {
        self.simple_transition(operator, order_fabric_id, FabricOrderStatus::Cutting, |active| {
            active.updated_at = Set(Some(Utc::now()));
        })
        .await
    }

    /// Seller ships the fabric to the tailor.
    pub async fn mark_shipped(
        &self,
        operator: &Operator,
        order_fabric_id: Uuid,
        tracking_number: Option<String>,
    ) -> Result<OrderFabricModel, ServiceError> {
        self.simple_transition(operator, order_fabric_id, FabricOrderStatus::Shipped, |active| {
            active.shipped_at = Set(Some(Utc::now()));
            active.tracking_number = Set(tracking_number.clone());
            active.updated_at = Set(Some(Utc::now()));
        })
        .await
    }

    /// Fabric arrived at the tailor. Once every non-cancelled sub-order is
    /// delivered the assignment is created and the order enters production.
    #[instrument(skip(self, operator), fields(order_fabric_id = %order_fabric_id))]
    pub async fn mark_delivered(
        &self,
        operator: &Operator,
        order_fabric_id: Uuid,
    ) -> Result<OrderFabricModel, ServiceError> {
        let txn = self.db.begin().await?;

        let row = self.load_for_seller(&txn, operator, order_fabric_id).await?;
        let old_status = parse_fabric_status(&row.status)?;
        self.ensure_transition(&row, FabricOrderStatus::DeliveredToTailor)?;

        let mut active: order_fabric::ActiveModel = row.into();
        active.status = Set(FabricOrderStatus::DeliveredToTailor.to_string());
        active.delivered_at = Set(Some(Utc::now()));
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        self.maybe_advance_order(&txn, updated.order_id).await?;
        txn.commit().await?;

        self.emit_status_change(&updated, old_status).await;
        Ok(updated)
    }

    /// Tailor-side inspection of a delivered fabric.
    pub async fn record_fabric_quality(
        &self,
        operator: &Operator,
        order_fabric_id: Uuid,
        approved: bool,
        notes: Option<String>,
    ) -> Result<OrderFabricModel, ServiceError> {
        let txn = self.db.begin().await?;

        let row = OrderFabricEntity::find_by_id(order_fabric_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Fabric sub-order {} not found", order_fabric_id))
            })?;

        // The tailor of the parent order inspects; sellers cannot approve
        // their own fabric.
        let parent = OrderEntity::find_by_id(row.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", row.order_id)))?;
        if !operator.can_act_for(parent.tailor_id) {
            return Err(ServiceError::Forbidden(
                "Only the assigned tailor may inspect delivered fabric".to_string(),
            ));
        }

        let old_status = parse_fabric_status(&row.status)?;
        // delivered_to_tailor -> quality_check -> approved|rejected collapses
        // into one call from the API.
        let target = if approved {
            FabricOrderStatus::Approved
        } else {
            FabricOrderStatus::Rejected
        };
        if !(old_status == FabricOrderStatus::DeliveredToTailor
            || old_status == FabricOrderStatus::QualityCheck)
        {
            return Err(ServiceError::IllegalTransition(format!(
                "Fabric sub-order in status '{}' cannot be inspected",
                old_status
            )));
        }

        let mut active: order_fabric::ActiveModel = row.into();
        active.status = Set(target.to_string());
        active.seller_notes = Set(notes);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        self.emit_status_change(&updated, old_status).await;
        Ok(updated)
    }

    /// Cancellation cascade for the parent order: pending and ordered rows
    /// are cancelled and the meters of confirmed rows returned to stock.
    pub async fn cancel_open_fabric_orders<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let rows = OrderFabricEntity::find()
            .filter(order_fabric::Column::OrderId.eq(order_id))
            .all(conn)
            .await?;

        let mut cancelled = 0u64;
        for row in rows {
            let status = parse_fabric_status(&row.status)?;
            if !matches!(status, FabricOrderStatus::Pending | FabricOrderStatus::Ordered) {
                continue;
            }
            // Ordered rows decremented stock when the seller confirmed.
            if status == FabricOrderStatus::Ordered {
                self.stock.restore(conn, row.fabric_id, row.fabric_amount).await?;
            }

            let mut active: order_fabric::ActiveModel = row.into();
            active.status = Set(FabricOrderStatus::Cancelled.to_string());
            active.updated_at = Set(Some(Utc::now()));
            active.update(conn).await?;
            cancelled += 1;
        }

        Ok(cancelled)
    }

    /// Lists the sub-orders of an order.
    pub async fn list_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<OrderFabricModel>, ServiceError> {
        Ok(OrderFabricEntity::find()
            .filter(order_fabric::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }

    /// Lists sub-orders addressed to a seller.
    pub async fn list_for_seller(
        &self,
        seller_id: Uuid,
    ) -> Result<Vec<OrderFabricModel>, ServiceError> {
        Ok(OrderFabricEntity::find()
            .filter(order_fabric::Column::FabricSellerId.eq(seller_id))
            .all(&*self.db)
            .await?)
    }

    /// Re-evaluates the parent order's gating after a sub-order transition.
    async fn maybe_advance_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let order_status = OrderStatusService::current_status(&order)?;

        let rows = OrderFabricEntity::find()
            .filter(order_fabric::Column::OrderId.eq(order_id))
            .all(conn)
            .await?;
        let statuses: Vec<FabricOrderStatus> = rows
            .iter()
            .map(|r| parse_fabric_status(&r.status))
            .collect::<Result<_, _>>()?;
        let live: Vec<FabricOrderStatus> = statuses
            .iter()
            .copied()
            .filter(|s| *s != FabricOrderStatus::Cancelled)
            .collect();
        if live.is_empty() {
            warn!(order_id = %order_id, "order has no live fabric sub-orders, not advancing");
            return Ok(());
        }

        match order_status {
            OrderStatus::FabricOrdering => {
                if live.iter().all(|s| s.is_ordered_or_later()) {
                    self.order_status
                        .transition(conn, order, OrderStatus::FabricOrdered)
                        .await?;
                }
            }
            OrderStatus::FabricOrdered => {
                if live.iter().all(|s| s.is_delivered_or_later()) {
                    self.assignments.create_for_order(conn, order).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn load_for_seller<C: ConnectionTrait>(
        &self,
        conn: &C,
        operator: &Operator,
        order_fabric_id: Uuid,
    ) -> Result<OrderFabricModel, ServiceError> {
        let row = OrderFabricEntity::find_by_id(order_fabric_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Fabric sub-order {} not found", order_fabric_id))
            })?;
        if !operator.can_act_for(row.fabric_seller_id) {
            return Err(ServiceError::Forbidden(
                "Fabric sub-order belongs to another seller".to_string(),
            ));
        }
        Ok(row)
    }

    fn ensure_transition(
        &self,
        row: &OrderFabricModel,
        next: FabricOrderStatus,
    ) -> Result<(), ServiceError> {
        let current = parse_fabric_status(&row.status)?;
        if !current.can_transition_to(next) {
            return Err(ServiceError::IllegalTransition(format!(
                "Fabric sub-order cannot move from '{}' to '{}'",
                current, next
            )));
        }
        Ok(())
    }

    async fn simple_transition<F>(
        &self,
        operator: &Operator,
        order_fabric_id: Uuid,
        next: FabricOrderStatus,
        mutate: F,
    ) -> Result<OrderFabricModel, ServiceError>
    where
        F: FnOnce(&mut order_fabric::ActiveModel),
    {
        let txn = self.db.begin().await?;
        let row = self.load_for_seller(&txn, operator, order_fabric_id).await?;
        let old_status = parse_fabric_status(&row.status)?;
        self.ensure_transition(&row, next)?;

        let mut active: order_fabric::ActiveModel = row.into();
        active.status = Set(next.to_string());
        mutate(&mut active);
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        self.emit_status_change(&updated, old_status).await;
        Ok(updated)
    }

    async fn emit_status_change(&self, row: &OrderFabricModel, old: FabricOrderStatus) {
        self.event_sender
            .send_logged(Event::FabricOrderStatusChanged {
                order_fabric_id: row.id,
                old_status: old.to_string(),
                new_status: row.status.clone(),
            })
            .await;
    }
}
