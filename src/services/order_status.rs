//! The order state machine: the only writer of `orders.status` and
//! `orders.payment_status`.
//!
//! Every mutation validates against the transition table in
//! [`crate::models::OrderStatus`], stamps the phase timestamp belonging to
//! the new status, and bumps the optimistic version counter. Progress is
//! always derived from these fields (see `tracking`), never stored.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::order::{self, Entity as OrderEntity, Model as OrderModel};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{OrderStatus, PaymentStatus};

#[derive(Clone)]
pub struct OrderStatusService {
    event_sender: EventSender,
}

fn parse_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    raw.parse().map_err(|_| {
        ServiceError::InvariantViolation(format!("order carries unknown status '{}'", raw))
    })
}

fn parse_payment_status(raw: &str) -> Result<PaymentStatus, ServiceError> {
    raw.parse().map_err(|_| {
        ServiceError::InvariantViolation(format!("order carries unknown payment status '{}'", raw))
    })
}

fn append_note(existing: Option<&str>, note: &str) -> String {
    match existing {
        Some(prev) if !prev.is_empty() => format!("{} - {}", note, prev),
        _ => note.to_string(),
    }
}

/// Writes the prepared fields, filtered on the version the caller read.
/// Zero rows affected means another writer committed in between; the caller
/// must re-read and decide again.
async fn guarded_update<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    read_version: i32,
    active: order::ActiveModel,
) -> Result<OrderModel, ServiceError> {
    let result = OrderEntity::update_many()
        .set(active)
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Version.eq(read_version))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrencyConflict(format!(
            "Order {} changed since it was read",
            order_id
        )));
    }
    OrderEntity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

/// Stamps the phase timestamp that belongs to `status`, if any.
fn stamp_timestamp(active: &mut order::ActiveModel, status: OrderStatus) {
    let now = Utc::now();
    match status {
        OrderStatus::InProduction => active.production_started_at = Set(Some(now)),
        OrderStatus::QualityCheck => active.quality_check_at = Set(Some(now)),
        OrderStatus::Shipped => active.shipped_at = Set(Some(now)),
        OrderStatus::Delivered => active.delivered_at = Set(Some(now)),
        OrderStatus::Completed => active.completed_at = Set(Some(now)),
        OrderStatus::Cancelled => active.cancelled_at = Set(Some(now)),
        _ => {}
    }
}

impl OrderStatusService {
    pub fn new(event_sender: EventSender) -> Self {
        Self { event_sender }
    }

    pub fn current_status(order: &OrderModel) -> Result<OrderStatus, ServiceError> {
        parse_status(&order.status)
    }

    pub fn current_payment_status(order: &OrderModel) -> Result<PaymentStatus, ServiceError> {
        parse_payment_status(&order.payment_status)
    }

    /// Applies a fulfillment status transition. A same-status transition is a
    /// no-op; an unlisted one is an `IllegalTransition` and leaves the order
    /// untouched.
    #[instrument(skip(self, conn, order), fields(order_id = %order.id, new_status = %new_status))]
    pub async fn transition<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderModel,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let current = parse_status(&order.status)?;
        if current == new_status {
            return Ok(order);
        }
        if !current.can_transition_to(new_status) {
            return Err(ServiceError::IllegalTransition(format!(
                "Order {} cannot move from '{}' to '{}'",
                order.order_number, current, new_status
            )));
        }

        let order_id = order.id;
        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status.to_string());
        stamp_timestamp(&mut active, new_status);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);

        let updated = guarded_update(conn, order_id, version, active).await?;

        info!(order_id = %order_id, from = %current, to = %new_status, "order status changed");
        self.event_sender
            .send_logged(Event::OrderStatusChanged {
                order_id,
                old_status: current.to_string(),
                new_status: new_status.to_string(),
            })
            .await;

        Ok(updated)
    }

    /// Settlement: marks the order paid and immediately advances it into
    /// fabric ordering, in a single write. Caller is responsible for running
    /// this inside the same transaction that creates the fabric sub-orders.
    #[instrument(skip(self, conn, order), fields(order_id = %order.id))]
    pub async fn mark_paid<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderModel,
    ) -> Result<OrderModel, ServiceError> {
        let current = parse_status(&order.status)?;
        if !current.can_transition_to(OrderStatus::Paid) {
            return Err(ServiceError::IllegalTransition(format!(
                "Order {} cannot accept payment in status '{}'",
                order.order_number, current
            )));
        }

        let order_id = order.id;
        let version = order.version;
        let total = order.total_amount;
        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(PaymentStatus::Paid.to_string());
        active.amount_paid = Set(total);
        active.paid_at = Set(Some(Utc::now()));
        // paid -> fabric_ordering happens as part of the same settlement.
        active.status = Set(OrderStatus::FabricOrdering.to_string());
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);

        let updated = guarded_update(conn, order_id, version, active).await?;

        info!(order_id = %order_id, "order marked paid, entering fabric ordering");
        self.event_sender
            .send_logged(Event::OrderStatusChanged {
                order_id,
                old_status: current.to_string(),
                new_status: OrderStatus::FabricOrdering.to_string(),
            })
            .await;

        Ok(updated)
    }

    /// Gateway session opened: order waits for the customer to pay.
    pub async fn mark_payment_pending<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderModel,
    ) -> Result<OrderModel, ServiceError> {
        self.transition(conn, order, OrderStatus::PaymentPending).await
    }

    /// Payment denied/expired/cancelled: record the failure and revert the
    /// order to `pending` so the customer may retry.
    #[instrument(skip(self, conn, order), fields(order_id = %order.id, reason = %reason))]
    pub async fn mark_payment_failed<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderModel,
        reason: &str,
    ) -> Result<OrderModel, ServiceError> {
        let current = parse_status(&order.status)?;
        if !matches!(current, OrderStatus::Pending | OrderStatus::PaymentPending) {
            return Err(ServiceError::IllegalTransition(format!(
                "Order {} cannot record a payment failure in status '{}'",
                order.order_number, current
            )));
        }

        let order_id = order.id;
        let version = order.version;
        let notes = append_note(order.tailor_notes.as_deref(), reason);
        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(PaymentStatus::Failed.to_string());
        active.status = Set(OrderStatus::Pending.to_string());
        active.tailor_notes = Set(Some(notes));
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        guarded_update(conn, order_id, version, active).await
    }

    /// Capture flagged for manual fraud review: hold, no fulfillment.
    pub async fn mark_payment_challenged<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderModel,
    ) -> Result<OrderModel, ServiceError> {
        let order_id = order.id;
        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(PaymentStatus::Challenge.to_string());
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        guarded_update(conn, order_id, version, active).await
    }

    /// Records a successful refund of `amount`. The caller has already
    /// validated the amount against `amount_paid` and completed the gateway
    /// call.
    #[instrument(skip(self, conn, order), fields(order_id = %order.id, amount = %amount))]
    pub async fn mark_refunded<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderModel,
        amount: Decimal,
    ) -> Result<OrderModel, ServiceError> {
        let remaining = order.amount_paid - amount;
        let new_payment_status = if remaining > Decimal::ZERO {
            PaymentStatus::PartiallyRefunded
        } else {
            PaymentStatus::Refunded
        };

        let order_id = order.id;
        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(new_payment_status.to_string());
        active.amount_paid = Set(remaining);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        guarded_update(conn, order_id, version, active).await
    }

    /// Cancels the order. Only legal before production work begins; the
    /// cascade over sub-orders, assignment, stock and refund is orchestrated
    /// by the order service.
    #[instrument(skip(self, conn, order), fields(order_id = %order.id))]
    pub async fn cancel<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderModel,
        reason: &str,
    ) -> Result<OrderModel, ServiceError> {
        let current = parse_status(&order.status)?;
        if !current.can_be_cancelled() {
            return Err(ServiceError::IllegalTransition(
                "Order cannot be cancelled at this stage".to_string(),
            ));
        }

        let order_id = order.id;
        let version = order.version;
        let notes = append_note(order.tailor_notes.as_deref(), reason);
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled.to_string());
        active.cancelled_at = Set(Some(Utc::now()));
        active.tailor_notes = Set(Some(notes));
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);

        let updated = guarded_update(conn, order_id, version, active).await?;

        info!(order_id = %order_id, from = %current, "order cancelled");
        self.event_sender.send_logged(Event::OrderCancelled(order_id)).await;
        Ok(updated)
    }
}
