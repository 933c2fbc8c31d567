//! Order creation, queries and cancellation.
//!
//! Creating an order consumes a completed design exactly once: the design's
//! `completed -> ordered` flip is a conditional update, so two concurrent
//! checkouts of the same design cannot both succeed. All monetary figures are
//! snapshotted onto the order at creation and never recomputed.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{
    design::{self, Entity as DesignEntity},
    garment_template::Entity as TemplateEntity,
    order::{self, Entity as OrderEntity, Model as OrderModel},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{DesignStatus, Operator, OrderStatus, PaymentStatus};
use crate::services::fulfillment::FulfillmentService;
use crate::services::order_status::OrderStatusService;
use crate::services::payments::PaymentService;

const ORDER_NUMBER_ATTEMPTS: usize = 5;
const ORDER_NUMBER_SUFFIX_LEN: usize = 6;
const ORDER_NUMBER_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// `TC` + date + random suffix, e.g. `TC20260830K3N7QP`.
fn generate_order_number<R: Rng>(rng: &mut R, today: NaiveDate) -> String {
    let suffix: String = (0..ORDER_NUMBER_SUFFIX_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ORDER_NUMBER_CHARSET.len());
            ORDER_NUMBER_CHARSET[idx] as char
        })
        .collect();
    format!("TC{}{}", today.format("%Y%m%d"), suffix)
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub design_id: Uuid,
    pub tailor_id: Uuid,
    #[validate(length(max = 1000, message = "Customer notes are limited to 1000 characters"))]
    pub customer_notes: Option<String>,
    pub preferred_completion_date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 255, message = "Shipping address is required"))]
    pub shipping_address: String,
    #[validate(length(min = 1, max = 100, message = "Shipping city is required"))]
    pub shipping_city: String,
    #[validate(length(min = 1, max = 100, message = "Shipping state is required"))]
    pub shipping_state: String,
    #[validate(length(min = 1, max = 20, message = "Shipping zip code is required"))]
    pub shipping_zip_code: String,
    #[validate(length(min = 1, max = 100, message = "Shipping country is required"))]
    pub shipping_country: String,
    #[validate(length(min = 1, max = 30, message = "Shipping phone is required"))]
    pub shipping_phone: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateOrderRequest {
    #[validate(length(max = 1000, message = "Customer notes are limited to 1000 characters"))]
    pub customer_notes: Option<String>,
    pub preferred_completion_date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 255, message = "Shipping address cannot be empty"))]
    pub shipping_address: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Shipping city cannot be empty"))]
    pub shipping_city: Option<String>,
    #[validate(length(min = 1, max = 20, message = "Shipping zip code cannot be empty"))]
    pub shipping_zip_code: Option<String>,
    #[validate(length(min = 1, max = 30, message = "Shipping phone cannot be empty"))]
    pub shipping_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderStats {
    pub total: u64,
    pub awaiting_payment: u64,
    pub in_fulfillment: u64,
    pub completed: u64,
    pub cancelled: u64,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    order_status: OrderStatusService,
    fulfillment: Arc<FulfillmentService>,
    payments: Arc<PaymentService>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        order_status: OrderStatusService,
        fulfillment: Arc<FulfillmentService>,
        payments: Arc<PaymentService>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            order_status,
            fulfillment,
            payments,
            event_sender,
        }
    }

    /// Creates an order from a completed design. Cost figures come from the
    /// design's snapshot plus the template's service fee and the configured
    /// flat shipping cost.
    #[instrument(skip(self, operator, request, shipping_cost), fields(design_id = %request.design_id))]
    pub async fn create_order(
        &self,
        operator: &Operator,
        request: CreateOrderRequest,
        shipping_cost: Decimal,
    ) -> Result<OrderModel, ServiceError> {
        request.validate()?;

        let txn = self.db.begin().await?;

        let design = DesignEntity::find_by_id(request.design_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Design {} not found", request.design_id))
            })?;
        if !operator.can_act_for(design.user_id) {
            return Err(ServiceError::Forbidden(
                "Design belongs to another customer".to_string(),
            ));
        }
        if design.fabric_requirements.is_none() {
            return Err(ServiceError::ValidationError(
                "Design has no computed fabric requirements".to_string(),
            ));
        }

        let template = TemplateEntity::find_by_id(design.garment_template_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Garment template {} not found",
                    design.garment_template_id
                ))
            })?;

        // Conditional flip: only one checkout may consume the design.
        let flipped = DesignEntity::update_many()
            .col_expr(
                design::Column::Status,
                sea_orm::sea_query::Expr::value(DesignStatus::Ordered.to_string()),
            )
            .filter(design::Column::Id.eq(design.id))
            .filter(design::Column::Status.eq(DesignStatus::Completed.to_string()))
            .exec(&txn)
            .await?;
        if flipped.rows_affected == 0 {
            let status = design.status.clone();
            return Err(if status == DesignStatus::Ordered.to_string() {
                ServiceError::ConcurrencyConflict(
                    "Design has already been ordered".to_string(),
                )
            } else {
                ServiceError::ValidationError(format!(
                    "Only a completed design can be ordered (design is '{}')",
                    status
                ))
            });
        }

        let order_number = self.unique_order_number(&txn).await?;
        let now = Utc::now();
        let total_amount =
            design.fabric_cost + design.tailoring_cost + template.service_fee + shipping_cost;

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number),
            user_id: Set(design.user_id),
            design_id: Set(design.id),
            tailor_id: Set(request.tailor_id),
            customer_notes: Set(request.customer_notes),
            tailor_notes: Set(None),
            preferred_completion_date: Set(request.preferred_completion_date),
            fabric_cost: Set(design.fabric_cost),
            tailoring_cost: Set(design.tailoring_cost),
            service_fee: Set(template.service_fee),
            shipping_cost: Set(shipping_cost),
            total_amount: Set(total_amount),
            amount_paid: Set(Decimal::ZERO),
            status: Set(OrderStatus::Pending.to_string()),
            payment_status: Set(PaymentStatus::Pending.to_string()),
            payment_method: Set(None),
            gateway_order_id: Set(None),
            gateway_transaction_id: Set(None),
            gateway_token: Set(None),
            gateway_redirect_url: Set(None),
            shipping_address: Set(request.shipping_address),
            shipping_city: Set(request.shipping_city),
            shipping_state: Set(request.shipping_state),
            shipping_zip_code: Set(request.shipping_zip_code),
            shipping_country: Set(request.shipping_country),
            shipping_phone: Set(request.shipping_phone),
            tracking_number: Set(None),
            paid_at: Set(None),
            production_started_at: Set(None),
            quality_check_at: Set(None),
            shipped_at: Set(None),
            delivered_at: Set(None),
            completed_at: Set(None),
            cancelled_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(0),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(order_id = %order.id, order_number = %order.order_number, "order created");
        self.event_sender.send_logged(Event::DesignOrdered(design.id)).await;
        self.event_sender.send_logged(Event::OrderCreated(order.id)).await;
        Ok(order)
    }

    pub async fn get_order(
        &self,
        operator: &Operator,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.load(order_id).await?;
        self.authorize_view(operator, &order)?;
        Ok(order)
    }

    pub async fn get_order_by_number(
        &self,
        operator: &Operator,
        order_number: &str,
    ) -> Result<OrderModel, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;
        self.authorize_view(operator, &order)?;
        Ok(order)
    }

    /// Pages through the operator's orders, newest first. Admins see all
    /// orders, customers their own, tailors the ones assigned to them.
    pub async fn list_orders(
        &self,
        operator: &Operator,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let per_page = per_page.clamp(1, 100);
        let mut query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);
        if !operator.is_admin() {
            query = query.filter(
                order::Column::UserId
                    .eq(operator.id)
                    .or(order::Column::TailorId.eq(operator.id)),
            );
        }
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status.to_string()));
        }

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    pub async fn order_stats(&self, operator: &Operator) -> Result<OrderStats, ServiceError> {
        let scoped = |statuses: &[OrderStatus]| {
            let mut query = OrderEntity::find();
            if !operator.is_admin() {
                query = query.filter(
                    order::Column::UserId
                        .eq(operator.id)
                        .or(order::Column::TailorId.eq(operator.id)),
                );
            }
            let values: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
            if !values.is_empty() {
                query = query.filter(order::Column::Status.is_in(values));
            }
            query
        };

        Ok(OrderStats {
            total: scoped(&[]).count(&*self.db).await?,
            awaiting_payment: scoped(&[OrderStatus::Pending, OrderStatus::PaymentPending])
                .count(&*self.db)
                .await?,
            in_fulfillment: scoped(&[
                OrderStatus::Paid,
                OrderStatus::FabricOrdering,
                OrderStatus::FabricOrdered,
                OrderStatus::InProduction,
                OrderStatus::QualityCheck,
                OrderStatus::ReadyForShipping,
                OrderStatus::Shipped,
                OrderStatus::Delivered,
            ])
            .count(&*self.db)
            .await?,
            completed: scoped(&[OrderStatus::Completed]).count(&*self.db).await?,
            cancelled: scoped(&[OrderStatus::Cancelled, OrderStatus::Refunded])
                .count(&*self.db)
                .await?,
        })
    }

    /// Edits notes, dates and shipping details. Only allowed before the
    /// order leaves the payment window.
    #[instrument(skip(self, operator, request), fields(order_id = %order_id))]
    pub async fn update_order(
        &self,
        operator: &Operator,
        order_id: Uuid,
        request: UpdateOrderRequest,
    ) -> Result<OrderModel, ServiceError> {
        request.validate()?;

        let order = self.load(order_id).await?;
        if !operator.can_act_for(order.user_id) {
            return Err(ServiceError::Forbidden(
                "Order belongs to another customer".to_string(),
            ));
        }
        let status = OrderStatusService::current_status(&order)?;
        if !matches!(
            status,
            OrderStatus::Pending | OrderStatus::PaymentPending | OrderStatus::Paid
        ) {
            return Err(ServiceError::IllegalTransition(format!(
                "Order in status '{}' can no longer be edited",
                status
            )));
        }

        let mut active: order::ActiveModel = order.into();
        if let Some(notes) = request.customer_notes {
            active.customer_notes = Set(Some(notes));
        }
        if let Some(date) = request.preferred_completion_date {
            active.preferred_completion_date = Set(Some(date));
        }
        if let Some(address) = request.shipping_address {
            active.shipping_address = Set(address);
        }
        if let Some(city) = request.shipping_city {
            active.shipping_city = Set(city);
        }
        if let Some(zip) = request.shipping_zip_code {
            active.shipping_zip_code = Set(zip);
        }
        if let Some(phone) = request.shipping_phone {
            active.shipping_phone = Set(phone);
        }
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(&*self.db).await?)
    }

    /// Cancels the order and unwinds whatever fulfillment has happened so
    /// far: open fabric sub-orders are cancelled (restoring reserved stock)
    /// and any captured payment is refunded in full.
    #[instrument(skip(self, operator, reason), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        operator: &Operator,
        order_id: Uuid,
        reason: &str,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.load(order_id).await?;
        if !operator.can_act_for(order.user_id) {
            return Err(ServiceError::Forbidden(
                "Order belongs to another customer".to_string(),
            ));
        }

        let had_payment = order.amount_paid > Decimal::ZERO;

        let txn = self.db.begin().await?;
        let order = self.order_status.cancel(&txn, order, reason).await?;
        let cancelled_fabrics = self
            .fulfillment
            .cancel_open_fabric_orders(&txn, order.id)
            .await?;
        txn.commit().await?;

        info!(
            order_id = %order.id,
            cancelled_fabrics,
            had_payment,
            "order cancelled"
        );

        // The refund happens after the cancellation commit: the gateway call
        // can fail independently and must not resurrect the order.
        if had_payment {
            match self.payments.refund_after_cancellation(order.id).await {
                Ok(refunded) => return Ok(refunded),
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "automatic refund failed, needs manual follow-up");
                }
            }
        }
        Ok(order)
    }

    /// Hands the finished order to the courier.
    #[instrument(skip(self, operator, tracking_number), fields(order_id = %order_id))]
    pub async fn ship_order(
        &self,
        operator: &Operator,
        order_id: Uuid,
        tracking_number: String,
    ) -> Result<OrderModel, ServiceError> {
        if !operator.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only platform staff may dispatch orders".to_string(),
            ));
        }
        if tracking_number.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Tracking number cannot be empty".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let mut active: order::ActiveModel = order.into();
        active.tracking_number = Set(Some(tracking_number));
        let order = active.update(&txn).await?;

        let order = self
            .order_status
            .transition(&txn, order, OrderStatus::Shipped)
            .await?;
        txn.commit().await?;
        Ok(order)
    }

    /// Customer confirms the parcel arrived.
    pub async fn confirm_delivery(
        &self,
        operator: &Operator,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.load(order_id).await?;
        if !operator.can_act_for(order.user_id) {
            return Err(ServiceError::Forbidden(
                "Order belongs to another customer".to_string(),
            ));
        }
        self.order_status
            .transition(&*self.db, order, OrderStatus::Delivered)
            .await
    }

    /// Customer accepts the garment, closing the order.
    pub async fn complete_order(
        &self,
        operator: &Operator,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.load(order_id).await?;
        if !operator.can_act_for(order.user_id) {
            return Err(ServiceError::Forbidden(
                "Order belongs to another customer".to_string(),
            ));
        }
        self.order_status
            .transition(&*self.db, order, OrderStatus::Completed)
            .await
    }

    async fn unique_order_number<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<String, ServiceError> {
        let today = Utc::now().date_naive();
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let candidate = generate_order_number(&mut rand::thread_rng(), today);
            let taken = OrderEntity::find()
                .filter(order::Column::OrderNumber.eq(candidate.as_str()))
                .count(conn)
                .await?;
            if taken == 0 {
                return Ok(candidate);
            }
        }
        Err(ServiceError::InternalError(
            "Could not allocate a unique order number".to_string(),
        ))
    }

    fn authorize_view(&self, operator: &Operator, order: &OrderModel) -> Result<(), ServiceError> {
        if operator.is_admin() || operator.id == order.user_id || operator.id == order.tailor_id {
            return Ok(());
        }
        Err(ServiceError::Forbidden(
            "Order is not visible to this account".to_string(),
        ))
    }

    async fn load(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn order_number_has_prefix_date_and_suffix() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        let mut rng = StepRng::new(0, 1);
        let number = generate_order_number(&mut rng, today);
        assert!(number.starts_with("TC20260830"));
        assert_eq!(number.len(), 2 + 8 + ORDER_NUMBER_SUFFIX_LEN);
        assert!(number
            .chars()
            .skip(10)
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
