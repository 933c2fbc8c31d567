//! Payment initialization, webhook reconciliation and refunds.
//!
//! Webhook deliveries arrive at-least-once and may race each other, so the
//! reconciler serializes processing per order with an in-process lock and
//! re-reads the order under that lock. Settlement is idempotent: a second
//! success notification for an already-paid order is a no-op.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, TransactionTrait,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::db::DbPool;
use crate::entities::{
    design::Entity as DesignEntity,
    order::{self, Entity as OrderEntity, Model as OrderModel},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{Operator, OrderStatus, PaymentStatus};
use crate::services::fulfillment::FulfillmentService;
use crate::services::order_status::OrderStatusService;
use crate::services::payment_gateway::{ChargeRequest, GatewayStatus, PaymentGateway};

/// What a gateway transaction status means for the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaymentOutcome {
    Settled,
    Challenge,
    StillPending,
    Failed,
}

/// Maps the gateway's transaction vocabulary onto ours. A captured payment
/// flagged for fraud review is a challenge, not a settlement.
fn classify(status: &GatewayStatus) -> Result<PaymentOutcome, ServiceError> {
    match status.transaction_status.as_str() {
        "capture" => {
            if status.fraud_status.as_deref() == Some("challenge") {
                Ok(PaymentOutcome::Challenge)
            } else {
                Ok(PaymentOutcome::Settled)
            }
        }
        "settlement" => Ok(PaymentOutcome::Settled),
        "pending" => Ok(PaymentOutcome::StillPending),
        "deny" | "expire" | "cancel" | "failure" => Ok(PaymentOutcome::Failed),
        other => Err(ServiceError::ValidationError(format!(
            "Unrecognized gateway transaction status '{}'",
            other
        ))),
    }
}

/// Checkout session handed back to the customer.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSession {
    pub order_id: Uuid,
    pub token: String,
    pub redirect_url: String,
    pub gateway_order_id: String,
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    gateway_config: GatewayConfig,
    order_status: OrderStatusService,
    fulfillment: Arc<FulfillmentService>,
    event_sender: EventSender,
    /// Per-order reconciliation locks keyed by order id.
    notification_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        gateway_config: GatewayConfig,
        order_status: OrderStatusService,
        fulfillment: Arc<FulfillmentService>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            gateway,
            gateway_config,
            order_status,
            fulfillment,
            event_sender,
            notification_locks: Arc::new(DashMap::new()),
        }
    }

    /// Opens a checkout session for a pending order. Calling it again while a
    /// session is already open returns the stored session unchanged.
    #[instrument(skip(self, operator), fields(order_id = %order_id))]
    pub async fn initialize_payment(
        &self,
        operator: &Operator,
        order_id: Uuid,
    ) -> Result<PaymentSession, ServiceError> {
        let order = self.load_order(&*self.db, order_id).await?;
        if !operator.can_act_for(order.user_id) {
            return Err(ServiceError::Forbidden(
                "Order belongs to another customer".to_string(),
            ));
        }

        match OrderStatusService::current_status(&order)? {
            OrderStatus::Pending => {}
            OrderStatus::PaymentPending => {
                // An open session already exists; reuse it.
                if let (Some(token), Some(redirect_url), Some(gateway_order_id)) = (
                    order.gateway_token.clone(),
                    order.gateway_redirect_url.clone(),
                    order.gateway_order_id.clone(),
                ) {
                    return Ok(PaymentSession {
                        order_id: order.id,
                        token,
                        redirect_url,
                        gateway_order_id,
                    });
                }
                return Err(ServiceError::InvariantViolation(format!(
                    "Order {} awaits payment but has no stored session",
                    order.order_number
                )));
            }
            other => {
                return Err(ServiceError::IllegalTransition(format!(
                    "Payment cannot be initialized for an order in status '{}'",
                    other
                )));
            }
        }

        // Gateway-side order ids must be unique across retries of the same
        // order, so each session gets a timestamp suffix.
        let gateway_order_id =
            format!("{}-{}", order.order_number, Utc::now().timestamp_micros());
        let request = ChargeRequest {
            order_number: gateway_order_id.clone(),
            gross_amount: order.total_amount,
            customer_id: order.user_id,
            expiry_hours: self.gateway_config.payment_expiry_hours.max(1) as u32,
        };
        let transaction = self.gateway.create_transaction(&request).await?;

        let order_id = order.id;
        let mut active: order::ActiveModel = order.into();
        active.gateway_order_id = Set(Some(gateway_order_id.clone()));
        active.gateway_token = Set(Some(transaction.token.clone()));
        active.gateway_redirect_url = Set(Some(transaction.redirect_url.clone()));
        active.payment_status = Set(PaymentStatus::Pending.to_string());
        active.updated_at = Set(Some(Utc::now()));
        let order = active.update(&*self.db).await?;

        let order = self.order_status.mark_payment_pending(&*self.db, order).await?;

        self.event_sender
            .send_logged(Event::PaymentInitialized {
                order_id,
                gateway_order_id: gateway_order_id.clone(),
            })
            .await;
        info!(order_id = %order.id, %gateway_order_id, "payment session opened");

        Ok(PaymentSession {
            order_id: order.id,
            token: transaction.token,
            redirect_url: transaction.redirect_url,
            gateway_order_id,
        })
    }

    /// Applies a gateway webhook notification to the order it references.
    #[instrument(skip(self, status), fields(gateway_order_id = %status.order_id))]
    pub async fn process_notification(
        &self,
        status: GatewayStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::GatewayOrderId.eq(status.order_id.as_str()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No order matches gateway order id '{}'",
                    status.order_id
                ))
            })?;

        let lock = self
            .notification_locks
            .entry(order.id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent delivery may have already
        // settled this order.
        let order = self.load_order(&*self.db, order.id).await?;
        self.apply_gateway_status(order, &status).await
    }

    /// Polls the gateway for the order's transaction and reconciles the
    /// order against the answer. Used when a webhook was missed.
    #[instrument(skip(self, operator), fields(order_id = %order_id))]
    pub async fn check_payment_status(
        &self,
        operator: &Operator,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.load_order(&*self.db, order_id).await?;
        if !operator.can_act_for(order.user_id) {
            return Err(ServiceError::Forbidden(
                "Order belongs to another customer".to_string(),
            ));
        }
        let gateway_order_id = order.gateway_order_id.clone().ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Order {} has no payment session to check",
                order.order_number
            ))
        })?;

        let status = self.gateway.check_status(&gateway_order_id).await?;

        let lock = self
            .notification_locks
            .entry(order.id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let order = self.load_order(&*self.db, order.id).await?;
        self.apply_gateway_status(order, &status).await
    }

    /// Refunds `amount` (default: everything still held) of a paid order.
    /// The gateway call happens first; if it fails the order is untouched.
    #[instrument(skip(self, operator, reason), fields(order_id = %order_id))]
    pub async fn refund(
        &self,
        operator: &Operator,
        order_id: Uuid,
        amount: Option<Decimal>,
        reason: &str,
    ) -> Result<OrderModel, ServiceError> {
        if !operator.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only platform staff may issue refunds".to_string(),
            ));
        }
        self.execute_refund(order_id, amount, reason).await
    }

    /// Refund path for the cancellation cascade; bypasses the operator check
    /// because the cancellation itself was already authorized.
    pub(crate) async fn refund_after_cancellation(
        &self,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        self.execute_refund(order_id, None, "Order cancelled").await
    }

    async fn execute_refund(
        &self,
        order_id: Uuid,
        amount: Option<Decimal>,
        reason: &str,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.load_order(&*self.db, order_id).await?;
        let payment_status = OrderStatusService::current_payment_status(&order)?;
        if !matches!(
            payment_status,
            PaymentStatus::Paid | PaymentStatus::PartiallyRefunded
        ) {
            return Err(ServiceError::IllegalTransition(format!(
                "Order {} holds no refundable payment (payment status '{}')",
                order.order_number, payment_status
            )));
        }

        let amount = amount.unwrap_or(order.amount_paid);
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Refund amount must be positive".to_string(),
            ));
        }
        if amount > order.amount_paid {
            return Err(ServiceError::ValidationError(format!(
                "Refund amount {} exceeds the {} held for order {}",
                amount, order.amount_paid, order.order_number
            )));
        }

        let gateway_order_id = order.gateway_order_id.clone().ok_or_else(|| {
            ServiceError::InvariantViolation(format!(
                "Paid order {} has no gateway order id",
                order.order_number
            ))
        })?;
        self.gateway.refund(&gateway_order_id, amount, reason).await?;

        let txn = self.db.begin().await?;
        let order = self.order_status.mark_refunded(&txn, order, amount).await?;
        // A fully refunded cancelled order settles into the refunded state.
        let fully_refunded = order.amount_paid == Decimal::ZERO;
        let order = if fully_refunded
            && OrderStatusService::current_status(&order)? == OrderStatus::Cancelled
        {
            self.order_status
                .transition(&txn, order, OrderStatus::Refunded)
                .await?
        } else {
            order
        };
        txn.commit().await?;

        self.event_sender
            .send_logged(Event::RefundProcessed {
                order_id: order.id,
                amount,
            })
            .await;
        info!(order_id = %order.id, %amount, "refund recorded");
        Ok(order)
    }

    /// Reverts orders whose checkout session has sat unpaid longer than the
    /// configured expiry window. Returns how many orders were reverted.
    #[instrument(skip(self))]
    pub async fn expire_stale_payments(&self) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - Duration::hours(self.gateway_config.payment_expiry_hours);
        let stale = OrderEntity::find()
            .filter(order::Column::Status.eq(OrderStatus::PaymentPending.to_string()))
            .filter(order::Column::UpdatedAt.lt(cutoff))
            .all(&*self.db)
            .await?;

        let mut expired = 0u64;
        for order in stale {
            let order_id = order.id;
            match self
                .order_status
                .mark_payment_failed(&*self.db, order, "Payment session expired")
                .await
            {
                Ok(_) => expired += 1,
                Err(e) => warn!(order_id = %order_id, error = %e, "failed to expire payment"),
            }
        }
        if expired > 0 {
            info!(count = expired, "expired stale payment sessions");
        }
        Ok(expired)
    }

    /// Orders of the operator with payment activity, newest first. Admins
    /// see everyone's.
    pub async fn payment_history(
        &self,
        operator: &Operator,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        let mut query = OrderEntity::find()
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Pending.to_string()))
            .order_by_desc(order::Column::UpdatedAt);
        if !operator.is_admin() {
            query = query.filter(order::Column::UserId.eq(operator.id));
        }
        Ok(query.all(&*self.db).await?)
    }

    async fn apply_gateway_status(
        &self,
        order: OrderModel,
        status: &GatewayStatus,
    ) -> Result<OrderModel, ServiceError> {
        let outcome = classify(status)?;
        let payment_status = OrderStatusService::current_payment_status(&order)?;

        // Idempotency: once money has moved, redelivered notifications are
        // acknowledged as-is whatever their outcome. Gateways retry and
        // reorder deliveries, so a late challenge or deny must not unwind a
        // settled order.
        if matches!(
            payment_status,
            PaymentStatus::Paid | PaymentStatus::PartiallyRefunded | PaymentStatus::Refunded
        ) {
            return Ok(order);
        }

        match outcome {
            PaymentOutcome::Settled => self.settle(order, status).await,
            PaymentOutcome::Challenge => {
                let order = self.order_status.mark_payment_challenged(&*self.db, order).await?;
                self.event_sender
                    .send_logged(Event::PaymentChallenged(order.id))
                    .await;
                Ok(order)
            }
            PaymentOutcome::StillPending => Ok(order),
            PaymentOutcome::Failed => {
                let reason = format!("Payment {}", status.transaction_status);
                let order = self
                    .order_status
                    .mark_payment_failed(&*self.db, order, &reason)
                    .await?;
                self.event_sender
                    .send_logged(Event::PaymentFailed {
                        order_id: order.id,
                        reason,
                    })
                    .await;
                Ok(order)
            }
        }
    }

    /// Settlement transaction: record the gateway details, mark the order
    /// paid and split it into fabric sub-orders, atomically.
    async fn settle(
        &self,
        order: OrderModel,
        status: &GatewayStatus,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let mut active: order::ActiveModel = order.into();
        active.gateway_transaction_id = Set(status.transaction_id.clone());
        active.payment_method = Set(status.payment_type.clone());
        let order = active.update(&txn).await?;

        let order = self.order_status.mark_paid(&txn, order).await?;

        let design = DesignEntity::find_by_id(order.design_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Design {} not found", order.design_id))
            })?;
        self.fulfillment.create_fabric_orders(&txn, &order, &design).await?;

        txn.commit().await?;

        self.event_sender
            .send_logged(Event::PaymentReceived {
                order_id: order.id,
                amount: order.amount_paid,
            })
            .await;
        info!(order_id = %order.id, "payment settled, fabric procurement started");
        Ok(order)
    }

    async fn load_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(transaction_status: &str, fraud_status: Option<&str>) -> GatewayStatus {
        GatewayStatus {
            order_id: "TC20260101ABCDEF-1".to_string(),
            transaction_status: transaction_status.to_string(),
            transaction_id: Some("txn-1".to_string()),
            payment_type: Some("bank_transfer".to_string()),
            fraud_status: fraud_status.map(str::to_string),
            status_message: None,
        }
    }

    #[test]
    fn capture_without_challenge_settles() {
        assert_eq!(
            classify(&status("capture", Some("accept"))).unwrap(),
            PaymentOutcome::Settled
        );
        assert_eq!(
            classify(&status("capture", None)).unwrap(),
            PaymentOutcome::Settled
        );
    }

    #[test]
    fn capture_with_challenge_is_held() {
        assert_eq!(
            classify(&status("capture", Some("challenge"))).unwrap(),
            PaymentOutcome::Challenge
        );
    }

    #[test]
    fn settlement_and_pending_map_directly() {
        assert_eq!(
            classify(&status("settlement", None)).unwrap(),
            PaymentOutcome::Settled
        );
        assert_eq!(
            classify(&status("pending", None)).unwrap(),
            PaymentOutcome::StillPending
        );
    }

    #[test]
    fn terminal_failures_map_to_failed() {
        for s in ["deny", "expire", "cancel", "failure"] {
            assert_eq!(classify(&status(s, None)).unwrap(), PaymentOutcome::Failed);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(classify(&status("reversed", None)).is_err());
    }
}
