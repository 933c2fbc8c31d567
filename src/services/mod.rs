//! Business services. Construction order matters: the dependency chain runs
//! order status -> assignments -> fulfillment -> payments -> orders, with the
//! design, stock and tracking services standing alone.

pub mod cost_engine;
pub mod designs;
pub mod fabric_stock;
pub mod fulfillment;
pub mod order_status;
pub mod orders;
pub mod payment_gateway;
pub mod payments;
pub mod tailor_assignments;
pub mod tracking;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;

pub use designs::DesignService;
pub use fabric_stock::FabricStockService;
pub use fulfillment::FulfillmentService;
pub use order_status::OrderStatusService;
pub use orders::OrderService;
pub use payment_gateway::{HttpPaymentGateway, PaymentGateway};
pub use payments::PaymentService;
pub use tailor_assignments::AssignmentService;
pub use tracking::TrackingService;

/// All services, wired together once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub designs: DesignService,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub fulfillment: Arc<FulfillmentService>,
    pub assignments: Arc<AssignmentService>,
    pub tracking: TrackingService,
}

impl AppServices {
    pub fn build(
        db: Arc<DbPool>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        let order_status = OrderStatusService::new(event_sender.clone());
        let stock = FabricStockService::new(event_sender.clone());
        let assignments = Arc::new(AssignmentService::new(
            db.clone(),
            order_status.clone(),
            event_sender.clone(),
        ));
        let fulfillment = Arc::new(FulfillmentService::new(
            db.clone(),
            order_status.clone(),
            stock,
            assignments.clone(),
            event_sender.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            db.clone(),
            gateway,
            config.gateway.clone(),
            order_status.clone(),
            fulfillment.clone(),
            event_sender.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            order_status,
            fulfillment.clone(),
            payments.clone(),
            event_sender.clone(),
        ));
        let designs = DesignService::new(db.clone(), event_sender);
        let tracking = TrackingService::new(db);

        Self {
            designs,
            orders,
            payments,
            fulfillment,
            assignments,
            tracking,
        }
    }
}
